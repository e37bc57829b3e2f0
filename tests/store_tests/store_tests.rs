//! Tests for Store
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Missing-key and closed-store errors
//! - Iteration over the whole store
//! - Large keys and values (overflow pages)
//! - Counters and structural verification

use std::io::Cursor;

use btreekv::{Config, ErrorKind, RangeFlags, Store, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

type MemStore = Store<Cursor<Vec<u8>>>;

fn setup_store() -> MemStore {
    Store::open(Cursor::new(Vec::new()), Config::default()).unwrap()
}

fn setup_small_page_store() -> MemStore {
    let config = Config::builder().page_size(512).build();
    Store::open(Cursor::new(Vec::new()), config).unwrap()
}

fn collect_keys(store: &MemStore) -> Vec<Vec<u8>> {
    store.iter().collect::<btreekv::Result<_>>().unwrap()
}

fn key(i: u32) -> Vec<u8> {
    format!("key-{:06}", i).into_bytes()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_store_put_get() {
    let mut store = setup_store();

    store.put(b"hello", b"world").unwrap();

    assert_eq!(store.get(b"hello").unwrap(), b"world".to_vec());
}

#[test]
fn test_store_get_nonexistent_key() {
    let store = setup_store();

    let err = store.get(b"nonexistent").unwrap_err();

    assert!(matches!(err, StoreError::KeyNotFound));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.lookup(b"nonexistent").unwrap(), None);
}

#[test]
fn test_store_get_or_default() {
    let mut store = setup_store();
    store.put(b"present", b"1").unwrap();

    assert_eq!(store.get_or(b"present", b"fallback").unwrap(), b"1".to_vec());
    assert_eq!(store.get_or(b"absent", b"fallback").unwrap(), b"fallback".to_vec());
}

#[test]
fn test_store_put_overwrite() {
    let mut store = setup_store();

    store.put(b"key", b"value1").unwrap();
    store.put(b"key", b"value2").unwrap();

    assert_eq!(store.get(b"key").unwrap(), b"value2".to_vec());
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_store_delete() {
    let mut store = setup_store();

    store.put(b"key", b"value").unwrap();
    store.delete(b"key").unwrap();

    assert!(!store.contains(b"key").unwrap());
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_store_delete_nonexistent_key() {
    let mut store = setup_store();
    store.put(b"other", b"x").unwrap();

    let err = store.delete(b"nonexistent").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_store_empty_key_and_value() {
    let mut store = setup_store();

    store.put(b"", b"empty key").unwrap();
    store.put(b"empty value", b"").unwrap();

    assert_eq!(store.get(b"").unwrap(), b"empty key".to_vec());
    assert_eq!(store.get(b"empty value").unwrap(), Vec::<u8>::new());
    assert_eq!(collect_keys(&store), vec![b"".to_vec(), b"empty value".to_vec()]);
}

#[test]
fn test_store_bytewise_ordering() {
    let mut store = setup_store();

    for k in [&b"\xff"[..], b"a", b"\x00", b"ab", b"B", b"aa"] {
        store.put(k, b"").unwrap();
    }

    // Unsigned byte comparison, shorter prefix first
    let expected: Vec<Vec<u8>> = [&b"\x00"[..], b"B", b"a", b"aa", b"ab", b"\xff"]
        .iter()
        .map(|k| k.to_vec())
        .collect();
    assert_eq!(collect_keys(&store), expected);
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[test]
fn test_scenario_insert_lookup_delete() {
    let mut store = setup_store();

    store.put(b"3", b"three").unwrap();
    store.put(b"1", b"one").unwrap();
    store.put(b"2", b"two").unwrap();

    assert_eq!(store.get(b"2").unwrap(), b"two".to_vec());
    assert_eq!(collect_keys(&store), vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);

    store.delete(b"2").unwrap();

    assert!(!store.contains(b"2").unwrap());
    assert_eq!(collect_keys(&store), vec![b"1".to_vec(), b"3".to_vec()]);
}

#[test]
fn test_scenario_values_from_start() {
    let mut store = setup_store();

    store.put(b"3", b"three").unwrap();
    store.put(b"1", b"one").unwrap();
    store.put(b"2", b"two").unwrap();

    let values: Vec<Vec<u8>> = store
        .values(Some(&b"2"[..]), None, RangeFlags::empty())
        .unwrap()
        .collect::<btreekv::Result<_>>()
        .unwrap();

    assert_eq!(values, vec![b"two".to_vec(), b"three".to_vec()]);
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_store_into_iterator() {
    let mut store = setup_store();
    for i in (0..50).rev() {
        store.put(&key(i), b"v").unwrap();
    }

    let mut count = 0;
    for k in &store {
        assert_eq!(k.unwrap(), key(count));
        count += 1;
    }
    assert_eq!(count, 50);
}

#[test]
fn test_store_iterate_empty() {
    let store = setup_store();

    assert!(collect_keys(&store).is_empty());
    assert_eq!(store.items(None, None, RangeFlags::DESCENDING).unwrap().count(), 0);
}

#[test]
fn test_store_many_keys_span_pages() {
    let mut store = setup_small_page_store();
    for i in 0..2000 {
        store.put(&key(i), format!("value-{}", i).as_bytes()).unwrap();
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.entries, 2000);
    assert!(stats.depth >= 3);

    let keys = collect_keys(&store);
    assert_eq!(keys.len(), 2000);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));

    for i in (0..2000).step_by(97) {
        assert_eq!(store.get(&key(i)).unwrap(), format!("value-{}", i).into_bytes());
    }
    store.verify().unwrap();
}

#[test]
fn test_store_delete_everything_shrinks_tree() {
    let mut store = setup_small_page_store();
    for i in 0..1000 {
        store.put(&key(i), b"some value").unwrap();
    }
    for i in 0..1000 {
        store.delete(&key(i)).unwrap();
    }

    let report = store.verify().unwrap();
    assert_eq!(report.entries, 0);
    assert_eq!(report.depth, 1);
    assert!(store.is_empty().unwrap());
    assert!(store.stats().unwrap().free_pages > 0);
}

// =============================================================================
// Large Item Tests
// =============================================================================

#[test]
fn test_store_large_value() {
    let mut store = setup_small_page_store();
    let value: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 256) as u8).collect();

    store.put(b"big", &value).unwrap();
    store.put(b"small", b"s").unwrap();

    assert_eq!(store.get(b"big").unwrap(), value);
    assert_eq!(store.get(b"small").unwrap(), b"s".to_vec());
}

#[test]
fn test_store_large_keys() {
    let mut store = setup_small_page_store();
    let big_key = |i: u32| {
        let mut k = vec![b'k'; 3000];
        k.extend_from_slice(&key(i));
        k
    };

    for i in 0..30 {
        store.put(&big_key(i), &key(i)).unwrap();
    }

    for i in 0..30 {
        assert_eq!(store.get(&big_key(i)).unwrap(), key(i));
    }
    assert_eq!(collect_keys(&store), (0..30).map(big_key).collect::<Vec<_>>());
    store.verify().unwrap();
}

#[test]
fn test_store_overflow_pages_are_reused() {
    let mut store = setup_small_page_store();
    let value = vec![7u8; 20_000];

    // Until the free list settles, replacements need new pages: a freed chain only
    // becomes reusable once the flush after its release is on the stream, and the
    // free list itself needs a trunk page
    for _ in 0..3 {
        store.put(b"big", &value).unwrap();
        store.flush().unwrap();
    }
    let pages = store.stats().unwrap().page_count;

    // From then on each replacement draws on the chain freed by the previous one
    for _ in 0..5 {
        store.put(b"big", &value).unwrap();
        store.flush().unwrap();
    }

    assert_eq!(store.stats().unwrap().page_count, pages);
    assert_eq!(store.get(b"big").unwrap(), value);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_store_closed_rejects_operations() {
    let mut store = setup_store();
    store.put(b"key", b"value").unwrap();
    store.close().unwrap();

    assert!(store.is_closed());
    assert_eq!(store.get(b"key").unwrap_err().kind(), ErrorKind::InvalidState);
    assert!(matches!(store.put(b"k", b"v"), Err(StoreError::Closed)));
    assert!(matches!(store.delete(b"key"), Err(StoreError::Closed)));
    assert!(matches!(store.contains(b"key"), Err(StoreError::Closed)));
    assert!(matches!(store.flush(), Err(StoreError::Closed)));
    assert!(store.keys(None, None, RangeFlags::empty()).is_err());

    let mut iter = store.iter();
    assert!(matches!(iter.next(), Some(Err(StoreError::Closed))));
    assert!(iter.next().is_none());

    // Closing twice is fine
    store.close().unwrap();
}

#[test]
fn test_store_close_keeps_stream_usable() {
    let mut store = setup_store();
    store.put(b"key", b"value").unwrap();
    store.close().unwrap();

    let stream = store.into_inner().unwrap();
    let store = Store::open(stream, Config::default()).unwrap();
    assert_eq!(store.get(b"key").unwrap(), b"value".to_vec());
}

#[test]
fn test_store_verify_reports_shape() {
    let mut store = setup_small_page_store();
    for i in 0..500 {
        store.put(&key(i), b"v").unwrap();
    }
    store.put(b"big", &vec![1u8; 3000]).unwrap();
    store.flush().unwrap();
    for i in (0..500).step_by(5) {
        store.delete(&key(i)).unwrap();
    }

    let report = store.verify().unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(report.entries, 401);
    assert!(report.leaf_pages > 1);
    assert!(report.internal_pages >= 1);
    assert!(report.overflow_pages >= 6);
    assert!(report.free_pages > 0);
    assert_eq!(report.free_pages, stats.free_pages);
    assert_eq!(report.depth, stats.depth);
}
