//! Tests for range views
//!
//! These tests verify:
//! - Start-inclusive / end-exclusive bounds and INCLUDE_END
//! - DESCENDING reverses order without changing membership
//! - Keys / values / items projections
//! - Ranges crossing many leaves in both directions

use std::io::Cursor;

use btreekv::{Config, RangeFlags, Store};

// =============================================================================
// Helper Functions
// =============================================================================

type MemStore = Store<Cursor<Vec<u8>>>;

/// Store holding "00".."99" (every third number) on small pages, so ranges cross leaves
fn setup_numbered_store() -> MemStore {
    let config = Config::builder().page_size(512).build();
    let mut store = Store::open(Cursor::new(Vec::new()), config).unwrap();
    for i in (0..100).step_by(3) {
        let k = format!("{:02}", i);
        store.put(k.as_bytes(), format!("v{}", i).as_bytes()).unwrap();
    }
    store
}

fn keys(store: &MemStore, start: Option<&str>, end: Option<&str>, flags: RangeFlags) -> Vec<String> {
    store
        .keys(start.map(str::as_bytes), end.map(str::as_bytes), flags)
        .unwrap()
        .map(|k| String::from_utf8(k.unwrap()).unwrap())
        .collect()
}

fn numbers(range: impl Iterator<Item = u32>) -> Vec<String> {
    range.filter(|i| i % 3 == 0).map(|i| format!("{:02}", i)).collect()
}

// =============================================================================
// Bound Tests
// =============================================================================

#[test]
fn test_range_unbounded() {
    let store = setup_numbered_store();

    assert_eq!(keys(&store, None, None, RangeFlags::empty()), numbers(0..100));
}

#[test]
fn test_range_start_is_inclusive() {
    let store = setup_numbered_store();

    assert_eq!(keys(&store, Some("30"), None, RangeFlags::empty()), numbers(30..100));
    // Start between keys
    assert_eq!(keys(&store, Some("31"), None, RangeFlags::empty()), numbers(31..100));
}

#[test]
fn test_range_end_is_exclusive() {
    let store = setup_numbered_store();

    assert_eq!(keys(&store, None, Some("30"), RangeFlags::empty()), numbers(0..30));
    assert_eq!(keys(&store, Some("12"), Some("45"), RangeFlags::empty()), numbers(12..45));
}

#[test]
fn test_range_include_end() {
    let store = setup_numbered_store();

    assert_eq!(
        keys(&store, Some("12"), Some("45"), RangeFlags::INCLUDE_END),
        numbers(12..46)
    );
    // End that is not a key behaves the same either way
    assert_eq!(
        keys(&store, Some("12"), Some("44"), RangeFlags::INCLUDE_END),
        keys(&store, Some("12"), Some("44"), RangeFlags::empty())
    );
}

#[test]
fn test_range_empty_cases() {
    let store = setup_numbered_store();

    // start > end
    assert!(keys(&store, Some("50"), Some("10"), RangeFlags::empty()).is_empty());
    assert!(keys(&store, Some("50"), Some("10"), RangeFlags::DESCENDING).is_empty());
    // start == end, exclusive
    assert!(keys(&store, Some("30"), Some("30"), RangeFlags::empty()).is_empty());
    // start == end, inclusive
    assert_eq!(keys(&store, Some("30"), Some("30"), RangeFlags::INCLUDE_END), vec!["30"]);
    // Beyond every key
    assert!(keys(&store, Some("zz"), None, RangeFlags::empty()).is_empty());
    assert!(keys(&store, None, Some(""), RangeFlags::DESCENDING).is_empty());
}

// =============================================================================
// Direction Tests
// =============================================================================

#[test]
fn test_range_descending_is_reverse() {
    let store = setup_numbered_store();

    let bounds: [(Option<&str>, Option<&str>); 5] = [
        (None, None),
        (Some("20"), None),
        (None, Some("70")),
        (Some("13"), Some("88")),
        (Some("21"), Some("21")),
    ];

    for (start, end) in bounds {
        for extra in [RangeFlags::empty(), RangeFlags::INCLUDE_END] {
            let mut ascending = keys(&store, start, end, extra);
            let descending = keys(&store, start, end, extra | RangeFlags::DESCENDING);
            ascending.reverse();
            assert_eq!(descending, ascending, "bounds {:?}..{:?} {:?}", start, end, extra);
        }
    }
}

#[test]
fn test_range_descending_include_end() {
    let store = setup_numbered_store();

    let flags = RangeFlags::INCLUDE_END | RangeFlags::DESCENDING;
    assert_eq!(keys(&store, Some("90"), Some("99"), flags), vec!["99", "96", "93", "90"]);
}

// =============================================================================
// Projection Tests
// =============================================================================

#[test]
fn test_range_values_and_items() {
    let store = setup_numbered_store();

    let values: Vec<Vec<u8>> = store
        .values(Some(&b"10"[..]), Some(&b"20"[..]), RangeFlags::empty())
        .unwrap()
        .collect::<btreekv::Result<_>>()
        .unwrap();
    assert_eq!(values, vec![b"v12".to_vec(), b"v15".to_vec(), b"v18".to_vec()]);

    let items: Vec<(Vec<u8>, Vec<u8>)> = store
        .items(Some(&b"10"[..]), Some(&b"20"[..]), RangeFlags::DESCENDING)
        .unwrap()
        .collect::<btreekv::Result<_>>()
        .unwrap();
    assert_eq!(
        items,
        vec![
            (b"18".to_vec(), b"v18".to_vec()),
            (b"15".to_vec(), b"v15".to_vec()),
            (b"12".to_vec(), b"v12".to_vec()),
        ]
    );
}

#[test]
fn test_range_is_lazy_and_one_pass() {
    let store = setup_numbered_store();

    let mut view = store.keys(None, None, RangeFlags::empty()).unwrap();
    assert_eq!(view.next().unwrap().unwrap(), b"00".to_vec());
    assert_eq!(view.next().unwrap().unwrap(), b"03".to_vec());

    // Two views over the same store advance independently
    let mut other = store.keys(Some(&b"50"[..]), None, RangeFlags::empty()).unwrap();
    assert_eq!(other.next().unwrap().unwrap(), b"51".to_vec());
    assert_eq!(view.next().unwrap().unwrap(), b"06".to_vec());

    assert_eq!(view.count(), 31);
}

// =============================================================================
// Multi-leaf Tests
// =============================================================================

#[test]
fn test_range_after_deletes_across_leaves() {
    let config = Config::builder().page_size(512).build();
    let mut store = Store::open(Cursor::new(Vec::new()), config).unwrap();
    for i in 0..3000u32 {
        store.put(format!("{:05}", i).as_bytes(), b"payload-payload").unwrap();
    }
    for i in (0..3000u32).filter(|i| i % 10 != 0) {
        store.delete(format!("{:05}", i).as_bytes()).unwrap();
    }

    let ascending = keys(&store, Some("00500"), Some("02500"), RangeFlags::empty());
    let expected: Vec<String> = (500..2500).filter(|i| i % 10 == 0).map(|i| format!("{:05}", i)).collect();
    assert_eq!(ascending, expected);

    let mut descending = keys(&store, Some("00500"), Some("02500"), RangeFlags::DESCENDING);
    descending.reverse();
    assert_eq!(descending, expected);
}
