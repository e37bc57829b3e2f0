//! Tests for error handling
//!
//! These tests verify:
//! - Invalid open parameters and range flags
//! - Damaged pages surface as I/O-kind corruption errors
//! - Stream failures propagate without translation
//! - A failed flush leaves the stream at the last successful flush

use std::cell::{Cell, RefCell};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use btreekv::{open, Config, ErrorKind, RangeFlags, Store, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

const PAGE: usize = 512;

/// In-memory store image with enough keys for a multi-level tree
fn store_image() -> Vec<u8> {
    let config = Config::builder().page_size(PAGE as u32).build();
    let mut store = Store::open(Cursor::new(Vec::new()), config).unwrap();
    for i in 0..500u32 {
        store.put(format!("{:04}", i).as_bytes(), b"value").unwrap();
    }
    store.into_inner().unwrap().into_inner()
}

/// Stream that starts failing reads on request, or writes once a budget runs out.
///
/// The bytes and the write budget are shared, so a test can inspect the image and
/// move the budget while a store owns the stream.
struct FlakyStream {
    disk: Rc<RefCell<Cursor<Vec<u8>>>>,
    fail_reads: bool,
    /// Write calls that still succeed; `None` is unlimited
    writes_left: Rc<Cell<Option<usize>>>,
}

impl FlakyStream {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            disk: Rc::new(RefCell::new(Cursor::new(bytes))),
            fail_reads: false,
            writes_left: Rc::new(Cell::new(None)),
        }
    }

    fn image(disk: &RefCell<Cursor<Vec<u8>>>) -> Vec<u8> {
        disk.borrow().get_ref().clone()
    }
}

impl Read for FlakyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads {
            return Err(io::Error::other("injected read failure"));
        }
        self.disk.borrow_mut().read(buf)
    }
}

impl Write for FlakyStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writes_left.get() {
            Some(0) => return Err(io::Error::other("injected write failure")),
            Some(n) => self.writes_left.set(Some(n - 1)),
            None => {}
        }
        self.disk.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FlakyStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.disk.borrow_mut().seek(pos)
    }
}

fn key(i: u32) -> Vec<u8> {
    format!("key-{:05}", i).into_bytes()
}

fn value(i: u32) -> Vec<u8> {
    // Every tenth value spills to overflow pages
    if i % 10 == 0 {
        vec![i as u8; 1500]
    } else {
        format!("value-{}", i).into_bytes()
    }
}

/// Store holding keys 0..300 on the stream, with deletes of the even keys and inserts
/// of 300..400 buffered on top
fn store_with_buffered_changes(stream: FlakyStream) -> Store<FlakyStream> {
    let config = Config::builder().page_size(PAGE as u32).build();
    let mut store = Store::open(stream, config).unwrap();
    for i in 0..300 {
        store.put(&key(i), &value(i)).unwrap();
    }
    store.flush().unwrap();

    for i in (0..300).step_by(2) {
        store.delete(&key(i)).unwrap();
    }
    for i in 300..400 {
        store.put(&key(i), &value(i)).unwrap();
    }
    store
}

// =============================================================================
// Argument Tests
// =============================================================================

#[test]
fn test_invalid_page_size() {
    for page_size in [1, 100, 511, 65537, 1 << 20] {
        let err = open(Cursor::new(Vec::new()), 0, page_size, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "page size {}", page_size);
    }
}

#[test]
fn test_invalid_open_flags() {
    let err = open(Cursor::new(Vec::new()), 0x10, 0, 0, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_invalid_min_keys() {
    let err = open(Cursor::new(Vec::new()), 0, 0, 0, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_invalid_range_flags() {
    let err = RangeFlags::from_bits(0x80).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let flags = RangeFlags::from_bits(0x03).unwrap();
    assert_eq!(flags, RangeFlags::INCLUDE_END | RangeFlags::DESCENDING);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_foreign_stream_rejected_at_open() {
    let err = Store::open(Cursor::new(vec![0xAB; 4096]), Config::default()).unwrap_err();

    assert!(matches!(err, StoreError::Corruption { page: 0, .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_truncated_meta_rejected() {
    let mut image = store_image();
    image.truncate(20);

    let err = Store::open(Cursor::new(image), Config::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_damaged_node_page_reported_lazily() {
    let mut image = store_image();

    // Damage every node page except the meta page; opening only reads page 0
    for page in image.chunks_mut(PAGE).skip(1) {
        page[40] ^= 0x5A;
    }
    let store = Store::open(Cursor::new(image), Config::default()).unwrap();

    let err = store.get(b"0100").unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_damaged_leaf_ends_cursor_with_error() {
    let mut image = store_image();
    let page_count = image.len() / PAGE;

    // Damage the last page; a full scan eventually reaches it if it is a leaf,
    // and verify walks every node regardless
    let last = (page_count - 1) * PAGE;
    image[last + 100] ^= 0xFF;
    let store = Store::open(Cursor::new(image), Config::default()).unwrap();

    let results: Vec<_> = store.iter().collect();
    if let Some(pos) = results.iter().position(|r| r.is_err()) {
        // The error is the final item
        assert_eq!(pos, results.len() - 1);
    }
    assert!(store.verify().is_err());
}

#[test]
fn test_truncated_stream_is_io_error() {
    let mut image = store_image();
    image.truncate(3 * PAGE);

    let store = Store::open(Cursor::new(image), Config::default()).unwrap();
    let err = store.verify().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

// =============================================================================
// Stream Failure Tests
// =============================================================================

#[test]
fn test_write_failure_propagates_from_flush() {
    let stream = FlakyStream::new(Vec::new());
    stream.writes_left.set(Some(0));

    let mut store = Store::open(stream, Config::default()).unwrap();
    store.put(b"k", b"v").unwrap();

    let err = store.flush().unwrap_err();
    match err {
        StoreError::Io(e) => assert_eq!(e.to_string(), "injected write failure"),
        other => panic!("unexpected error {:?}", other),
    }
    // Buffered state survives the failed flush
    assert_eq!(store.get(b"k").unwrap(), b"v".to_vec());
}

#[test]
fn test_read_failure_propagates_from_open() {
    let stream = FlakyStream::new(store_image());
    let store = Store::open(stream, Config::default()).unwrap();
    let mut stream = store.into_inner().unwrap();

    stream.fail_reads = true;
    let err = Store::open(stream, Config::default()).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_failed_flush_keeps_last_flushed_state() {
    let mut failures = 0;

    // Cut the stream after 0, 1, 2, ... page writes until the flush gets through
    for cut in 0.. {
        let stream = FlakyStream::new(Vec::new());
        let disk = Rc::clone(&stream.disk);
        let writes_left = Rc::clone(&stream.writes_left);
        let mut store = store_with_buffered_changes(stream);

        writes_left.set(Some(cut));
        if store.flush().is_ok() {
            break;
        }
        failures += 1;

        // Whatever reached the stream, it still opens as the first flush
        let reopened = Store::open(Cursor::new(FlakyStream::image(&disk)), Config::default()).unwrap();
        let report = reopened.verify().unwrap();
        assert_eq!(report.entries, 300, "cut after {} writes", cut);
        for i in 0..300 {
            assert_eq!(reopened.get(&key(i)).unwrap(), value(i), "cut after {} writes", cut);
        }
        assert!(!reopened.contains(&key(300)).unwrap());
    }

    assert!(failures > 2);
}

#[test]
fn test_failed_flush_then_retry_keeps_free_pages() {
    let mut reference = store_with_buffered_changes(FlakyStream::new(Vec::new()));
    reference.flush().unwrap();
    let expected = reference.stats().unwrap();

    for cut in [0, 1, 5] {
        let stream = FlakyStream::new(Vec::new());
        let disk = Rc::clone(&stream.disk);
        let writes_left = Rc::clone(&stream.writes_left);
        let mut store = store_with_buffered_changes(stream);

        writes_left.set(Some(cut));
        assert!(store.flush().is_err(), "cut after {} writes", cut);
        writes_left.set(None);
        store.flush().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.free_pages, expected.free_pages, "cut after {} writes", cut);
        assert_eq!(stats.page_count, expected.page_count, "cut after {} writes", cut);
        store.verify().unwrap();
        drop(store);

        let reopened = Store::open(Cursor::new(FlakyStream::image(&disk)), Config::default()).unwrap();
        let report = reopened.verify().unwrap();
        assert_eq!(report.entries, 250);
        assert_eq!(report.free_pages, expected.free_pages);
    }
}
