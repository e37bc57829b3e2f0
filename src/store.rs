//! Store Module
//!
//! The ordered key-value store: the public face over the tree and the pager.
//!
//! ## Responsibilities
//! - Point reads and writes, with mutations buffered in memory until `flush`
//! - Range views in either direction
//! - Lifecycle: open, flush, close, hand the stream back
//!
//! ## Access Model
//!
//! Reads (`get`, `contains`, range views) take `&self`; the pager sits behind a
//! `parking_lot::Mutex` because even a read may fill the page cache. Mutations and
//! lifecycle calls take `&mut self`, so a range view cannot be alive while the store
//! changes underneath it: the borrow checker rejects that at compile time.

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::warn;

use crate::btree::{self, Cursor, Items, Keys, Projection, Values};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::flags::RangeFlags;
use crate::storage::Pager;
use crate::stream::Stream;

/// Pager slot shared with cursors; empty once the stream has been handed back
pub(crate) type SharedPager<S> = Mutex<Option<Pager<S>>>;

/// Lock the shared pager, failing with `Closed` if the stream was taken back
pub(crate) fn lock_pager<S: Stream>(shared: &SharedPager<S>) -> Result<MappedMutexGuard<'_, Pager<S>>> {
    MutexGuard::try_map(shared.lock(), Option::as_mut).map_err(|_| StoreError::Closed)
}

/// Counters describing an open store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Live entries
    pub entries: u64,
    /// Tree levels (1 when the root is a leaf)
    pub depth: u32,
    pub page_size: usize,
    /// Pages in the stream, including the meta page and free pages
    pub page_count: u32,
    pub free_pages: u32,
    pub cached_pages: usize,
    /// Cached pages holding changes not yet flushed
    pub dirty_pages: usize,
}

/// Result of a successful [`Store::verify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub entries: u64,
    pub depth: u32,
    pub leaf_pages: u32,
    pub internal_pages: u32,
    /// Pages holding overflowed keys and values
    pub overflow_pages: u32,
    /// Pages on the free list or waiting to join it
    pub free_pages: u32,
}

/// Ordered key-value store over a seekable stream
///
/// Keys and values are arbitrary byte strings; keys are ordered bytewise. Changes are
/// buffered in memory and reach the stream on [`flush`](Store::flush),
/// [`close`](Store::close), [`into_inner`](Store::into_inner) or drop.
pub struct Store<S: Stream> {
    pager: SharedPager<S>,
}

impl<S: Stream> Store<S> {
    /// Open a store over `stream`
    ///
    /// An empty stream becomes a new, empty store. Otherwise the stream must hold a
    /// store; its page size and min-keys setting override `config`.
    pub fn open(stream: S, config: Config) -> Result<Self> {
        let pager = Pager::open(stream, &config)?;
        Ok(Self {
            pager: Mutex::new(Some(pager)),
        })
    }

    fn pager(&self) -> Result<MappedMutexGuard<'_, Pager<S>>> {
        let pager = lock_pager(&self.pager)?;
        if pager.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(pager)
    }

    fn pager_mut(&mut self) -> Result<&mut Pager<S>> {
        match self.pager.get_mut() {
            Some(pager) if !pager.is_closed() => Ok(pager),
            _ => Err(StoreError::Closed),
        }
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Value for `key`, failing with `KeyNotFound` when absent
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.lookup(key)?.ok_or(StoreError::KeyNotFound)
    }

    /// Value for `key`, or `default` when absent
    pub fn get_or(&self, key: &[u8], default: &[u8]) -> Result<Vec<u8>> {
        Ok(self.lookup(key)?.unwrap_or_else(|| default.to_vec()))
    }

    /// Value for `key`, if present
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        btree::lookup(&mut *self.pager()?, key)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        btree::contains(&mut *self.pager()?, key)
    }

    /// Insert `key`, replacing any existing value
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        btree::insert(self.pager_mut()?, key, value)?;
        Ok(())
    }

    /// Remove `key`, failing with `KeyNotFound` when absent
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if btree::remove(self.pager_mut()?, key)? {
            Ok(())
        } else {
            Err(StoreError::KeyNotFound)
        }
    }

    // =========================================================================
    // Range Views
    // =========================================================================

    /// Keys in `[start, end)` (or `[start, end]` with `INCLUDE_END`)
    ///
    /// Either bound may be omitted. `DESCENDING` reverses the order of emission but not
    /// which keys are included. A `start` greater than `end` gives an empty view.
    pub fn keys(&self, start: Option<&[u8]>, end: Option<&[u8]>, flags: RangeFlags) -> Result<Keys<'_, S>> {
        self.cursor(start, end, flags, Projection::Keys).map(Keys)
    }

    /// Values of the keys in the range, in key order
    pub fn values(&self, start: Option<&[u8]>, end: Option<&[u8]>, flags: RangeFlags) -> Result<Values<'_, S>> {
        self.cursor(start, end, flags, Projection::Values).map(Values)
    }

    /// `(key, value)` pairs in the range
    pub fn items(&self, start: Option<&[u8]>, end: Option<&[u8]>, flags: RangeFlags) -> Result<Items<'_, S>> {
        self.cursor(start, end, flags, Projection::Items).map(Items)
    }

    /// All keys in ascending order
    ///
    /// A closed store yields a single `Closed` error.
    pub fn iter(&self) -> Keys<'_, S> {
        Keys(Cursor::new(&self.pager, None, None, RangeFlags::empty(), Projection::Keys))
    }

    fn cursor(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        flags: RangeFlags,
        projection: Projection,
    ) -> Result<Cursor<'_, S>> {
        drop(self.pager()?);
        Ok(Cursor::new(&self.pager, start, end, flags, projection))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Write buffered changes to the stream and flush it
    ///
    /// Does nothing to the stream when nothing changed since the last flush.
    pub fn flush(&mut self) -> Result<()> {
        self.pager_mut()?.flush()?;
        Ok(())
    }

    /// Flush and release the in-memory state. Later operations fail with `Closed`.
    ///
    /// The stream itself stays open; take it back with [`into_inner`](Store::into_inner).
    /// Closing an already closed store is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.pager.get_mut() {
            Some(pager) => pager.close(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pager().is_err()
    }

    /// Flush (unless closed) and give the stream back
    pub fn into_inner(mut self) -> Result<S> {
        let mut pager = self.pager.get_mut().take().ok_or(StoreError::Closed)?;
        if !pager.is_closed() {
            if let Err(e) = pager.flush() {
                // Put it back so drop gets another try
                *self.pager.get_mut() = Some(pager);
                return Err(e);
            }
        }
        Ok(pager.into_stream())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of entries
    pub fn len(&self) -> Result<u64> {
        Ok(self.pager()?.meta().entry_count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let pager = self.pager()?;
        let meta = pager.meta();
        let pages = pager.stats();
        Ok(StoreStats {
            entries: meta.entry_count,
            depth: meta.depth,
            page_size: pages.page_size,
            page_count: pages.page_count,
            free_pages: pages.free_pages,
            cached_pages: pages.cached_pages,
            dirty_pages: pages.dirty_pages,
        })
    }

    /// Walk the whole tree and check its structure
    ///
    /// Reads every node, overflow and free-list page, and checks that each page of the
    /// stream is used exactly once; fails with `Corruption` on the first violation found.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut pager = self.pager()?;
        let summary = btree::verify(&mut *pager)?;
        Ok(VerifyReport {
            entries: summary.entries,
            depth: pager.meta().depth,
            leaf_pages: summary.leaf_pages,
            internal_pages: summary.internal_pages,
            overflow_pages: summary.overflow_pages,
            free_pages: summary.free_pages,
        })
    }
}

impl<'a, S: Stream> IntoIterator for &'a Store<S> {
    type Item = Result<Vec<u8>>;
    type IntoIter = Keys<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<S: Stream> Drop for Store<S> {
    fn drop(&mut self) {
        if let Some(pager) = self.pager.get_mut() {
            if !pager.is_closed() && pager.is_dirty() {
                if let Err(e) = pager.flush() {
                    warn!(error = %e, "flush on drop failed, buffered changes are lost");
                }
            }
        }
    }
}

impl<S: Stream> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stats() {
            Ok(stats) => f.debug_struct("Store").field("stats", &stats).finish(),
            Err(_) => f.debug_struct("Store").field("closed", &true).finish(),
        }
    }
}

/// Open a store with integer parameters; zero selects the default for each
///
/// `flags` is reserved and must be 0. See [`Config`] for the meaning and accepted
/// ranges of `page_size`, `cache_size` and `min_keys_per_page`.
pub fn open<S: Stream>(
    stream: S,
    flags: u32,
    page_size: u32,
    cache_size: usize,
    min_keys_per_page: u32,
) -> Result<Store<S>> {
    let config = Config::builder()
        .flags(flags)
        .page_size(page_size)
        .cache_size(cache_size)
        .min_keys_per_page(min_keys_per_page)
        .build();
    Store::open(stream, config)
}
