//! Configuration for btreekv
//!
//! Open parameters with sensible defaults. A zero in any numeric field selects the
//! implementation default, matching the integer-based [`crate::open`] call.

use crate::error::{Result, StoreError};
use crate::storage::PAGE_HEADER_SIZE;

/// Smallest accepted page size (bytes)
pub const MIN_PAGE_SIZE: u32 = 512;

/// Largest accepted page size (bytes)
pub const MAX_PAGE_SIZE: u32 = 65536;

/// Page size used when the caller passes 0
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Cache budget used when the caller passes 0
pub const DEFAULT_CACHE_SIZE: usize = 256 * 1024;

/// Minimum keys per page used when the caller passes 0
pub const DEFAULT_MIN_KEYS_PER_PAGE: u32 = 2;

/// The cache never shrinks below this many pages, whatever the byte budget says
const MIN_CACHE_PAGES: usize = 8;

/// Floor for the per-entry inline budget; two overflow references must always fit
const MIN_ENTRY_SIZE: usize = 32;

/// Open parameters for a store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Open Flags
    // -------------------------------------------------------------------------
    /// Reserved; must be 0
    pub flags: u32,

    // -------------------------------------------------------------------------
    // Page Layout
    // -------------------------------------------------------------------------
    /// Size of one page in bytes (512..=65536, or 0 for the default).
    /// Ignored when opening a stream that already holds a store.
    pub page_size: u32,

    /// Minimum number of entries a page must be able to hold (0 for the default of 2).
    /// Entries larger than `capacity / min_keys_per_page` spill to overflow pages.
    pub min_keys_per_page: u32,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Advisory page cache budget in bytes (0 for the default)
    pub cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flags: 0,
            page_size: DEFAULT_PAGE_SIZE,
            min_keys_per_page: DEFAULT_MIN_KEYS_PER_PAGE,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate the parameters and fill in defaults for zero fields
    pub(crate) fn resolve(&self) -> Result<Layout> {
        if self.flags != 0 {
            return Err(StoreError::InvalidArgument(format!(
                "unsupported open flags: {:#x}",
                self.flags
            )));
        }

        let page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            size => size,
        };
        check_page_size(page_size)?;

        let min_keys = match self.min_keys_per_page {
            0 => DEFAULT_MIN_KEYS_PER_PAGE,
            1 => {
                return Err(StoreError::InvalidArgument(
                    "min_keys_per_page must be at least 2".to_string(),
                ))
            }
            n => n,
        };

        let cache_size = match self.cache_size {
            0 => DEFAULT_CACHE_SIZE,
            n => n,
        };

        Ok(Layout::new(page_size, min_keys, cache_size))
    }
}

/// Reject page sizes outside the accepted range
pub(crate) fn check_page_size(page_size: u32) -> Result<()> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(StoreError::InvalidArgument(format!(
            "page size {} outside {}..={}",
            page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
        )));
    }
    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the open flags (reserved, must be 0)
    pub fn flags(mut self, flags: u32) -> Self {
        self.config.flags = flags;
        self
    }

    /// Set the page size in bytes
    pub fn page_size(mut self, size: u32) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the minimum number of keys per page
    pub fn min_keys_per_page(mut self, count: u32) -> Self {
        self.config.min_keys_per_page = count;
        self
    }

    /// Set the advisory cache budget (in bytes)
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.config.cache_size = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Resolved Layout
// =============================================================================

/// Page geometry derived from a validated config (or from a stored meta page)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub page_size: usize,
    pub min_keys_per_page: u32,
    /// Bytes available to a node body
    pub capacity: usize,
    /// Largest encoded entry kept inline; bigger items go to overflow pages
    pub max_entry: usize,
    /// Page budget of the cache
    pub cache_pages: usize,
    pub cache_size: usize,
}

impl Layout {
    pub fn new(page_size: u32, min_keys_per_page: u32, cache_size: usize) -> Self {
        let page_size = page_size as usize;
        let capacity = page_size - PAGE_HEADER_SIZE;
        let max_entry = (capacity / min_keys_per_page.max(2) as usize)
            .max(MIN_ENTRY_SIZE)
            .min(capacity / 2);

        Self {
            page_size,
            min_keys_per_page,
            capacity,
            max_entry,
            cache_pages: (cache_size / page_size).max(MIN_CACHE_PAGES),
            cache_size,
        }
    }

    /// Same geometry rules, but with the page size and min-keys taken from disk
    pub fn with_stored(self, page_size: u32, min_keys_per_page: u32) -> Self {
        Self::new(page_size, min_keys_per_page, self.cache_size)
    }

    /// Node body size under which a node tries to merge with a sibling
    pub fn underflow(&self) -> usize {
        self.capacity / 4
    }

    /// Payload bytes carried by one overflow page
    pub fn overflow_chunk(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }
}
