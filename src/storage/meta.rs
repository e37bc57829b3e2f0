//! Meta page
//!
//! Page 0 holds the store header: geometry, tree root and counters.

use serde::{Deserialize, Serialize};

use crate::config::check_page_size;
use crate::error::{Result, StoreError};

use super::{PageId, FORMAT_VERSION, MAGIC, META_PAGE, NO_PAGE};

/// Store header persisted in page 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Meta {
    pub magic: [u8; 4],
    pub version: u16,
    pub page_size: u32,
    pub min_keys_per_page: u32,
    /// Root node page
    pub root: PageId,
    /// Number of levels; 1 when the root is a leaf
    pub depth: u32,
    /// Pages in use or on the free list, including the meta page
    pub page_count: u32,
    /// First trunk page of the free list
    pub free_head: PageId,
    /// Pages on the free list, trunk pages included
    pub free_count: u32,
    pub entry_count: u64,
}

impl Meta {
    /// Header for an empty store whose root leaf sits in page 1
    pub fn new(page_size: u32, min_keys_per_page: u32) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            page_size,
            min_keys_per_page,
            root: 1,
            depth: 1,
            page_count: 2,
            free_head: NO_PAGE,
            free_count: 0,
            entry_count: 0,
        }
    }

    /// Encoded length: bincode header + CRC32
    pub fn encoded_len() -> usize {
        // Every field is fixed-width, so any instance gives the same size
        bincode::serialized_size(&Meta::new(0, 0)).map_or(0, |n| n as usize) + 4
    }

    /// Encode into a full page
    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        let mut page = bincode::serialize(self)?;
        let crc = crc32fast::hash(&page);
        page.extend_from_slice(&crc.to_le_bytes());
        page.resize(page_size, 0);
        Ok(page)
    }

    /// Decode and validate from the leading bytes of page 0
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let len = Self::encoded_len();
        if buf.len() < len {
            return Err(StoreError::corruption(META_PAGE, "meta page truncated"));
        }

        let (body, crc_bytes) = buf[..len].split_at(len - 4);
        let mut stored = [0u8; 4];
        stored.copy_from_slice(crc_bytes);
        if u32::from_le_bytes(stored) != crc32fast::hash(body) {
            return Err(StoreError::corruption(META_PAGE, "meta checksum mismatch"));
        }

        let meta: Meta = bincode::deserialize(body)?;
        if meta.magic != MAGIC {
            return Err(StoreError::corruption(
                META_PAGE,
                format!("bad magic {:?}", meta.magic),
            ));
        }
        if meta.version != FORMAT_VERSION {
            return Err(StoreError::corruption(
                META_PAGE,
                format!("unsupported format version {}", meta.version),
            ));
        }
        check_page_size(meta.page_size)
            .map_err(|_| StoreError::corruption(META_PAGE, format!("bad page size {}", meta.page_size)))?;
        if meta.min_keys_per_page < 2 {
            return Err(StoreError::corruption(
                META_PAGE,
                format!("bad min keys per page {}", meta.min_keys_per_page),
            ));
        }
        if meta.root == NO_PAGE || meta.root >= meta.page_count || meta.depth == 0 {
            return Err(StoreError::corruption(
                META_PAGE,
                format!("bad root {} (page count {}, depth {})", meta.root, meta.page_count, meta.depth),
            ));
        }

        Ok(meta)
    }
}
