//! Storage Module
//!
//! Paged on-stream format and the pager that caches it.
//!
//! ## Responsibilities
//! - Fixed-size pages addressed by page number (`offset = id * page_size`)
//! - Encode/decode tree nodes with per-page CRC32
//! - Overflow chains for keys and values too large to sit in a node
//! - Free-page reuse through a free list of trunk pages
//! - LRU cache of decoded nodes; dirty nodes are held until `flush`
//! - Copy-on-write: pages reachable from the stored meta page are never overwritten
//!   before the next meta page is written
//!
//! ## Stream Layout
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Page 0: Meta                                               │
//! │   bincode(Meta) | CRC32 (4) | zero padding                 │
//! ├────────────────────────────────────────────────────────────┤
//! │ Page 1..n: Node / Overflow / Free                          │
//! │ ┌──────┬──────┬─────────┬─────────┬─────────┬──────────┐   │
//! │ │Kind 1│Rsv 1 │Count (2)│ Rsv (4) │Next (4) │ CRC (4)  │   │
//! │ └──────┴──────┴─────────┴─────────┴─────────┴──────────┘   │
//! │   Leaf body:     [key item][value item] × count            │
//! │   Internal body: first child (4) [key item][child (4)] × n │
//! │   Overflow body: count payload bytes, next = next chunk    │
//! │   Free body:     free page ids (4) × count, next = trunk   │
//! └────────────────────────────────────────────────────────────┘
//!
//! Item:  tag 0 | len (4) | bytes          (inline)
//!        tag 1 | len (4) | first page (4) (overflow chain)
//! ```
//!
//! All integers are little-endian.

mod cache;
mod meta;
mod page;
mod pager;

pub(crate) use meta::Meta;
pub(crate) use page::{
    inline_size, item_len, Internal, Item, Leaf, Node, CHILD_SIZE, OVERFLOW_ITEM_SIZE,
};
pub(crate) use pager::{Pager, PagerStats};

/// Page number within the stream
pub type PageId = u32;

/// Null page reference (page 0 is always the meta page, never a node)
pub(crate) const NO_PAGE: PageId = 0;

/// Page number of the meta page
pub(crate) const META_PAGE: PageId = 0;

/// Magic bytes identifying a btreekv stream
pub(crate) const MAGIC: [u8; 4] = *b"BTKV";

/// Current on-stream format version
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Page header: Kind (1) + Reserved (1) + Count (2) + Reserved (4) + Next (4) + CRC (4)
pub(crate) const PAGE_HEADER_SIZE: usize = 16;

/// Byte range of the CRC inside the page header
pub(crate) const CRC_RANGE: std::ops::Range<usize> = 12..16;
