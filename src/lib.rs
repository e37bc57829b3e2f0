//! # btreekv
//!
//! An ordered, persistent key-value store over any seekable byte stream:
//! - Arbitrary byte-string keys and values, ordered bytewise
//! - Paged B+tree with an LRU page cache and overflow pages for large items
//! - Lazy range views in ascending or descending order
//! - Changes buffered in memory until an explicit flush
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store<S>                            │
//! │        get / put / delete / keys / values / items           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Tree     │          │   Cursors   │
//!   │(split/merge)│          │(path stack) │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬───────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │     Pager     │
//!               │ (cache, free  │
//!               │ list, meta)   │
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐
//!               │   Stream S    │
//!               │ (caller-owned)│
//!               └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::io::Cursor;
//! use btreekv::{RangeFlags, Store, Config};
//!
//! let mut store = Store::open(Cursor::new(Vec::new()), Config::default())?;
//! store.put(b"b", b"2")?;
//! store.put(b"a", b"1")?;
//! store.flush()?;
//!
//! let keys: Vec<Vec<u8>> = store
//!     .keys(None, None, RangeFlags::DESCENDING)?
//!     .collect::<btreekv::Result<_>>()?;
//! assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec()]);
//! # Ok::<(), btreekv::StoreError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod flags;
pub mod stream;

mod btree;
mod storage;
mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use btree::{Items, Keys, Values};
pub use config::Config;
pub use error::{ErrorKind, Result, StoreError};
pub use flags::RangeFlags;
pub use storage::PageId;
pub use store::{open, Store, StoreStats, VerifyReport};
pub use stream::Stream;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of btreekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
