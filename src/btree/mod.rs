//! B+tree Module
//!
//! Tree algorithms over the pager and the range cursors built on them.
//!
//! ## Responsibilities
//! - Point search, insert with node splits, delete with sibling merges
//! - Root growth and collapse, keeping every leaf at the same depth
//! - Copy-on-write of the root-to-leaf path before every change
//! - Range cursors walking the leaf level in either direction
//! - Structural verification of a whole tree

mod cursor;
mod tree;

pub use cursor::{Items, Keys, Values};

pub(crate) use cursor::{Cursor, Projection};
pub(crate) use tree::{contains, insert, lookup, remove, verify};
