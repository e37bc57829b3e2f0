//! B+tree algorithms
//!
//! Search, insert with node splitting, delete with sibling merging, and a structural
//! check. All functions work on a [`Pager`]; nodes are sized in encoded bytes rather
//! than entry counts, so a node splits when its body no longer fits in a page.
//!
//! Child `i` of an internal node holds keys `>= separator[i-1]` and `< separator[i]`.
//! Separators are copies of keys (or keys pulled up from a split) and are never
//! rewritten on delete; they only have to keep routing correct.
//!
//! Nodes are copy-on-write: before a change, every node from the root down to the
//! changed leaf is moved to a writable page and its parent re-pointed. Leaves carry
//! no sibling links, so a move never touches a neighbour; leaf order comes from the
//! ancestor path instead ([`adjacent_leaf`]).

use std::collections::HashSet;

use tracing::trace;

use crate::config::Layout;
use crate::error::{Result, StoreError};
use crate::storage::{
    inline_size, item_len, Internal, Item, Leaf, Node, PageId, Pager, CHILD_SIZE, META_PAGE,
    OVERFLOW_ITEM_SIZE,
};
use crate::stream::Stream;

/// Internal nodes visited on the way down: `(page, child index taken)`
pub(crate) type Path = Vec<(PageId, usize)>;

/// Where to land when descending to a leaf
#[derive(Debug, Clone, Copy)]
pub(crate) enum Seek<'k> {
    First,
    Last,
    Key(&'k [u8]),
}

// =============================================================================
// Search
// =============================================================================

/// Value stored under `key`, if any
pub(crate) fn lookup<S: Stream>(pager: &mut Pager<S>, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let (_, leaf_id) = descend(pager, Seek::Key(key))?;
    let leaf = pager.leaf(leaf_id)?;
    Ok(leaf
        .search(key)
        .ok()
        .map(|idx| leaf.entries[idx].1.data.clone()))
}

/// True if `key` is present
pub(crate) fn contains<S: Stream>(pager: &mut Pager<S>, key: &[u8]) -> Result<bool> {
    let (_, leaf_id) = descend(pager, Seek::Key(key))?;
    Ok(pager.leaf(leaf_id)?.search(key).is_ok())
}

/// Leaf reached by `seek`, with the internal nodes passed on the way
pub(crate) fn descend<S: Stream>(pager: &mut Pager<S>, seek: Seek<'_>) -> Result<(Path, PageId)> {
    let depth = pager.meta().depth;
    let mut id = pager.root();
    let mut path = Vec::with_capacity(depth as usize);

    for _ in 1..depth {
        let internal = pager.internal(id)?;
        let idx = match seek {
            Seek::First => 0,
            Seek::Last => internal.fanout() - 1,
            Seek::Key(key) => internal.child_index(key),
        };
        let child = internal
            .child(idx)
            .ok_or_else(|| StoreError::corruption(id, format!("missing child {}", idx)))?;
        path.push((id, idx));
        id = child;
    }

    Ok((path, id))
}

/// Move `path` to the leaf after the one it leads to (before it, when `descending`).
/// Returns `None` past the last leaf.
pub(crate) fn adjacent_leaf<S: Stream>(
    pager: &mut Pager<S>,
    path: &mut Path,
    descending: bool,
) -> Result<Option<PageId>> {
    // Climb to the nearest ancestor with another child on that side
    let mut id = loop {
        let Some((parent, idx)) = path.pop() else {
            return Ok(None);
        };
        let internal = pager.internal(parent)?;
        let sibling = if descending {
            idx.checked_sub(1)
        } else {
            Some(idx + 1).filter(|&i| i < internal.fanout())
        };
        if let Some(sibling) = sibling {
            let child = internal
                .child(sibling)
                .ok_or_else(|| StoreError::corruption(parent, format!("missing child {}", sibling)))?;
            path.push((parent, sibling));
            break child;
        }
    };

    // and come back down along the near edge of that subtree
    let leaf_level = (pager.meta().depth as usize).saturating_sub(1);
    while path.len() < leaf_level {
        let internal = pager.internal(id)?;
        let idx = if descending { internal.fanout() - 1 } else { 0 };
        let child = internal
            .child(idx)
            .ok_or_else(|| StoreError::corruption(id, format!("missing child {}", idx)))?;
        path.push((id, idx));
        id = child;
    }
    Ok(Some(id))
}

/// Make the nodes on `path` and the leaf below them writable, updating `path` in place.
/// Returns the leaf's new page.
fn make_writable<S: Stream>(pager: &mut Pager<S>, path: &mut Path, leaf: PageId) -> Result<PageId> {
    let mut parent = None;
    for step in path.iter_mut() {
        step.0 = relocate_child(pager, parent, step.0)?;
        parent = Some(*step);
    }
    relocate_child(pager, parent, leaf)
}

/// Make child `id` of `parent` (the root when `None`) writable and re-point the parent
fn relocate_child<S: Stream>(
    pager: &mut Pager<S>,
    parent: Option<(PageId, usize)>,
    id: PageId,
) -> Result<PageId> {
    let moved = pager.relocate(id)?;
    if moved != id {
        match parent {
            Some((parent, idx)) => {
                if !pager.internal_mut(parent)?.set_child(idx, moved) {
                    return Err(StoreError::corruption(parent, format!("missing child {}", idx)));
                }
            }
            None => pager.meta_mut().root = moved,
        }
    }
    Ok(moved)
}

// =============================================================================
// Insert
// =============================================================================

/// Insert or replace. Returns true when the key is new.
pub(crate) fn insert<S: Stream>(pager: &mut Pager<S>, key: &[u8], value: &[u8]) -> Result<bool> {
    let layout = *pager.layout();
    item_len(key.len())?;
    item_len(value.len())?;

    let (mut path, leaf_id) = descend(pager, Seek::Key(key))?;
    let leaf_id = make_writable(pager, &mut path, leaf_id)?;
    let (key_spill, value_spill) = entry_spill(&layout, key.len(), value.len());

    let found = pager.leaf(leaf_id)?.search(key);
    let inserted = match found {
        Ok(idx) => {
            let key_overflowed = pager.leaf(leaf_id)?.entries[idx].0.overflow.is_some();

            let new_value = pager.make_item(value.to_vec(), value_spill)?;
            let new_key = if key_overflowed == key_spill {
                None
            } else {
                Some(pager.make_item(key.to_vec(), key_spill)?)
            };

            let entry = &mut pager.leaf_mut(leaf_id)?.entries[idx];
            let old_value = std::mem::replace(&mut entry.1, new_value);
            let old_key = new_key.map(|k| std::mem::replace(&mut entry.0, k));

            pager.free_item(&old_value)?;
            if let Some(old_key) = old_key {
                pager.free_item(&old_key)?;
            }
            false
        }
        Err(idx) => {
            let key_item = pager.make_item(key.to_vec(), key_spill)?;
            let value_item = pager.make_item(value.to_vec(), value_spill)?;
            pager.leaf_mut(leaf_id)?.entries.insert(idx, (key_item, value_item));
            pager.meta_mut().entry_count += 1;
            true
        }
    };

    split_upwards(pager, path, leaf_id)?;
    Ok(inserted)
}

/// Which sides of an entry go to overflow pages.
///
/// Both stay inline when they fit the entry budget together; otherwise the larger one
/// spills first, then the other if the pair still does not fit.
fn entry_spill(layout: &Layout, key_len: usize, value_len: usize) -> (bool, bool) {
    let budget = layout.max_entry;
    let key = inline_size(key_len);
    let value = inline_size(value_len);

    if key + value <= budget {
        (false, false)
    } else if key_len >= value_len {
        (true, OVERFLOW_ITEM_SIZE + value > budget)
    } else {
        (key + OVERFLOW_ITEM_SIZE > budget, true)
    }
}

/// Whether a separator of `key_len` bytes must spill
fn separator_spill(layout: &Layout, key_len: usize) -> bool {
    inline_size(key_len) + CHILD_SIZE > layout.max_entry
}

/// Split `id` and its ancestors for as long as they exceed the page capacity
fn split_upwards<S: Stream>(pager: &mut Pager<S>, mut path: Path, mut id: PageId) -> Result<()> {
    let capacity = pager.layout().capacity;

    loop {
        if pager.node(id)?.size() <= capacity {
            return Ok(());
        }

        let (separator, right) = split_node(pager, id)?;

        match path.pop() {
            Some((parent, idx)) => {
                pager.internal_mut(parent)?.entries.insert(idx, (separator, right));
                id = parent;
            }
            None => {
                let root = pager.alloc()?;
                pager.insert_node(
                    root,
                    Node::Internal(Internal {
                        first: id,
                        entries: vec![(separator, right)],
                    }),
                );
                let meta = pager.meta_mut();
                meta.root = root;
                meta.depth += 1;
                trace!(root, depth = meta.depth, "root split");
                return Ok(());
            }
        }
    }
}

/// Move the upper half of `id` into a new page. Returns the separator for the parent
/// and the new page.
fn split_node<S: Stream>(pager: &mut Pager<S>, id: PageId) -> Result<(Item, PageId)> {
    let layout = *pager.layout();

    // Allocate everything first so a failure leaves the node untouched
    let (at, leaf_separator) = match pager.node(id)? {
        Node::Leaf(leaf) => {
            let sizes: Vec<usize> = leaf
                .entries
                .iter()
                .map(|(k, v)| k.encoded_size() + v.encoded_size())
                .collect();
            let at = balanced_split(&sizes, 1..sizes.len(), false);
            (at, Some(leaf.entries[at].0.data.clone()))
        }
        Node::Internal(internal) => {
            let sizes: Vec<usize> = internal
                .entries
                .iter()
                .map(|(k, _)| k.encoded_size() + CHILD_SIZE)
                .collect();
            (balanced_split(&sizes, 0..sizes.len(), true), None)
        }
    };
    let right_id = pager.alloc()?;
    let leaf_separator = match leaf_separator {
        Some(key) => {
            let spill = separator_spill(&layout, key.len());
            match pager.make_item(key, spill) {
                Ok(item) => Some(item),
                Err(e) => {
                    pager.release(right_id);
                    return Err(e);
                }
            }
        }
        None => None,
    };

    let (right, separator) = match (pager.node_mut(id)?, leaf_separator) {
        (Node::Leaf(left), Some(separator)) => {
            let right = Leaf {
                entries: left.entries.split_off(at),
            };
            (Node::Leaf(right), separator)
        }
        (Node::Internal(left), None) => {
            let mut upper = left.entries.split_off(at);
            let (separator, first) = upper.remove(0);
            (
                Node::Internal(Internal {
                    first,
                    entries: upper,
                }),
                separator,
            )
        }
        _ => return Err(StoreError::corruption(id, "node changed kind during split")),
    };

    trace!(left = id, right = right_id, right_bytes = right.size(), "split node");
    pager.insert_node(right_id, right);
    Ok((separator, right_id))
}

/// Split index that keeps the larger half as small as possible.
///
/// With `moves_up`, the entry at the split index goes to the parent and belongs to
/// neither half (internal nodes); otherwise it starts the right half (leaves).
fn balanced_split(sizes: &[usize], candidates: std::ops::Range<usize>, moves_up: bool) -> usize {
    let total: usize = sizes.iter().sum();
    let mut prefix: usize = sizes[..candidates.start].iter().sum();
    let mut best = (usize::MAX, candidates.start);

    for at in candidates {
        let middle = if moves_up { sizes[at] } else { 0 };
        let worst = prefix.max(total - prefix - middle);
        if worst < best.0 {
            best = (worst, at);
        }
        prefix += sizes[at];
    }
    best.1
}

// =============================================================================
// Delete
// =============================================================================

/// Remove `key`. Returns false when it was absent.
pub(crate) fn remove<S: Stream>(pager: &mut Pager<S>, key: &[u8]) -> Result<bool> {
    let (mut path, leaf_id) = descend(pager, Seek::Key(key))?;
    let idx = match pager.leaf(leaf_id)?.search(key) {
        Ok(idx) => idx,
        Err(_) => return Ok(false),
    };
    let leaf_id = make_writable(pager, &mut path, leaf_id)?;

    let (old_key, old_value) = pager.leaf_mut(leaf_id)?.entries.remove(idx);
    pager.free_item(&old_key)?;
    pager.free_item(&old_value)?;
    let meta = pager.meta_mut();
    meta.entry_count = meta.entry_count.saturating_sub(1);

    let underflow = pager.layout().underflow();
    let mut id = leaf_id;
    while let Some((parent, idx)) = path.pop() {
        if pager.node(id)?.size() >= underflow || !merge_child(pager, parent, idx)? {
            break;
        }
        id = parent;
    }

    collapse_root(pager)?;
    Ok(true)
}

/// Merge child `idx` of `parent` with an adjacent sibling (the left one, or the right
/// one for the first child). Returns false when there is no sibling or the result
/// would not fit in a page.
fn merge_child<S: Stream>(pager: &mut Pager<S>, parent: PageId, idx: usize) -> Result<bool> {
    let capacity = pager.layout().capacity;

    let (left_idx, left_id, right_id, separator_size) = {
        let internal = pager.internal(parent)?;
        if internal.fanout() < 2 {
            return Ok(false);
        }
        let left_idx = idx.saturating_sub(1);
        let missing = || StoreError::corruption(parent, format!("missing child {}", left_idx + 1));
        let left = internal.child(left_idx).ok_or_else(missing)?;
        let right = internal.child(left_idx + 1).ok_or_else(missing)?;
        (left_idx, left, right, internal.entries[left_idx].0.encoded_size())
    };

    let left_size = pager.node(left_id)?.size();
    let right_node = pager.node(right_id)?;
    let (right_size, right_is_leaf) = (right_node.size(), matches!(right_node, Node::Leaf(_)));
    let merged = if right_is_leaf {
        left_size + right_size
    } else {
        left_size + right_size + separator_size
    };
    if merged > capacity {
        return Ok(false);
    }

    let left_id = relocate_child(pager, Some((parent, left_idx)), left_id)?;
    let right = pager.take_node(right_id)?;
    let (separator, _) = pager.internal_mut(parent)?.entries.remove(left_idx);

    let orphan = match (pager.node_mut(left_id)?, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            left.entries.extend(right.entries);
            Some(separator)
        }
        (Node::Internal(left), Node::Internal(right)) => {
            left.entries.push((separator, right.first));
            left.entries.extend(right.entries);
            None
        }
        _ => return Err(StoreError::corruption(parent, "siblings at different levels")),
    };

    if let Some(separator) = orphan {
        pager.free_item(&separator)?;
    }

    trace!(parent, left = left_id, right = right_id, bytes = merged, "merged nodes");
    Ok(true)
}

/// Replace an internal root that has a single child with that child
fn collapse_root<S: Stream>(pager: &mut Pager<S>) -> Result<()> {
    loop {
        let root = pager.root();
        let child = match pager.node(root)? {
            Node::Internal(internal) if internal.entries.is_empty() => internal.first,
            _ => return Ok(()),
        };

        pager.take_node(root)?;
        let meta = pager.meta_mut();
        meta.root = child;
        meta.depth = meta.depth.saturating_sub(1).max(1);
        trace!(root = child, depth = meta.depth, "root collapsed");
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Shape of a tree that passed [`verify`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TreeSummary {
    pub entries: u64,
    pub leaf_pages: u32,
    pub internal_pages: u32,
    pub overflow_pages: u32,
    pub free_pages: u32,
}

struct Walk {
    depth: u32,
    capacity: usize,
    summary: TreeSummary,
    /// Every page claimed so far by a node, an overflow chain or the free list
    pages: HashSet<PageId>,
}

impl Walk {
    fn claim(&mut self, id: PageId) -> Result<()> {
        if self.pages.insert(id) {
            Ok(())
        } else {
            Err(StoreError::corruption(id, "page used twice"))
        }
    }

    fn claim_item<S: Stream>(&mut self, pager: &mut Pager<S>, item: &Item) -> Result<()> {
        if let Some(first) = item.overflow {
            for id in pager.overflow_pages(first)? {
                self.claim(id)?;
                self.summary.overflow_pages += 1;
            }
        }
        Ok(())
    }
}

/// Walk the whole tree and check its structural invariants, then check that every
/// page of the stream is either in the tree or on the free list
pub(crate) fn verify<S: Stream>(pager: &mut Pager<S>) -> Result<TreeSummary> {
    let mut walk = Walk {
        depth: pager.meta().depth,
        capacity: pager.layout().capacity,
        summary: TreeSummary::default(),
        pages: HashSet::new(),
    };

    let root = pager.root();
    verify_node(pager, &mut walk, root, 1, None, None)?;

    let expected = pager.meta().entry_count;
    if walk.summary.entries != expected {
        return Err(StoreError::corruption(
            pager.root(),
            format!("tree holds {} entries, header says {}", walk.summary.entries, expected),
        ));
    }

    let unused = pager.unused_pages()?;
    walk.summary.free_pages = unused.len() as u32;
    for id in unused {
        walk.claim(id)?;
    }

    let page_count = pager.meta().page_count;
    let accounted = walk.pages.len() as u64 + 1;
    if accounted != page_count as u64 {
        return Err(StoreError::corruption(
            META_PAGE,
            format!("{} pages accounted for, page count {}", accounted, page_count),
        ));
    }
    Ok(walk.summary)
}

fn verify_node<S: Stream>(
    pager: &mut Pager<S>,
    walk: &mut Walk,
    id: PageId,
    level: u32,
    low: Option<&[u8]>,
    high: Option<&[u8]>,
) -> Result<()> {
    walk.claim(id)?;
    let node = pager.node(id)?.clone();
    if node.size() > walk.capacity {
        return Err(StoreError::corruption(id, "node exceeds page capacity"));
    }

    let in_bounds = |key: &[u8]| low.map_or(true, |l| key >= l) && high.map_or(true, |h| key < h);

    match node {
        Node::Leaf(leaf) => {
            if level != walk.depth {
                return Err(StoreError::corruption(
                    id,
                    format!("leaf at level {}, tree depth {}", level, walk.depth),
                ));
            }
            check_ascending(id, leaf.entries.iter().map(|(k, _)| k.as_slice()))?;
            if let Some((k, _)) = leaf.entries.iter().find(|(k, _)| !in_bounds(k.as_slice())) {
                return Err(StoreError::corruption(
                    id,
                    format!("key {:?} outside its parent's range", k.data),
                ));
            }
            for (key, value) in &leaf.entries {
                walk.claim_item(pager, key)?;
                walk.claim_item(pager, value)?;
            }

            walk.summary.entries += leaf.entries.len() as u64;
            walk.summary.leaf_pages += 1;
        }
        Node::Internal(internal) => {
            if level >= walk.depth {
                return Err(StoreError::corruption(
                    id,
                    format!("internal node at level {}, tree depth {}", level, walk.depth),
                ));
            }
            check_ascending(id, internal.entries.iter().map(|(k, _)| k.as_slice()))?;
            if let Some((k, _)) = internal.entries.iter().find(|(k, _)| !in_bounds(k.as_slice())) {
                return Err(StoreError::corruption(
                    id,
                    format!("separator {:?} outside its parent's range", k.data),
                ));
            }
            for (key, _) in &internal.entries {
                walk.claim_item(pager, key)?;
            }
            walk.summary.internal_pages += 1;

            for idx in 0..internal.fanout() {
                let child = internal
                    .child(idx)
                    .ok_or_else(|| StoreError::corruption(id, format!("missing child {}", idx)))?;
                let child_low = match idx {
                    0 => low,
                    i => Some(internal.entries[i - 1].0.as_slice()),
                };
                let child_high = match internal.entries.get(idx) {
                    Some((k, _)) => Some(k.as_slice()),
                    None => high,
                };
                verify_node(pager, walk, child, level + 1, child_low, child_high)?;
            }
        }
    }
    Ok(())
}

fn check_ascending<'k>(id: PageId, mut keys: impl Iterator<Item = &'k [u8]>) -> Result<()> {
    let Some(mut prev) = keys.next() else {
        return Ok(());
    };
    for key in keys {
        if key <= prev {
            return Err(StoreError::corruption(id, "keys out of order"));
        }
        prev = key;
    }
    Ok(())
}
