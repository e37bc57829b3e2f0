//! Page cache
//!
//! Least-recently-used cache of decoded nodes.
//!
//! Dirty nodes are pinned: they are the only copy of buffered mutations, so they stay
//! in memory until the pager writes them at `flush` and marks them clean. Only clean
//! nodes sit in the recency index and are eviction candidates, which makes the
//! capacity a soft limit.

use std::collections::{BTreeMap, HashMap};

use super::{Node, PageId};

struct Slot {
    node: Node,
    dirty: bool,
    tick: u64,
}

/// LRU cache of tree nodes keyed by page id
pub(crate) struct PageCache {
    capacity: usize,
    slots: HashMap<PageId, Slot>,
    /// Clean pages ordered by last use (oldest first)
    recency: BTreeMap<u64, PageId>,
    tick: u64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up a node and move it to the most-recent position
    pub fn get(&mut self, id: PageId) -> Option<&Node> {
        let tick = self.next_tick();
        let slot = self.slots.get_mut(&id)?;
        if !slot.dirty {
            self.recency.remove(&slot.tick);
            self.recency.insert(tick, id);
        }
        slot.tick = tick;
        Some(&slot.node)
    }

    /// Look up a node for modification; it becomes dirty and pinned
    pub fn get_mut(&mut self, id: PageId) -> Option<&mut Node> {
        let tick = self.next_tick();
        let slot = self.slots.get_mut(&id)?;
        if !slot.dirty {
            self.recency.remove(&slot.tick);
            slot.dirty = true;
        }
        slot.tick = tick;
        Some(&mut slot.node)
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Cache a node just read from the stream, making room for it first.
    /// Returns the number of pages evicted.
    pub fn insert_clean(&mut self, id: PageId, node: Node) -> usize {
        self.remove(id);
        let evicted = self.evict_to(self.capacity.saturating_sub(1));
        self.insert(id, node, false);
        evicted
    }

    /// Cache a new or modified node
    pub fn insert_dirty(&mut self, id: PageId, node: Node) {
        self.insert(id, node, true);
    }

    fn insert(&mut self, id: PageId, node: Node, dirty: bool) {
        self.remove(id);
        let tick = self.next_tick();
        if !dirty {
            self.recency.insert(tick, id);
        }
        self.slots.insert(id, Slot { node, dirty, tick });
    }

    /// Drop a node from the cache, dirty or not
    pub fn remove(&mut self, id: PageId) -> Option<Node> {
        let slot = self.slots.remove(&id)?;
        if !slot.dirty {
            self.recency.remove(&slot.tick);
        }
        Some(slot.node)
    }

    /// Evict least-recently-used clean nodes until within capacity
    pub fn evict(&mut self) -> usize {
        self.evict_to(self.capacity)
    }

    fn evict_to(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.slots.len() > limit {
            let Some((_, id)) = self.recency.pop_first() else {
                break; // Everything left is dirty
            };
            self.slots.remove(&id);
            evicted += 1;
        }
        evicted
    }

    /// Dirty nodes in page order, for writing
    pub fn dirty(&self) -> Vec<(PageId, &Node)> {
        let mut dirty: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(id, slot)| (*id, &slot.node))
            .collect();
        dirty.sort_unstable_by_key(|(id, _)| *id);
        dirty
    }

    /// Mark every node clean after a successful write-back
    pub fn mark_all_clean(&mut self) {
        for (id, slot) in self.slots.iter_mut() {
            if slot.dirty {
                slot.dirty = false;
                self.recency.insert(slot.tick, *id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.slots.len() - self.recency.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.recency.clear();
    }
}
