//! Pager
//!
//! Owns the stream and mediates every page access.
//!
//! ## Responsibilities
//! - Read and decode node pages on demand, through the LRU cache
//! - Hold mutated nodes and new overflow pages until `flush`
//! - Allocate pages (free list first, then growth)
//! - Write everything back at `flush`, meta page last
//!
//! ## Copy-on-write
//! Pages reachable from the meta page on the stream are never written. A node moves to
//! a fresh page before its first change after a flush ([`Pager::relocate`]), and pages
//! given up since the last flush join the free list only once the next meta page is on
//! the stream. Writing the meta page is the commit point: until it succeeds the stream
//! holds the last successful flush intact, whichever writes before it failed.

use std::collections::{BTreeMap, HashSet};
use std::io;

use tracing::{debug, trace};

use crate::config::{Config, Layout};
use crate::error::{Result, StoreError};
use crate::stream::Stream;

use super::cache::PageCache;
use super::page::{self, RawItem, RawNode};
use super::{Internal, Item, Leaf, Meta, Node, PageId, META_PAGE, NO_PAGE};

/// Counters describing the pager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PagerStats {
    pub page_size: usize,
    pub page_count: u32,
    pub free_pages: u32,
    pub cached_pages: usize,
    pub dirty_pages: usize,
}

/// Page-level access to a store's stream
pub(crate) struct Pager<S: Stream> {
    stream: S,
    layout: Layout,
    meta: Meta,
    meta_dirty: bool,
    cache: PageCache,
    /// Encoded overflow pages waiting for the next flush
    pending: BTreeMap<PageId, Vec<u8>>,
    /// Pages handed out since the last flush; nothing on the stream refers to them
    fresh: HashSet<PageId>,
    /// Pages that can be handed out now
    free: Vec<PageId>,
    /// Trunk pages of the stored free list
    trunks: Vec<PageId>,
    /// Whether the stored free list has been read into `free` and `trunks`
    free_loaded: bool,
    /// Stored pages given up since the last flush; free once the next meta page is written
    retired: Vec<PageId>,
    closed: bool,
}

/// Free list and header to write at the next commit
struct FreePlan {
    meta: Meta,
    listed: Vec<PageId>,
    trunks: Vec<PageId>,
    pages: Vec<(PageId, Vec<u8>)>,
}

impl<S: Stream> Pager<S> {
    /// Open over `stream`, initializing an empty store if the stream is empty
    ///
    /// Only the meta page is read here; node pages are read when first touched.
    pub fn open(mut stream: S, config: &Config) -> Result<Self> {
        let requested = config.resolve()?;
        let stream_len = stream.size()?;

        if stream_len == 0 {
            let meta = Meta::new(requested.page_size as u32, requested.min_keys_per_page);
            let mut cache = PageCache::new(requested.cache_pages);
            cache.insert_dirty(meta.root, Node::Leaf(Leaf::default()));
            let fresh = HashSet::from([meta.root]);

            debug!(
                page_size = requested.page_size,
                min_keys_per_page = requested.min_keys_per_page,
                cache_pages = requested.cache_pages,
                "initializing empty store"
            );

            return Ok(Self {
                stream,
                layout: requested,
                meta,
                meta_dirty: true,
                cache,
                pending: BTreeMap::new(),
                fresh,
                free: Vec::new(),
                trunks: Vec::new(),
                free_loaded: true,
                retired: Vec::new(),
                closed: false,
            });
        }

        let mut header = vec![0u8; Meta::encoded_len()];
        stream.read_exact_at(0, &mut header)?;
        let meta = Meta::decode(&header)?;

        if config.page_size != 0 && config.page_size != meta.page_size {
            debug!(
                requested = config.page_size,
                stored = meta.page_size,
                "using the stored page size"
            );
        }
        let layout = requested.with_stored(meta.page_size, meta.min_keys_per_page);

        debug!(
            page_size = layout.page_size,
            min_keys_per_page = layout.min_keys_per_page,
            entries = meta.entry_count,
            depth = meta.depth,
            pages = meta.page_count,
            "opened existing store"
        );

        Ok(Self {
            stream,
            cache: PageCache::new(layout.cache_pages),
            layout,
            meta,
            meta_dirty: false,
            pending: BTreeMap::new(),
            fresh: HashSet::new(),
            free: Vec::new(),
            trunks: Vec::new(),
            free_loaded: false,
            retired: Vec::new(),
            closed: false,
        })
    }

    // =========================================================================
    // Header Access
    // =========================================================================

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Mutable header access; the meta page will be rewritten at the next flush
    pub fn meta_mut(&mut self) -> &mut Meta {
        self.meta_dirty = true;
        &mut self.meta
    }

    pub fn root(&self) -> PageId {
        self.meta.root
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    /// Read-only access to a node, loading it if needed
    pub fn node(&mut self, id: PageId) -> Result<&Node> {
        self.ensure_cached(id)?;
        self.cache
            .get(id)
            .ok_or_else(|| StoreError::corruption(id, "page missing from cache after load"))
    }

    /// Mutable access to a node; the node is written at the next flush.
    /// Only pages returned by [`Pager::relocate`] or [`Pager::alloc`] may be changed.
    pub fn node_mut(&mut self, id: PageId) -> Result<&mut Node> {
        debug_assert!(self.fresh.contains(&id), "page {} changed in place", id);
        self.ensure_cached(id)?;
        self.cache
            .get_mut(id)
            .ok_or_else(|| StoreError::corruption(id, "page missing from cache after load"))
    }

    pub fn leaf(&mut self, id: PageId) -> Result<&Leaf> {
        match self.node(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(StoreError::corruption(id, "expected a leaf, found an internal node")),
        }
    }

    pub fn leaf_mut(&mut self, id: PageId) -> Result<&mut Leaf> {
        match self.node_mut(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(StoreError::corruption(id, "expected a leaf, found an internal node")),
        }
    }

    pub fn internal(&mut self, id: PageId) -> Result<&Internal> {
        match self.node(id)? {
            Node::Internal(internal) => Ok(internal),
            Node::Leaf(_) => Err(StoreError::corruption(id, "expected an internal node, found a leaf")),
        }
    }

    pub fn internal_mut(&mut self, id: PageId) -> Result<&mut Internal> {
        match self.node_mut(id)? {
            Node::Internal(internal) => Ok(internal),
            Node::Leaf(_) => Err(StoreError::corruption(id, "expected an internal node, found a leaf")),
        }
    }

    /// Place a new node in a page from [`Pager::alloc`]
    pub fn insert_node(&mut self, id: PageId, node: Node) {
        self.cache.insert_dirty(id, node);
    }

    /// Remove a node from the pager and release its page
    pub fn take_node(&mut self, id: PageId) -> Result<Node> {
        self.ensure_cached(id)?;
        let node = self
            .cache
            .remove(id)
            .ok_or_else(|| StoreError::corruption(id, "page missing from cache after load"))?;
        self.release(id);
        Ok(node)
    }

    /// Make the node in `id` writable, returning the page it now lives in.
    ///
    /// A node that is still stored on the stream moves to a fresh page and its old page
    /// is retired; the caller points the parent (or the root) at the new page.
    pub fn relocate(&mut self, id: PageId) -> Result<PageId> {
        if self.fresh.contains(&id) {
            return Ok(id);
        }
        self.ensure_cached(id)?;
        let new_id = self.alloc()?;
        let Some(node) = self.cache.remove(id) else {
            self.release(new_id);
            return Err(StoreError::corruption(id, "page missing from cache after load"));
        };
        self.cache.insert_dirty(new_id, node);
        self.retired.push(id);
        trace!(from = id, to = new_id, "relocated page");
        Ok(new_id)
    }

    fn ensure_cached(&mut self, id: PageId) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.cache.contains(id) {
            return Ok(());
        }

        let node = self.load(id)?;
        let evicted = self.cache.insert_clean(id, node);
        if evicted > 0 {
            trace!(page = id, evicted, "cache eviction");
        }
        Ok(())
    }

    fn load(&mut self, id: PageId) -> Result<Node> {
        let page = self.read_page(id)?;
        match page::decode_node(id, &page)? {
            RawNode::Leaf { entries } => {
                let mut resolved = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    resolved.push((self.resolve(key)?, self.resolve(value)?));
                }
                Ok(Node::Leaf(Leaf { entries: resolved }))
            }
            RawNode::Internal { first, entries } => {
                let mut resolved = Vec::with_capacity(entries.len());
                for (key, child) in entries {
                    resolved.push((self.resolve(key)?, child));
                }
                Ok(Node::Internal(Internal {
                    first,
                    entries: resolved,
                }))
            }
        }
    }

    fn resolve(&mut self, raw: RawItem) -> Result<Item> {
        match raw {
            RawItem::Inline(data) => Ok(Item::inline(data)),
            RawItem::Overflow { len, first } => Ok(Item {
                data: self.read_overflow(first, len as usize)?,
                overflow: Some(first),
            }),
        }
    }

    fn read_page(&mut self, id: PageId) -> Result<Vec<u8>> {
        if id == META_PAGE || id >= self.meta.page_count {
            return Err(StoreError::corruption(
                id,
                format!("page reference out of range (page count {})", self.meta.page_count),
            ));
        }
        if let Some(page) = self.pending.get(&id) {
            return Ok(page.clone());
        }

        let offset = self.offset(id);
        let mut page = vec![0u8; self.layout.page_size];
        self.stream.read_exact_at(offset, &mut page)?;
        Ok(page)
    }

    fn offset(&self, id: PageId) -> u64 {
        id as u64 * self.layout.page_size as u64
    }

    // =========================================================================
    // Items and Overflow Chains
    // =========================================================================

    /// Wrap `data` as an item, moving it to an overflow chain when `spill` is set
    pub fn make_item(&mut self, data: Vec<u8>, spill: bool) -> Result<Item> {
        if !spill {
            return Ok(Item::inline(data));
        }
        let first = self.write_overflow(&data)?;
        Ok(Item {
            data,
            overflow: Some(first),
        })
    }

    /// Release the overflow chain owned by `item`, if any
    pub fn free_item(&mut self, item: &Item) -> Result<()> {
        match item.overflow {
            Some(first) => {
                for id in self.overflow_pages(first)? {
                    self.release(id);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Pages of the overflow chain starting at `first`, in chain order
    pub fn overflow_pages(&mut self, first: PageId) -> Result<Vec<PageId>> {
        let mut pages = Vec::new();
        let mut id = first;

        while id != NO_PAGE {
            if pages.len() as u32 >= self.meta.page_count {
                return Err(StoreError::corruption(first, "overflow chain loops"));
            }
            let page = self.read_page(id)?;
            let (_, next) = page::decode_overflow(id, &page)?;
            pages.push(id);
            id = next;
        }
        Ok(pages)
    }

    fn write_overflow(&mut self, data: &[u8]) -> Result<PageId> {
        let chunk_size = self.layout.overflow_chunk();
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(chunk_size).collect()
        };

        let mut ids = Vec::with_capacity(chunks.len());
        for _ in 0..chunks.len() {
            match self.alloc() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        self.release(id);
                    }
                    return Err(e);
                }
            }
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let next = ids.get(i + 1).copied().unwrap_or(NO_PAGE);
            let encoded = page::encode_overflow(chunk, next, self.layout.page_size);
            self.pending.insert(ids[i], encoded);
        }

        trace!(first = ids[0], pages = ids.len(), bytes = data.len(), "wrote overflow chain");
        Ok(ids[0])
    }

    fn read_overflow(&mut self, first: PageId, len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        let mut id = first;
        let mut hops = 0u32;

        loop {
            if id == NO_PAGE {
                return Err(StoreError::corruption(
                    first,
                    format!("overflow chain ended after {} of {} bytes", data.len(), len),
                ));
            }
            hops += 1;
            if hops > self.meta.page_count {
                return Err(StoreError::corruption(first, "overflow chain loops"));
            }

            let page = self.read_page(id)?;
            let (chunk, next) = page::decode_overflow(id, &page)?;
            data.extend_from_slice(&chunk);

            if data.len() >= len {
                break;
            }
            id = next;
        }

        if data.len() != len {
            return Err(StoreError::corruption(
                first,
                format!("overflow chain holds {} bytes, expected {}", data.len(), len),
            ));
        }
        Ok(data)
    }

    // =========================================================================
    // Page Allocation
    // =========================================================================

    /// Hand out a page for new content: a free page if there is one, else a new page
    pub fn alloc(&mut self) -> Result<PageId> {
        if self.free.is_empty() {
            self.load_free_list()?;
        }
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = self.meta.page_count;
                self.meta_mut().page_count = next_page(id)?;
                id
            }
        };
        self.fresh.insert(id);
        Ok(id)
    }

    /// Give a page back; its contents are discarded
    pub fn release(&mut self, id: PageId) {
        self.cache.remove(id);
        self.pending.remove(&id);
        if self.fresh.remove(&id) {
            self.free.push(id);
        } else {
            self.retired.push(id);
        }
    }

    /// Read the stored free list, once
    fn load_free_list(&mut self) -> Result<()> {
        if self.free_loaded {
            return Ok(());
        }

        let head = self.meta.free_head;
        let mut listed = Vec::with_capacity(self.meta.free_count as usize);
        let mut trunks = Vec::new();
        let mut id = head;
        while id != NO_PAGE {
            if trunks.len() as u32 >= self.meta.page_count {
                return Err(StoreError::corruption(head, "free list loops"));
            }
            let page = self.read_page(id)?;
            let (pages, next) = page::decode_trunk(id, &page)?;
            trunks.push(id);
            listed.extend(pages);
            id = next;
        }

        let found = listed.len() + trunks.len();
        if found != self.meta.free_count as usize {
            return Err(StoreError::corruption(
                head,
                format!("free list holds {} pages, header says {}", found, self.meta.free_count),
            ));
        }
        if let Some(bad) = listed
            .iter()
            .find(|&&id| id == META_PAGE || id >= self.meta.page_count)
        {
            return Err(StoreError::corruption(head, format!("free list names page {}", bad)));
        }

        trace!(free = listed.len(), trunks = trunks.len(), "loaded free list");
        listed.append(&mut self.free);
        self.free = listed;
        self.trunks = trunks;
        self.free_loaded = true;
        Ok(())
    }

    /// Every page not holding tree data: free pages, retired pages and free-list trunks
    pub fn unused_pages(&mut self) -> Result<Vec<PageId>> {
        self.load_free_list()?;
        Ok(self
            .free
            .iter()
            .chain(&self.retired)
            .chain(&self.trunks)
            .copied()
            .collect())
    }

    // =========================================================================
    // Write-back
    // =========================================================================

    /// True when something is waiting to be written
    pub fn is_dirty(&self) -> bool {
        self.meta_dirty
            || self.cache.dirty_count() > 0
            || !self.pending.is_empty()
            || !self.retired.is_empty()
    }

    /// Write all buffered state to the stream. Returns false when there was nothing to do.
    ///
    /// Nodes, overflow pages and the new free list go to pages nothing on the stream
    /// refers to; the meta page goes last. A failure before the meta page is written
    /// leaves the stream at the previous flush and the pager unchanged, so the flush
    /// can be retried.
    pub fn flush(&mut self) -> Result<bool> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if !self.is_dirty() {
            return Ok(false);
        }
        self.load_free_list()?;

        let page_size = self.layout.page_size;
        let offset = |id: PageId| id as u64 * page_size as u64;
        let plan = self.plan_free_list()?;

        let dirty = self.cache.dirty();
        let node_pages = dirty.len();
        for (id, node) in dirty {
            debug_assert!(self.fresh.contains(&id), "stored page {} is dirty", id);
            let encoded = node.encode(id, page_size)?;
            self.stream.write_all_at(offset(id), &encoded)?;
        }

        let overflow_pages = self.pending.len();
        for (id, encoded) in &self.pending {
            self.stream.write_all_at(offset(*id), encoded)?;
        }
        for (id, encoded) in &plan.pages {
            self.stream.write_all_at(offset(*id), encoded)?;
        }
        self.stream.flush()?;

        let header = plan.meta.encode(page_size)?;
        self.stream.write_all_at(0, &header)?;

        let retired = self.retired.len();
        self.commit(plan);
        self.stream.flush()?;
        let evicted = self.cache.evict();

        debug!(
            node_pages,
            overflow_pages,
            retired,
            free = self.free.len(),
            evicted,
            entries = self.meta.entry_count,
            "flushed store"
        );
        Ok(true)
    }

    /// Lay out the free list the next meta page will point to: every free page plus the
    /// pages retired since the last flush and the old trunk pages. The new trunk pages
    /// come from pages that are already free on the stream, or from growing the file.
    fn plan_free_list(&self) -> Result<FreePlan> {
        let capacity = page::trunk_capacity(self.layout.page_size);
        let mut available = self.free.clone();
        let mut reclaimed: Vec<PageId> = self.retired.iter().chain(&self.trunks).copied().collect();
        let mut page_count = self.meta.page_count;

        let mut trunks = Vec::new();
        while trunks.len() * capacity < available.len() + reclaimed.len() {
            match available.pop() {
                Some(id) => trunks.push(id),
                None => {
                    trunks.push(page_count);
                    page_count = next_page(page_count)?;
                }
            }
        }

        let mut listed = available;
        listed.append(&mut reclaimed);

        let mut pages = Vec::with_capacity(trunks.len());
        for (i, id) in trunks.iter().enumerate() {
            let start = (i * capacity).min(listed.len());
            let end = ((i + 1) * capacity).min(listed.len());
            let next = trunks.get(i + 1).copied().unwrap_or(NO_PAGE);
            pages.push((*id, page::encode_trunk(&listed[start..end], next, self.layout.page_size)));
        }

        let mut meta = self.meta.clone();
        meta.page_count = page_count;
        meta.free_head = trunks.first().copied().unwrap_or(NO_PAGE);
        meta.free_count = (listed.len() + trunks.len()) as u32;

        Ok(FreePlan {
            meta,
            listed,
            trunks,
            pages,
        })
    }

    /// Adopt the state whose meta page was just written
    fn commit(&mut self, plan: FreePlan) {
        self.meta = plan.meta;
        self.meta_dirty = false;
        self.free = plan.listed;
        self.trunks = plan.trunks;
        self.retired.clear();
        self.fresh.clear();
        self.pending.clear();
        self.cache.mark_all_clean();
    }

    /// Flush, then drop all cached pages. Later access fails with `Closed`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.cache.clear();
        self.closed = true;
        debug!("closed store");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Give the stream back to its owner
    pub fn into_stream(self) -> S {
        self.stream
    }

    pub fn stats(&self) -> PagerStats {
        let stored = if self.free_loaded {
            self.trunks.len() as u32
        } else {
            self.meta.free_count
        };
        PagerStats {
            page_size: self.layout.page_size,
            page_count: self.meta.page_count,
            free_pages: stored + self.free.len() as u32 + self.retired.len() as u32,
            cached_pages: self.cache.len(),
            dirty_pages: self.cache.dirty_count(),
        }
    }
}

/// Page count after adding `id`
fn next_page(id: PageId) -> Result<PageId> {
    id.checked_add(1)
        .ok_or_else(|| StoreError::Io(io::Error::other("page numbers exhausted")))
}
