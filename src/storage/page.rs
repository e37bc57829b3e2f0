//! Page codec
//!
//! In-memory tree nodes and their fixed-size page encoding.

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

use super::{PageId, CRC_RANGE, NO_PAGE, PAGE_HEADER_SIZE};

/// Item header: Tag (1) + Len (4)
pub(crate) const ITEM_HEADER_SIZE: usize = 5;

/// Encoded size of an overflow reference: Tag (1) + Len (4) + First page (4)
pub(crate) const OVERFLOW_ITEM_SIZE: usize = 9;

/// Encoded size of a child pointer
pub(crate) const CHILD_SIZE: usize = 4;

/// Largest key or value the item length field can describe
pub(crate) const MAX_ITEM_LEN: usize = u32::MAX as usize;

const TAG_INLINE: u8 = 0;
const TAG_OVERFLOW: u8 = 1;

/// Page type stored in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PageKind {
    Leaf = 1,
    Internal = 2,
    Overflow = 3,
    Free = 4,
}

impl PageKind {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PageKind::Leaf),
            2 => Some(PageKind::Internal),
            3 => Some(PageKind::Overflow),
            4 => Some(PageKind::Free),
            _ => None,
        }
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// A key or value as held by a node.
///
/// `overflow` is set when the bytes live in an overflow chain; the chain is owned by
/// this item and released when the item is dropped from the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub data: Vec<u8>,
    pub overflow: Option<PageId>,
}

impl Item {
    pub fn inline(data: Vec<u8>) -> Self {
        Self {
            data,
            overflow: None,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Bytes this item takes inside a node
    pub fn encoded_size(&self) -> usize {
        match self.overflow {
            Some(_) => OVERFLOW_ITEM_SIZE,
            None => inline_size(self.data.len()),
        }
    }
}

/// Encoded size of an inline item of `len` bytes
pub(crate) fn inline_size(len: usize) -> usize {
    ITEM_HEADER_SIZE + len
}

/// Length field for an item of `len` bytes
pub(crate) fn item_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        StoreError::InvalidArgument(format!(
            "item of {} bytes exceeds the {} byte limit",
            len, MAX_ITEM_LEN
        ))
    })
}

/// Leaf node: sorted entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Leaf {
    pub entries: Vec<(Item, Item)>,
}

impl Leaf {
    /// Encoded body size
    pub fn size(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| k.encoded_size() + v.encoded_size())
            .sum()
    }

    /// Binary search by key: `Ok(index)` on a hit, `Err(insert_position)` otherwise
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
    }

    /// Index of the first entry with key >= `key`
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.entries.partition_point(|(k, _)| k.as_slice() < key)
    }
}

/// Internal node: child `i` holds keys in `[separator[i-1], separator[i])`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Internal {
    pub first: PageId,
    pub entries: Vec<(Item, PageId)>,
}

impl Internal {
    /// Encoded body size (includes the leftmost child pointer)
    pub fn size(&self) -> usize {
        CHILD_SIZE
            + self
                .entries
                .iter()
                .map(|(k, _)| k.encoded_size() + CHILD_SIZE)
                .sum::<usize>()
    }

    /// Position of the child whose range covers `key`
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.entries.partition_point(|(k, _)| k.as_slice() <= key)
    }

    /// Child page at position `index` (0 is the leftmost child)
    pub fn child(&self, index: usize) -> Option<PageId> {
        match index {
            0 => Some(self.first),
            i => self.entries.get(i - 1).map(|(_, child)| *child),
        }
    }

    /// Point position `index` at `page`. Returns false when there is no such child.
    pub fn set_child(&mut self, index: usize, page: PageId) -> bool {
        match index {
            0 => self.first = page,
            i => match self.entries.get_mut(i - 1) {
                Some((_, child)) => *child = page,
                None => return false,
            },
        }
        true
    }

    /// Number of children
    pub fn fanout(&self) -> usize {
        self.entries.len() + 1
    }
}

/// A decoded tree page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf(Leaf),
    Internal(Internal),
}

impl Node {
    pub fn size(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.size(),
            Node::Internal(internal) => internal.size(),
        }
    }

    /// Encode into a full page
    pub fn encode(&self, id: PageId, page_size: usize) -> Result<Vec<u8>> {
        let capacity = page_size - PAGE_HEADER_SIZE;
        if self.size() > capacity {
            return Err(StoreError::corruption(
                id,
                format!("node of {} bytes exceeds page capacity {}", self.size(), capacity),
            ));
        }

        let mut page = Vec::with_capacity(page_size);
        match self {
            Node::Leaf(leaf) => {
                put_header(&mut page, PageKind::Leaf, leaf.entries.len(), NO_PAGE);
                for (key, value) in &leaf.entries {
                    put_item(&mut page, key)?;
                    put_item(&mut page, value)?;
                }
            }
            Node::Internal(internal) => {
                put_header(&mut page, PageKind::Internal, internal.entries.len(), NO_PAGE);
                page.put_u32_le(internal.first);
                for (key, child) in &internal.entries {
                    put_item(&mut page, key)?;
                    page.put_u32_le(*child);
                }
            }
        }
        Ok(seal(page, page_size))
    }
}

// =============================================================================
// Raw decoding (overflow references not yet resolved)
// =============================================================================

/// An item as it appears on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawItem {
    Inline(Vec<u8>),
    Overflow { len: u32, first: PageId },
}

/// A node page before its overflow items are read
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawNode {
    Leaf {
        entries: Vec<(RawItem, RawItem)>,
    },
    Internal {
        first: PageId,
        entries: Vec<(RawItem, PageId)>,
    },
}

/// Decode a leaf or internal page
pub(crate) fn decode_node(id: PageId, page: &[u8]) -> Result<RawNode> {
    let (header, mut body) = open_page(id, page)?;
    match header.kind {
        PageKind::Leaf => {
            let mut entries = Vec::with_capacity(header.count);
            for _ in 0..header.count {
                let key = body.item()?;
                let value = body.item()?;
                entries.push((key, value));
            }
            Ok(RawNode::Leaf { entries })
        }
        PageKind::Internal => {
            let first = body.u32()?;
            let mut entries = Vec::with_capacity(header.count);
            for _ in 0..header.count {
                let key = body.item()?;
                let child = body.u32()?;
                entries.push((key, child));
            }
            Ok(RawNode::Internal { first, entries })
        }
        other => Err(StoreError::corruption(
            id,
            format!("expected a tree node, found {:?} page", other),
        )),
    }
}

// =============================================================================
// Overflow and free pages
// =============================================================================

/// Encode one chunk of an overflow chain
pub(crate) fn encode_overflow(chunk: &[u8], next: PageId, page_size: usize) -> Vec<u8> {
    let mut page = Vec::with_capacity(page_size);
    put_header(&mut page, PageKind::Overflow, chunk.len(), next);
    page.put_slice(chunk);
    seal(page, page_size)
}

/// Decode an overflow page into `(chunk, next)`
pub(crate) fn decode_overflow(id: PageId, page: &[u8]) -> Result<(Vec<u8>, PageId)> {
    let (header, mut body) = open_page(id, page)?;
    if header.kind != PageKind::Overflow {
        return Err(StoreError::corruption(
            id,
            format!("expected an overflow page, found {:?} page", header.kind),
        ));
    }
    let chunk = body.bytes(header.count)?;
    Ok((chunk, header.next))
}

/// Free page numbers one free-list trunk page can hold
pub(crate) fn trunk_capacity(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE) / 4
}

/// Encode a free-list trunk page listing `free` pages
pub(crate) fn encode_trunk(free: &[PageId], next: PageId, page_size: usize) -> Vec<u8> {
    let mut page = Vec::with_capacity(page_size);
    put_header(&mut page, PageKind::Free, free.len(), next);
    for id in free {
        page.put_u32_le(*id);
    }
    seal(page, page_size)
}

/// Decode a free-list trunk page into `(free pages, next trunk)`
pub(crate) fn decode_trunk(id: PageId, page: &[u8]) -> Result<(Vec<PageId>, PageId)> {
    let (header, mut body) = open_page(id, page)?;
    if header.kind != PageKind::Free {
        return Err(StoreError::corruption(
            id,
            format!("expected a free-list page, found {:?} page", header.kind),
        ));
    }
    let mut free = Vec::with_capacity(header.count);
    for _ in 0..header.count {
        free.push(body.u32()?);
    }
    Ok((free, header.next))
}

// =============================================================================
// Helpers
// =============================================================================

struct Header {
    kind: PageKind,
    count: usize,
    next: PageId,
}

fn put_header(page: &mut Vec<u8>, kind: PageKind, count: usize, next: PageId) {
    page.put_u8(kind as u8);
    page.put_u8(0);
    page.put_u16_le(count as u16);
    page.put_u32_le(0);
    page.put_u32_le(next);
    page.put_u32_le(0); // CRC placeholder, filled by seal()
}

fn put_item(page: &mut Vec<u8>, item: &Item) -> Result<()> {
    let len = item_len(item.data.len())?;
    match item.overflow {
        Some(first) => {
            page.put_u8(TAG_OVERFLOW);
            page.put_u32_le(len);
            page.put_u32_le(first);
        }
        None => {
            page.put_u8(TAG_INLINE);
            page.put_u32_le(len);
            page.put_slice(&item.data);
        }
    }
    Ok(())
}

/// Pad to a full page and stamp the checksum
fn seal(mut page: Vec<u8>, page_size: usize) -> Vec<u8> {
    page.resize(page_size, 0);
    let crc = page_crc(&page);
    page[CRC_RANGE].copy_from_slice(&crc.to_le_bytes());
    page
}

/// CRC32 over the page with the checksum field skipped
fn page_crc(page: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page[..CRC_RANGE.start]);
    hasher.update(&page[CRC_RANGE.end..]);
    hasher.finalize()
}

/// Verify checksum and header, returning the header and a reader over the body
fn open_page(id: PageId, page: &[u8]) -> Result<(Header, BodyReader<'_>)> {
    if page.len() < PAGE_HEADER_SIZE {
        return Err(StoreError::corruption(id, "page shorter than its header"));
    }

    let mut header_buf = &page[..PAGE_HEADER_SIZE];
    let kind_byte = header_buf.get_u8();
    let _reserved = header_buf.get_u8();
    let count = header_buf.get_u16_le() as usize;
    let _reserved = header_buf.get_u32_le();
    let next = header_buf.get_u32_le();
    let stored_crc = header_buf.get_u32_le();

    let actual_crc = page_crc(page);
    if stored_crc != actual_crc {
        return Err(StoreError::corruption(
            id,
            format!("checksum mismatch: stored {:#010x}, computed {:#010x}", stored_crc, actual_crc),
        ));
    }

    let kind = PageKind::from_u8(kind_byte)
        .ok_or_else(|| StoreError::corruption(id, format!("unknown page kind {}", kind_byte)))?;

    Ok((
        Header { kind, count, next },
        BodyReader {
            id,
            buf: &page[PAGE_HEADER_SIZE..],
        },
    ))
}

/// Bounds-checked reader over a page body
struct BodyReader<'a> {
    id: PageId,
    buf: &'a [u8],
}

impl BodyReader<'_> {
    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(StoreError::corruption(
                self.id,
                format!("truncated body: need {} bytes, {} left", n, self.buf.remaining()),
            ));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.need(n)?;
        let out = self.buf[..n].to_vec();
        self.buf.advance(n);
        Ok(out)
    }

    fn item(&mut self) -> Result<RawItem> {
        match self.u8()? {
            TAG_INLINE => {
                let len = self.u32()? as usize;
                Ok(RawItem::Inline(self.bytes(len)?))
            }
            TAG_OVERFLOW => {
                let len = self.u32()?;
                let first = self.u32()?;
                Ok(RawItem::Overflow { len, first })
            }
            tag => Err(StoreError::corruption(self.id, format!("unknown item tag {}", tag))),
        }
    }
}
