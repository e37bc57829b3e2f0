//! Range Cursors
//!
//! Lazy, one-pass iteration over a key range.
//!
//! A cursor descends once to the leaf where the range begins (the leaf holding `start`
//! when ascending, the one holding `end` when descending) and keeps the path of
//! internal nodes it took. The next leaf is found by climbing that path only as far
//! as the nearest ancestor with another child, so each step is amortized O(1) and no
//! re-descent from the root happens per entry. Matching entries of one leaf are
//! buffered at a time.

use std::collections::VecDeque;
use std::iter::FusedIterator;

use crate::error::Result;
use crate::flags::RangeFlags;
use crate::store::{lock_pager, SharedPager};
use crate::stream::Stream;

use super::tree::{self, Path, Seek};

/// Which sides of each entry the cursor copies out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Projection {
    Keys,
    Values,
    Items,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Not started; the first leaf comes from a descent
    Start,
    /// Read the leaf after the one `path` leads to
    Advance,
    Done,
}

/// Range bounds: `start` inclusive, `end` exclusive unless `include_end`
struct Bounds {
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    include_end: bool,
}

impl Bounds {
    fn before_start(&self, key: &[u8]) -> bool {
        self.start.as_deref().map_or(false, |start| key < start)
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match self.end.as_deref() {
            Some(end) if self.include_end => key > end,
            Some(end) => key >= end,
            None => false,
        }
    }
}

/// Cursor over `(key, value)` pairs; the unprojected side is left empty
pub(crate) struct Cursor<'a, S: Stream> {
    pager: &'a SharedPager<S>,
    bounds: Bounds,
    descending: bool,
    projection: Projection,
    position: Position,
    path: Path,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl<'a, S: Stream> Cursor<'a, S> {
    pub fn new(
        pager: &'a SharedPager<S>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        flags: RangeFlags,
        projection: Projection,
    ) -> Self {
        let empty = matches!((start, end), (Some(s), Some(e)) if s > e);

        Self {
            pager,
            bounds: Bounds {
                start: start.map(<[u8]>::to_vec),
                end: end.map(<[u8]>::to_vec),
                include_end: flags.include_end(),
            },
            descending: flags.descending(),
            projection,
            position: if empty { Position::Done } else { Position::Start },
            path: Path::new(),
            buffer: VecDeque::new(),
        }
    }

    /// Refill the buffer from the next leaf(s) until it holds something or the range ends
    fn fill(&mut self) -> Result<()> {
        while self.buffer.is_empty() {
            let mut pager = lock_pager(self.pager)?;

            let leaf_id = match self.position {
                Position::Done => return Ok(()),
                Position::Advance => {
                    match tree::adjacent_leaf(&mut *pager, &mut self.path, self.descending)? {
                        Some(id) => id,
                        None => {
                            self.position = Position::Done;
                            return Ok(());
                        }
                    }
                }
                Position::Start => {
                    let seek = match (self.descending, &self.bounds) {
                        (false, Bounds { start: Some(start), .. }) => Seek::Key(start),
                        (false, _) => Seek::First,
                        (true, Bounds { end: Some(end), .. }) => Seek::Key(end),
                        (true, _) => Seek::Last,
                    };
                    let (path, leaf) = tree::descend(&mut *pager, seek)?;
                    self.path = path;
                    leaf
                }
            };

            let leaf = pager.leaf(leaf_id)?;
            let bounds = &self.bounds;
            let projection = self.projection;
            let mut finished = false;

            if self.descending {
                for (key, value) in leaf.entries.iter().rev() {
                    if bounds.past_end(key.as_slice()) {
                        continue;
                    }
                    if bounds.before_start(key.as_slice()) {
                        finished = true;
                        break;
                    }
                    self.buffer.push_back(project(projection, &key.data, &value.data));
                }
            } else {
                let from = bounds
                    .start
                    .as_deref()
                    .map_or(0, |start| leaf.lower_bound(start));
                for (key, value) in &leaf.entries[from..] {
                    if bounds.past_end(key.as_slice()) {
                        finished = true;
                        break;
                    }
                    self.buffer.push_back(project(projection, &key.data, &value.data));
                }
            }

            self.position = if finished { Position::Done } else { Position::Advance };
        }
        Ok(())
    }
}

fn project(projection: Projection, key: &[u8], value: &[u8]) -> (Vec<u8>, Vec<u8>) {
    match projection {
        Projection::Keys => (key.to_vec(), Vec::new()),
        Projection::Values => (Vec::new(), value.to_vec()),
        Projection::Items => (key.to_vec(), value.to_vec()),
    }
}

impl<S: Stream> Iterator for Cursor<'_, S> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.fill() {
            // A failed leaf ends the range
            self.position = Position::Done;
            self.buffer.clear();
            return Some(Err(e));
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl<S: Stream> FusedIterator for Cursor<'_, S> {}

// =============================================================================
// Public views
// =============================================================================

/// Keys of a range, from [`Store::keys`](crate::Store::keys)
pub struct Keys<'a, S: Stream>(pub(crate) Cursor<'a, S>);

/// Values of a range, from [`Store::values`](crate::Store::values)
pub struct Values<'a, S: Stream>(pub(crate) Cursor<'a, S>);

/// `(key, value)` pairs of a range, from [`Store::items`](crate::Store::items)
pub struct Items<'a, S: Stream>(pub(crate) Cursor<'a, S>);

impl<S: Stream> Iterator for Keys<'_, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|entry| entry.map(|(key, _)| key))
    }
}

impl<S: Stream> Iterator for Values<'_, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|entry| entry.map(|(_, value)| value))
    }
}

impl<S: Stream> Iterator for Items<'_, S> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl<S: Stream> FusedIterator for Keys<'_, S> {}
impl<S: Stream> FusedIterator for Values<'_, S> {}
impl<S: Stream> FusedIterator for Items<'_, S> {}
