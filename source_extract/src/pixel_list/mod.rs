//! Pooled, index-linked pixel lists.
//!
//! All pixels of all objects in one session live in a single [`PixelArena`].
//! An object's pixels form a singly linked chain through the arena: each
//! [`PixelNode`] stores the index of the next node, and a [`PixelSpan`]
//! records the first and last index plus the chain length. Linking by index
//! instead of reference gives O(1) append and O(1) splice, which the labeling
//! engine relies on when two open components turn out to be one.
//!
//! Nodes are never freed one by one. The arena is cleared as a unit when the
//! session that owns it ends.

pub mod schema;

use thiserror::Error;

use crate::error::{ExtractError, Result};
pub use schema::{Bare, Filtered, Full, Noisy, PixelExtras, PixelSample, PixelSchema};

/// Link value terminating a chain.
const NIL: u32 = u32::MAX;

/// Arenas reserve at most this many nodes up front and grow on demand
/// until they reach their capacity bound.
const PREALLOCATE_LIMIT: usize = 1 << 16;

/// One pixel of some object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelNode<E> {
    next: u32,
    /// Column in full-image coordinates.
    pub x: u32,
    /// Row in full-image coordinates.
    pub y: u32,
    /// Raw value.
    pub value: f32,
    /// Optional fields for the session's schema.
    pub extras: E,
}

impl<E: PixelExtras> PixelNode<E> {
    /// Build a detached node from a front-end sample.
    pub fn capture(x: u32, y: u32, sample: &PixelSample) -> Self {
        Self {
            next: NIL,
            x,
            y,
            value: sample.value,
            extras: E::capture(sample),
        }
    }

    /// Value the detection threshold is compared against.
    ///
    /// Falls back to the raw value when the schema stores no filtered value.
    #[inline]
    pub fn cdvalue(&self) -> f32 {
        self.extras.cdvalue().unwrap_or(self.value)
    }

    #[inline]
    pub fn variance(&self) -> Option<f32> {
        self.extras.variance()
    }

    #[inline]
    pub fn threshold(&self) -> Option<f32> {
        self.extras.threshold()
    }

    /// Arena index of the next node of the same object.
    #[inline]
    pub fn next(&self) -> Option<u32> {
        (self.next != NIL).then_some(self.next)
    }

    fn detached(mut self) -> Self {
        self.next = NIL;
        self
    }
}

/// First/last arena index and length of one object's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSpan {
    first: u32,
    last: u32,
    len: usize,
}

impl PixelSpan {
    pub const EMPTY: PixelSpan = PixelSpan {
        first: NIL,
        last: NIL,
        len: 0,
    };

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.first == NIL
    }

    pub fn first(&self) -> Option<u32> {
        (self.first != NIL).then_some(self.first)
    }

    pub fn last(&self) -> Option<u32> {
        (self.last != NIL).then_some(self.last)
    }
}

impl Default for PixelSpan {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Defects found by [`PixelArena::verify_span`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpanDefect {
    #[error("link {index} points outside the arena (len {arena_len})")]
    DanglingLink { index: u32, arena_len: usize },
    #[error("chain ended after {walked} nodes, span records {expected}")]
    TooShort { walked: usize, expected: usize },
    #[error("chain continues past the recorded length {expected}")]
    TooLong { expected: usize },
    #[error("chain ends at {found}, span records last = {expected}")]
    WrongLast { found: u32, expected: u32 },
    #[error("empty span has dangling bounds")]
    InconsistentEmpty,
    #[error("object records {recorded} pixels, its chain holds {span}")]
    CountMismatch { recorded: usize, span: usize },
}

/// Fixed-capacity pool of pixel nodes for one session.
#[derive(Debug, Clone)]
pub struct PixelArena<E> {
    nodes: Vec<PixelNode<E>>,
    capacity: usize,
}

impl<E: PixelExtras> PixelArena<E> {
    /// Create an arena holding at most `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(NIL as usize);
        Self {
            nodes: Vec::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of nodes allocated so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes still available before the capacity bound.
    pub fn remaining(&self) -> usize {
        self.capacity - self.nodes.len()
    }

    /// Reclaim every node at once. Spans into this arena become invalid.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Node at `index`, if allocated.
    pub fn get(&self, index: u32) -> Option<&PixelNode<E>> {
        self.nodes.get(index as usize)
    }

    /// Store `node` as a new single-node chain.
    pub fn alloc(&mut self, node: PixelNode<E>) -> Result<PixelSpan> {
        if self.nodes.len() >= self.capacity {
            return Err(ExtractError::arena_full(self.nodes.len() + 1, self.capacity));
        }
        let index = self.nodes.len() as u32;
        self.nodes.push(node.detached());
        Ok(PixelSpan {
            first: index,
            last: index,
            len: 1,
        })
    }

    /// Add `node` to the tail of `span`, returning its arena index.
    pub fn append(&mut self, span: &mut PixelSpan, node: PixelNode<E>) -> Result<u32> {
        let single = self.alloc(node)?;
        self.concat(span, single);
        Ok(single.first)
    }

    /// Splice `tail` onto the end of `head` in O(1).
    ///
    /// `tail` must not share nodes with `head`; the caller stops using `tail`
    /// afterwards.
    pub fn concat(&mut self, head: &mut PixelSpan, tail: PixelSpan) {
        if tail.is_empty() {
            return;
        }
        if head.is_empty() {
            *head = tail;
            return;
        }
        self.nodes[head.last as usize].next = tail.first;
        head.last = tail.last;
        head.len += tail.len;
    }

    /// Deep-copy a chain from `source` into this arena.
    ///
    /// Either the whole chain is copied or nothing is: capacity is checked
    /// before the first node is written.
    pub fn copy_span(&mut self, source: &PixelArena<E>, span: PixelSpan) -> Result<PixelSpan> {
        if span.len() > self.remaining() {
            return Err(ExtractError::arena_full(
                self.nodes.len() + span.len(),
                self.capacity,
            ));
        }
        let mut copy = PixelSpan::EMPTY;
        for node in source.iter(span) {
            self.append(&mut copy, *node)?;
        }
        Ok(copy)
    }

    /// Walk the chain of `span` in link order.
    pub fn iter(&self, span: PixelSpan) -> SpanIter<'_, E> {
        SpanIter {
            arena: self,
            cursor: span.first,
            remaining: span.len,
        }
    }

    /// Walk the chain yielding `(arena index, node)` pairs.
    pub fn iter_indexed(&self, span: PixelSpan) -> impl Iterator<Item = (u32, &PixelNode<E>)> {
        let mut cursor = span.first;
        let mut remaining = span.len;
        std::iter::from_fn(move || {
            if cursor == NIL || remaining == 0 {
                return None;
            }
            let index = cursor;
            let node = self.nodes.get(index as usize)?;
            cursor = node.next;
            remaining -= 1;
            Some((index, node))
        })
    }

    /// Check that `span` is a well-formed chain: exactly `len` links from
    /// `first`, ending at `last`, with the terminator after it.
    pub fn verify_span(&self, span: PixelSpan) -> std::result::Result<(), SpanDefect> {
        if span.is_empty() {
            return if span.last == NIL && span.len == 0 {
                Ok(())
            } else {
                Err(SpanDefect::InconsistentEmpty)
            };
        }

        let mut cursor = span.first;
        let mut previous = NIL;
        for walked in 0..span.len {
            if cursor == NIL {
                return Err(SpanDefect::TooShort {
                    walked,
                    expected: span.len,
                });
            }
            let node = self.nodes.get(cursor as usize).ok_or(SpanDefect::DanglingLink {
                index: cursor,
                arena_len: self.nodes.len(),
            })?;
            previous = cursor;
            cursor = node.next;
        }

        if previous != span.last {
            return Err(SpanDefect::WrongLast {
                found: previous,
                expected: span.last,
            });
        }
        if cursor != NIL {
            return Err(SpanDefect::TooLong { expected: span.len });
        }
        Ok(())
    }
}

/// Iterator over the nodes of one span.
pub struct SpanIter<'a, E> {
    arena: &'a PixelArena<E>,
    cursor: u32,
    remaining: usize,
}

impl<'a, E> Iterator for SpanIter<'a, E> {
    type Item = &'a PixelNode<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL || self.remaining == 0 {
            return None;
        }
        let node = self.arena.nodes.get(self.cursor as usize)?;
        self.cursor = node.next;
        self.remaining -= 1;
        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
