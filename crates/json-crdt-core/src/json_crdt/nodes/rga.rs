//! RGA (Replicated Growable Array) sequence engine.
//!
//! Chunks live in an arena (`Vec<Chunk<T>>`) and are addressed by index.
//! Two orderings are kept at the same time:
//!
//! - the view order, a doubly linked list through `prev`/`next`;
//! - an id index, a `BTreeMap` from each chunk's first id to its slot, so
//!   "the chunk containing element X" is a single range query.
//!
//! Every element of a chunk owns the id `chunk.id + offset`. Deleted chunks
//! keep their span (and therefore their ids) but drop their payload.

use crate::json_crdt_patch::clock::{Ts, Tss};
use std::collections::BTreeMap;

// ── Chunk ─────────────────────────────────────────────────────────────────

/// A contiguous run of elements sharing deletion status.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Timestamp of the first element in this chunk.
    pub id: Ts,
    /// Number of elements in this chunk, deleted ones included.
    pub span: u64,
    pub deleted: bool,
    /// Payload, empty for tombstones.
    pub data: Vec<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<T> Chunk<T> {
    /// Number of visible elements.
    pub fn len(&self) -> u64 {
        if self.deleted {
            0
        } else {
            self.span
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `id` addresses one of this chunk's elements.
    pub fn contains(&self, id: Ts) -> bool {
        self.id.sid == id.sid && self.id.time <= id.time && id.time < self.id.time + self.span
    }
}

// ── Rga ───────────────────────────────────────────────────────────────────

/// A tombstone-preserving replicated sequence of `T`.
///
/// `id` is the identity of the owning node; inserting after it prepends.
#[derive(Debug, Clone)]
pub struct Rga<T> {
    id: Ts,
    chunks: Vec<Chunk<T>>,
    head: Option<usize>,
    by_id: BTreeMap<(u64, u64), usize>,
    len: usize,
}

impl<T: Clone> Rga<T> {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            chunks: Vec::new(),
            head: None,
            by_id: BTreeMap::new(),
            len: 0,
        }
    }

    /// Rebuilds a sequence from chunks listed in view order.
    pub fn from_chunks(id: Ts, chunks: impl IntoIterator<Item = (Ts, u64, bool, Vec<T>)>) -> Self {
        let mut rga = Self::new(id);
        let mut tail: Option<usize> = None;
        for (chunk_id, span, deleted, data) in chunks {
            let data = if deleted { Vec::new() } else { data };
            let slot = rga.alloc(chunk_id, span, deleted, data);
            rga.link_after(tail, slot);
            tail = Some(slot);
        }
        rga
    }

    /// Identity of the owning node.
    pub fn id(&self) -> Ts {
        self.id
    }

    /// Number of visible elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks, tombstones included.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    // ── Iteration ────────────────────────────────────────────────────────

    /// Chunks in view order, tombstones included.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk<T>> + '_ {
        std::iter::successors(self.head.map(|i| &self.chunks[i]), move |c| {
            c.next.map(|i| &self.chunks[i])
        })
    }

    /// Visible elements in view order.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.chunks()
            .filter(|c| !c.deleted)
            .flat_map(|c| c.data.iter())
    }

    /// Visible elements paired with their ids.
    pub fn entries(&self) -> impl Iterator<Item = (Ts, &T)> + '_ {
        self.chunks().filter(|c| !c.deleted).flat_map(|c| {
            c.data
                .iter()
                .enumerate()
                .map(move |(i, v)| (Ts::new(c.id.sid, c.id.time + i as u64), v))
        })
    }

    // ── Lookup ───────────────────────────────────────────────────────────

    /// Arena slot of the chunk containing element `id`.
    fn find_chunk(&self, id: Ts) -> Option<usize> {
        let (_, &slot) = self.by_id.range(..=(id.sid, id.time)).next_back()?;
        self.chunks[slot].contains(id).then_some(slot)
    }

    /// Returns `true` if element `id` was ever inserted (tombstones count).
    pub fn contains(&self, id: Ts) -> bool {
        self.find_chunk(id).is_some()
    }

    /// Returns `true` if every element of the span was ever inserted.
    pub fn contains_span(&self, span: Tss) -> bool {
        let end = span.time.saturating_add(span.span);
        let mut time = span.time;
        while time < end {
            let Some(next) = self.run_end(Ts::new(span.sid, time)) else {
                return false;
            };
            time = next;
        }
        true
    }

    /// Exclusive end time of the chunk containing `id`.
    pub fn run_end(&self, id: Ts) -> Option<u64> {
        let chunk = &self.chunks[self.find_chunk(id)?];
        Some(chunk.id.time + chunk.span)
    }

    /// Returns `Some(true)` for a deleted element, `None` if unknown.
    pub fn is_deleted(&self, id: Ts) -> Option<bool> {
        self.find_chunk(id).map(|slot| self.chunks[slot].deleted)
    }

    /// The visible element `id`.
    pub fn get(&self, id: Ts) -> Option<&T> {
        let chunk = &self.chunks[self.find_chunk(id)?];
        chunk.data.get((id.time - chunk.id.time) as usize)
    }

    pub fn get_mut(&mut self, id: Ts) -> Option<&mut T> {
        let slot = self.find_chunk(id)?;
        let chunk = &mut self.chunks[slot];
        let offset = (id.time - chunk.id.time) as usize;
        chunk.data.get_mut(offset)
    }

    /// Id of the visible element at position `pos`.
    pub fn find(&self, pos: usize) -> Option<Ts> {
        let mut remaining = pos as u64;
        for chunk in self.chunks().filter(|c| !c.deleted) {
            if remaining < chunk.span {
                return Some(Ts::new(chunk.id.sid, chunk.id.time + remaining));
            }
            remaining -= chunk.span;
        }
        None
    }

    /// Id spans covering the visible positions `[pos, pos + len)`.
    pub fn find_interval(&self, pos: usize, len: usize) -> Vec<Tss> {
        let mut result = Vec::new();
        let start = pos as u64;
        let end = start + len as u64;
        let mut offset = 0u64;
        for chunk in self.chunks().filter(|c| !c.deleted) {
            if offset >= end {
                break;
            }
            let chunk_end = offset + chunk.span;
            if chunk_end > start {
                let local_start = start.saturating_sub(offset);
                let local_end = (end - offset).min(chunk.span);
                result.push(Tss::new(
                    chunk.id.sid,
                    chunk.id.time + local_start,
                    local_end - local_start,
                ));
            }
            offset = chunk_end;
        }
        result
    }

    /// Visible position of element `id`, `None` if unknown or deleted.
    pub fn position(&self, id: Ts) -> Option<usize> {
        let mut pos = 0u64;
        for chunk in self.chunks() {
            if chunk.contains(id) {
                return (!chunk.deleted).then(|| (pos + id.time - chunk.id.time) as usize);
            }
            pos += chunk.len();
        }
        None
    }

    // ── Structure ────────────────────────────────────────────────────────

    fn alloc(&mut self, id: Ts, span: u64, deleted: bool, data: Vec<T>) -> usize {
        let slot = self.chunks.len();
        self.chunks.push(Chunk {
            id,
            span,
            deleted,
            data,
            prev: None,
            next: None,
        });
        self.by_id.insert((id.sid, id.time), slot);
        if !deleted {
            self.len += span as usize;
        }
        slot
    }

    /// Links an unlinked `slot` right after `left` (or at the head).
    fn link_after(&mut self, left: Option<usize>, slot: usize) {
        let next = match left {
            Some(l) => self.chunks[l].next,
            None => self.head,
        };
        self.chunks[slot].prev = left;
        self.chunks[slot].next = next;
        match left {
            Some(l) => self.chunks[l].next = Some(slot),
            None => self.head = Some(slot),
        }
        if let Some(n) = next {
            self.chunks[n].prev = Some(slot);
        }
    }

    /// Splits chunk `slot` so that it keeps its first `offset` elements.
    /// Returns the slot of the right half.
    pub fn split(&mut self, slot: usize, offset: u64) -> usize {
        let chunk = &mut self.chunks[slot];
        debug_assert!(offset > 0 && offset < chunk.span);
        let right_id = Ts::new(chunk.id.sid, chunk.id.time + offset);
        let right_span = chunk.span - offset;
        let deleted = chunk.deleted;
        let right_data = if deleted {
            Vec::new()
        } else {
            chunk.data.split_off(offset as usize)
        };
        chunk.span = offset;
        // `alloc` adds the right half to `len`, which the left half still counts
        if !deleted {
            self.len -= right_span as usize;
        }
        let right = self.alloc(right_id, right_span, deleted, right_data);
        self.link_after(Some(slot), right);
        right
    }

    /// Inserts `data` with first id `id` right after element `after`.
    ///
    /// `after == self.id()` prepends. Concurrent inserts after the same anchor
    /// are ordered by id: the greater id stays closer to the anchor. Returns
    /// `false` (and changes nothing) when `id` is already present, `after` is
    /// unknown or `data` is empty.
    pub fn insert(&mut self, after: Ts, id: Ts, data: Vec<T>) -> bool {
        if data.is_empty() || self.contains(id) {
            return false;
        }
        let mut left = if after == self.id {
            None
        } else {
            let Some(slot) = self.find_chunk(after) else {
                return false;
            };
            let chunk = &self.chunks[slot];
            let offset = after.time - chunk.id.time + 1;
            if offset < chunk.span {
                self.split(slot, offset);
            }
            Some(slot)
        };
        let mut cursor = match left {
            Some(l) => self.chunks[l].next,
            None => self.head,
        };
        while let Some(n) = cursor {
            if self.chunks[n].id <= id {
                break;
            }
            left = Some(n);
            cursor = self.chunks[n].next;
        }
        if let Some(l) = left {
            let chunk = &mut self.chunks[l];
            if !chunk.deleted && chunk.id.sid == id.sid && chunk.id.time + chunk.span == id.time {
                let added = data.len();
                chunk.span += added as u64;
                chunk.data.extend(data);
                self.len += added;
                return true;
            }
        }
        let span = data.len() as u64;
        let slot = self.alloc(id, span, false, data);
        self.link_after(left, slot);
        true
    }

    /// Deletes every element covered by `spans`. Unknown ids are skipped,
    /// already-deleted ones stay deleted. Returns the number of elements that
    /// became invisible.
    pub fn delete(&mut self, spans: &[Tss]) -> usize {
        let mut removed = 0usize;
        for span in spans {
            let end = span.time.saturating_add(span.span);
            let mut time = span.time;
            while time < end {
                let slot = match self.find_chunk(Ts::new(span.sid, time)) {
                    Some(slot) => slot,
                    None => {
                        // jump to the next known chunk of the session inside the range
                        match self
                            .by_id
                            .range((span.sid, time)..(span.sid, end))
                            .next()
                        {
                            Some((&(_, start), _)) => {
                                time = start;
                                continue;
                            }
                            None => break,
                        }
                    }
                };
                let mut slot = slot;
                let start = self.chunks[slot].id.time;
                if time > start {
                    slot = self.split(slot, time - start);
                }
                if self.chunks[slot].span > end - time {
                    self.split(slot, end - time);
                }
                let chunk = &mut self.chunks[slot];
                if !chunk.deleted {
                    chunk.deleted = true;
                    chunk.data = Vec::new();
                    removed += chunk.span as usize;
                }
                time = chunk.id.time + chunk.span;
            }
        }
        self.len -= removed;
        removed
    }
}
