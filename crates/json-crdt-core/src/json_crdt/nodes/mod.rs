//! JSON CRDT node types.
//!
//! # Node Types
//!
//! | Rust type | Semantics                              |
//! |-----------|----------------------------------------|
//! | `ConNode` | Immutable constant value               |
//! | `ValNode` | Last-write-wins single register        |
//! | `ObjNode` | LWW key→value map                      |
//! | `VecNode` | Fixed-arity LWW tuple                  |
//! | `StrNode` | RGA string of UTF-16 code units        |
//! | `BinNode` | RGA binary blob                        |
//! | `ArrNode` | RGA array of node references           |
//!
//! Registers, maps and tuples remember the id of the operation that wrote
//! each slot; a later write is adopted only if its operation id is greater.

pub mod rga;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_crdt_patch::clock::{Ts, Tss};
use crate::json_crdt_patch::constants::{ORIGIN, UNDEFINED};
use crate::json_crdt_patch::operations::ConValue;
use rga::Rga;

/// Views nested deeper than this render as `null`.
pub(crate) const MAX_VIEW_DEPTH: usize = 1024;

// ── Slot ──────────────────────────────────────────────────────────────────

/// One LWW slot: the value id and the id of the operation that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub writer: Ts,
    pub val: Ts,
}

impl Slot {
    /// Adopts `val` if `writer` is newer. Returns the displaced value.
    fn set(slot: &mut Option<Slot>, writer: Ts, val: Ts) -> Option<Ts> {
        if let Some(current) = slot {
            if current.writer >= writer {
                return None;
            }
            let old = current.val;
            *current = Slot { writer, val };
            return Some(old);
        }
        *slot = Some(Slot { writer, val });
        Some(UNDEFINED)
    }
}

// ── ConNode ───────────────────────────────────────────────────────────────

/// Immutable constant node.
#[derive(Debug, Clone, PartialEq)]
pub struct ConNode {
    pub id: Ts,
    pub val: ConValue,
}

impl ConNode {
    pub fn new(id: Ts, val: ConValue) -> Self {
        Self { id, val }
    }

    pub fn view(&self) -> Value {
        self.val.view()
    }
}

// ── ValNode ───────────────────────────────────────────────────────────────

/// Last-write-wins single-value register.
#[derive(Debug, Clone, PartialEq)]
pub struct ValNode {
    pub id: Ts,
    /// Operation that wrote the current value, `ORIGIN` while unwritten.
    pub writer: Ts,
    /// The current value node, `UNDEFINED` while unwritten.
    pub val: Ts,
}

impl ValNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            writer: ORIGIN,
            val: UNDEFINED,
        }
    }

    /// Adopts `val` iff `writer` is greater than the current writer.
    /// Returns the old value if it was replaced.
    pub fn set(&mut self, writer: Ts, val: Ts) -> Option<Ts> {
        if writer <= self.writer {
            return None;
        }
        let old = self.val;
        self.writer = writer;
        self.val = val;
        Some(old)
    }
}

// ── ObjNode ───────────────────────────────────────────────────────────────

/// Last-write-wins object (map from string keys to node IDs).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjNode {
    pub id: Ts,
    /// Every key ever written, including deleted ones.
    pub keys: BTreeMap<String, Slot>,
}

impl ObjNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            keys: BTreeMap::new(),
        }
    }

    /// Writes `key`, keeping it only if `writer` is newer than the last
    /// write. `UNDEFINED` deletes the key. Returns the old value if replaced.
    pub fn put(&mut self, writer: Ts, key: &str, val: Ts) -> Option<Ts> {
        let mut slot = self.keys.get(key).copied();
        let old = Slot::set(&mut slot, writer, val)?;
        if let Some(slot) = slot {
            self.keys.insert(key.to_owned(), slot);
        }
        Some(old)
    }

    /// Current value of a visible key.
    pub fn get(&self, key: &str) -> Option<Ts> {
        self.keys
            .get(key)
            .map(|slot| slot.val)
            .filter(|val| *val != UNDEFINED)
    }

    /// Visible entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Ts)> + '_ {
        self.keys
            .iter()
            .filter(|(_, slot)| slot.val != UNDEFINED)
            .map(|(key, slot)| (key.as_str(), slot.val))
    }
}

// ── VecNode ───────────────────────────────────────────────────────────────

/// Fixed-arity LWW tuple (vector).
#[derive(Debug, Clone, PartialEq)]
pub struct VecNode {
    pub id: Ts,
    /// One entry per slot, `None` while the slot was never written.
    pub slots: Vec<Option<Slot>>,
}

impl VecNode {
    pub fn new(id: Ts, len: u8) -> Self {
        Self {
            id,
            slots: vec![None; len as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Writes slot `index`, keeping it only if `writer` is newer.
    /// Out-of-range indices are ignored. Returns the old value if replaced.
    pub fn put(&mut self, writer: Ts, index: usize, val: Ts) -> Option<Ts> {
        let slot = self.slots.get_mut(index)?;
        Slot::set(slot, writer, val)
    }

    /// Current value of slot `index`.
    pub fn get(&self, index: usize) -> Option<Ts> {
        self.slots
            .get(index)
            .copied()
            .flatten()
            .map(|slot| slot.val)
            .filter(|val| *val != UNDEFINED)
    }
}

// ── StrNode ───────────────────────────────────────────────────────────────

/// RGA string node.
#[derive(Debug, Clone)]
pub struct StrNode {
    pub id: Ts,
    pub rga: Rga<u16>,
    cache: Option<String>,
}

impl StrNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            rga: Rga::new(id),
            cache: Some(String::new()),
        }
    }

    pub fn from_rga(rga: Rga<u16>) -> Self {
        let mut node = Self {
            id: rga.id(),
            rga,
            cache: None,
        };
        node.refresh_view();
        node
    }

    pub fn ins(&mut self, after: Ts, id: Ts, data: &str) -> bool {
        let inserted = self.rga.insert(after, id, data.encode_utf16().collect());
        if inserted {
            self.cache = None;
        }
        inserted
    }

    pub fn delete(&mut self, spans: &[Tss]) -> usize {
        let removed = self.rga.delete(spans);
        if removed > 0 {
            self.cache = None;
        }
        removed
    }

    /// Current text. Uses the cached rendering when it is fresh.
    pub fn text(&self) -> String {
        match &self.cache {
            Some(text) => text.clone(),
            None => self.render(),
        }
    }

    /// Number of visible UTF-16 code units.
    pub fn size(&self) -> usize {
        self.rga.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.cache.is_none()
    }

    pub fn refresh_view(&mut self) {
        if self.cache.is_none() {
            self.cache = Some(self.render());
        }
    }

    fn render(&self) -> String {
        let units: Vec<u16> = self.rga.values().copied().collect();
        String::from_utf16_lossy(&units)
    }
}

// ── BinNode ───────────────────────────────────────────────────────────────

/// RGA binary node.
#[derive(Debug, Clone)]
pub struct BinNode {
    pub id: Ts,
    pub rga: Rga<u8>,
    cache: Option<Vec<u8>>,
}

impl BinNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            rga: Rga::new(id),
            cache: Some(Vec::new()),
        }
    }

    pub fn from_rga(rga: Rga<u8>) -> Self {
        let mut node = Self {
            id: rga.id(),
            rga,
            cache: None,
        };
        node.refresh_view();
        node
    }

    pub fn ins(&mut self, after: Ts, id: Ts, data: &[u8]) -> bool {
        let inserted = self.rga.insert(after, id, data.to_vec());
        if inserted {
            self.cache = None;
        }
        inserted
    }

    pub fn delete(&mut self, spans: &[Tss]) -> usize {
        let removed = self.rga.delete(spans);
        if removed > 0 {
            self.cache = None;
        }
        removed
    }

    pub fn bytes(&self) -> Vec<u8> {
        match &self.cache {
            Some(bytes) => bytes.clone(),
            None => self.rga.values().copied().collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.rga.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.cache.is_none()
    }

    pub fn refresh_view(&mut self) {
        if self.cache.is_none() {
            self.cache = Some(self.rga.values().copied().collect());
        }
    }

    /// View as a JSON array of byte values.
    pub fn view(&self) -> Value {
        Value::Array(self.bytes().into_iter().map(Value::from).collect())
    }
}

// ── ArrNode ───────────────────────────────────────────────────────────────

/// RGA array of node-ID references.
///
/// Each element has two identities: its slot id in the RGA and the id of the
/// node stored in the slot.
#[derive(Debug, Clone)]
pub struct ArrNode {
    pub id: Ts,
    pub rga: Rga<Ts>,
    cache: Option<Vec<Ts>>,
}

impl ArrNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            rga: Rga::new(id),
            cache: Some(Vec::new()),
        }
    }

    pub fn from_rga(rga: Rga<Ts>) -> Self {
        let mut node = Self {
            id: rga.id(),
            rga,
            cache: None,
        };
        node.refresh_view();
        node
    }

    /// Insert node IDs after the slot `after`.
    pub fn ins(&mut self, after: Ts, id: Ts, data: &[Ts]) -> bool {
        let inserted = self.rga.insert(after, id, data.to_vec());
        if inserted {
            self.cache = None;
        }
        inserted
    }

    pub fn delete(&mut self, spans: &[Tss]) -> usize {
        let removed = self.rga.delete(spans);
        if removed > 0 {
            self.cache = None;
        }
        removed
    }

    /// Replaces the value of the live slot `slot` if `val` is greater than
    /// the value it holds. Returns the old value if replaced.
    pub fn upd(&mut self, slot: Ts, val: Ts) -> Option<Ts> {
        let current = self.rga.get_mut(slot)?;
        if *current >= val {
            return None;
        }
        let old = std::mem::replace(current, val);
        self.cache = None;
        Some(old)
    }

    /// Value node stored in slot `slot`, if the slot is live.
    pub fn get(&self, slot: Ts) -> Option<Ts> {
        self.rga.get(slot).copied()
    }

    /// Value node at visible position `pos`.
    pub fn get_at(&self, pos: usize) -> Option<Ts> {
        match &self.cache {
            Some(items) => items.get(pos).copied(),
            None => self.rga.values().nth(pos).copied(),
        }
    }

    /// Value nodes of every live element in order.
    pub fn items(&self) -> Vec<Ts> {
        match &self.cache {
            Some(items) => items.clone(),
            None => self.rga.values().copied().collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.rga.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.cache.is_none()
    }

    pub fn refresh_view(&mut self) {
        if self.cache.is_none() {
            self.cache = Some(self.rga.values().copied().collect());
        }
    }
}

// ── NodeKind ──────────────────────────────────────────────────────────────

/// Discriminant of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Con,
    Val,
    Obj,
    Vec,
    Str,
    Bin,
    Arr,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Con => "con",
            Self::Val => "val",
            Self::Obj => "obj",
            Self::Vec => "vec",
            Self::Str => "str",
            Self::Bin => "bin",
            Self::Arr => "arr",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Node enum ─────────────────────────────────────────────────────────────

/// All possible CRDT node types.
#[derive(Debug, Clone)]
pub enum Node {
    Con(ConNode),
    Val(ValNode),
    Obj(ObjNode),
    Vec(VecNode),
    Str(StrNode),
    Bin(BinNode),
    Arr(ArrNode),
}

impl Node {
    pub fn id(&self) -> Ts {
        match self {
            Self::Con(n) => n.id,
            Self::Val(n) => n.id,
            Self::Obj(n) => n.id,
            Self::Vec(n) => n.id,
            Self::Str(n) => n.id,
            Self::Bin(n) => n.id,
            Self::Arr(n) => n.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Con(_) => NodeKind::Con,
            Self::Val(_) => NodeKind::Val,
            Self::Obj(_) => NodeKind::Obj,
            Self::Vec(_) => NodeKind::Vec,
            Self::Str(_) => NodeKind::Str,
            Self::Bin(_) => NodeKind::Bin,
            Self::Arr(_) => NodeKind::Arr,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Ids of the nodes this node currently links to.
    pub fn children(&self) -> Vec<Ts> {
        match self {
            Self::Con(_) | Self::Str(_) | Self::Bin(_) => Vec::new(),
            Self::Val(n) => {
                if n.val == UNDEFINED {
                    Vec::new()
                } else {
                    vec![n.val]
                }
            }
            Self::Obj(n) => n.entries().map(|(_, id)| id).collect(),
            Self::Vec(n) => (0..n.len()).filter_map(|i| n.get(i)).collect(),
            Self::Arr(n) => n.items(),
        }
    }

    /// Returns `true` if the sequence view cache needs a refresh.
    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Str(n) => n.is_dirty(),
            Self::Bin(n) => n.is_dirty(),
            Self::Arr(n) => n.is_dirty(),
            _ => false,
        }
    }

    pub fn refresh_view(&mut self) {
        match self {
            Self::Str(n) => n.refresh_view(),
            Self::Bin(n) => n.refresh_view(),
            Self::Arr(n) => n.refresh_view(),
            _ => {}
        }
    }

    /// JSON view of this node, resolving children through `index`.
    pub fn view(&self, index: &NodeIndex) -> Value {
        self.view_at(index, 0)
    }

    fn view_at(&self, index: &NodeIndex, depth: usize) -> Value {
        if depth > MAX_VIEW_DEPTH {
            return Value::Null;
        }
        let child = |id: Ts| -> Value {
            match index.get(&id) {
                Some(node) => node.view_at(index, depth + 1),
                None => Value::Null,
            }
        };
        match self {
            Self::Con(n) => n.view(),
            Self::Val(n) => child(n.val),
            Self::Obj(n) => {
                let mut map = serde_json::Map::new();
                for (key, id) in n.entries() {
                    map.insert(key.to_owned(), child(id));
                }
                Value::Object(map)
            }
            Self::Vec(n) => Value::Array(
                (0..n.len())
                    .map(|i| n.get(i).map(&child).unwrap_or(Value::Null))
                    .collect(),
            ),
            Self::Str(n) => Value::String(n.text()),
            Self::Bin(n) => n.view(),
            Self::Arr(n) => Value::Array(n.items().into_iter().map(child).collect()),
        }
    }
}

// ── NodeIndex ─────────────────────────────────────────────────────────────

/// Map from creation id to CRDT node.
pub type NodeIndex = HashMap<Ts, Node>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::clock::{ts, tss};
    use serde_json::json;

    const A: u64 = 100_000;
    const B: u64 = 200_000;

    #[test]
    fn val_register_last_writer_wins() {
        let mut reg = ValNode::new(ts(A, 1));
        assert_eq!(reg.set(ts(A, 3), ts(A, 2)), Some(UNDEFINED));
        assert_eq!(reg.set(ts(B, 3), ts(B, 2)), Some(ts(A, 2)));
        assert_eq!(reg.set(ts(A, 3), ts(A, 9)), None);
        assert_eq!(reg.val, ts(B, 2));
    }

    #[test]
    fn obj_delete_hides_key_but_keeps_writer() {
        let mut obj = ObjNode::new(ts(A, 1));
        obj.put(ts(A, 5), "x", ts(A, 4));
        obj.put(ts(A, 7), "x", UNDEFINED);
        assert_eq!(obj.get("x"), None);
        assert_eq!(obj.entries().count(), 0);
        assert_eq!(obj.put(ts(A, 6), "x", ts(A, 2)), None);
        assert_eq!(obj.get("x"), None);
    }

    #[test]
    fn vec_slots_are_bounded() {
        let mut vec = VecNode::new(ts(A, 1), 2);
        assert!(vec.put(ts(A, 3), 1, ts(A, 2)).is_some());
        assert!(vec.put(ts(A, 4), 2, ts(A, 2)).is_none());
        assert_eq!(vec.get(0), None);
        assert_eq!(vec.get(1), Some(ts(A, 2)));
    }

    #[test]
    fn string_cache_follows_mutations() {
        let id = ts(A, 1);
        let mut node = StrNode::new(id);
        assert!(!node.is_dirty());
        node.ins(id, ts(A, 2), "héllo 😀");
        assert!(node.is_dirty());
        assert_eq!(node.text(), "héllo 😀");
        node.refresh_view();
        assert!(!node.is_dirty());
        assert_eq!(node.size(), 8);
        node.delete(&[tss(A, 8, 2)]);
        assert!(node.is_dirty());
        assert_eq!(node.text(), "héllo ");
    }

    #[test]
    fn arr_update_prefers_greater_value() {
        let id = ts(A, 1);
        let mut arr = ArrNode::new(id);
        arr.ins(id, ts(A, 3), &[ts(A, 2)]);
        assert_eq!(arr.upd(ts(A, 3), ts(B, 5)), Some(ts(A, 2)));
        assert_eq!(arr.upd(ts(A, 3), ts(A, 4)), None);
        assert_eq!(arr.get(ts(A, 3)), Some(ts(B, 5)));
        arr.delete(&[tss(A, 3, 1)]);
        assert_eq!(arr.upd(ts(A, 3), ts(B, 9)), None);
    }

    #[test]
    fn node_view_resolves_children() {
        let mut index = NodeIndex::new();
        let obj_id = ts(A, 1);
        let con_id = ts(A, 2);
        let str_id = ts(A, 3);
        let mut text = StrNode::new(str_id);
        text.ins(str_id, ts(A, 4), "hi");
        let mut obj = ObjNode::new(obj_id);
        obj.put(ts(A, 6), "n", con_id);
        obj.put(ts(A, 6), "s", str_id);
        obj.put(ts(A, 6), "gone", UNDEFINED);
        index.insert(con_id, Node::Con(ConNode::new(con_id, ConValue::Json(json!(7)))));
        index.insert(str_id, Node::Str(text));
        index.insert(obj_id, Node::Obj(obj));
        let view = index[&obj_id].view(&index);
        assert_eq!(view, json!({"n": 7, "s": "hi"}));
        assert_eq!(index[&obj_id].children().len(), 2);
    }

    #[test]
    fn self_referencing_register_terminates() {
        let mut index = NodeIndex::new();
        let id = ts(A, 1);
        let mut reg = ValNode::new(id);
        reg.set(ts(A, 2), id);
        index.insert(id, Node::Val(reg));
        assert_eq!(index[&id].view(&index), Value::Null);
    }
}
