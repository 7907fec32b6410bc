//! Local editing API.
//!
//! [`ModelApi`] turns position-based edits ("insert `"x"` at index 3") into
//! CRDT operations, applies them to the model right away and keeps them in
//! a pending [`Patch`] so they can be shipped to other replicas with
//! [`ModelApi::flush`].

use serde_json::Value;
use thiserror::Error;

use crate::json_crdt::model::{ApplyError, Model};
use crate::json_crdt::nodes::{Node, NodeKind};
use crate::json_crdt_patch::clock::{Ts, Tss};
use crate::json_crdt_patch::constants::{ORIGIN, UNDEFINED};
use crate::json_crdt_patch::patch::Patch;
use crate::json_crdt_patch::patch_builder::{BuildError, PatchBuilder};

/// Errors returned by the editing methods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("node {id} not found")]
    NotFound { id: Ts },
    #[error("path step {step:?} not found")]
    PathNotFound { step: String },
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },
    #[error("node {id} is a {found}, expected {expected}")]
    TypeMismatch {
        id: Ts,
        expected: NodeKind,
        found: NodeKind,
    },
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

// ── ModelApi ───────────────────────────────────────────────────────────────

/// Coordinates local edits of a document.
///
/// Every editing method is atomic: either all of its operations are applied
/// and recorded, or none are and the builder is rolled back.
pub struct ModelApi<'a> {
    /// Document being edited.
    pub model: &'a mut Model,
    /// Builder holding the operations applied since the last flush.
    pub builder: PatchBuilder,
}

impl<'a> ModelApi<'a> {
    /// The builder continues the model's local session from its current time.
    pub fn new(model: &'a mut Model) -> Self {
        let builder = PatchBuilder::from_clock_vector(&model.clock);
        Self { model, builder }
    }

    /// Returns the operations applied since the last flush and resets the
    /// pending patch.
    pub fn flush(&mut self) -> Patch {
        self.builder.flush()
    }

    /// Runs `edit` against the builder and applies what it recorded.
    fn transact<T>(
        &mut self,
        edit: impl FnOnce(&mut PatchBuilder) -> Result<T, BuildError>,
    ) -> Result<T, ApiError> {
        if self.model.clock.time > self.builder.clock.time {
            self.builder.clock.time = self.model.clock.time;
        }
        let start = self.builder.patch.ops.len();
        let time = self.builder.clock.time;
        let result = edit(&mut self.builder)
            .map_err(ApiError::from)
            .and_then(|value| {
                let patch = Patch {
                    ops: self.builder.patch.ops[start..].to_vec(),
                    meta: None,
                };
                self.model.apply_patch(&patch)?;
                Ok(value)
            });
        if result.is_err() {
            self.builder.patch.ops.truncate(start);
            self.builder.clock.time = time;
        }
        result
    }

    fn node(&self, id: Ts) -> Result<&Node, ApiError> {
        self.model.index.get(&id).ok_or(ApiError::NotFound { id })
    }

    fn expect(&self, id: Ts, expected: NodeKind) -> Result<&Node, ApiError> {
        let node = self.node(id)?;
        if node.kind() != expected {
            return Err(ApiError::TypeMismatch {
                id,
                expected,
                found: node.kind(),
            });
        }
        Ok(node)
    }

    // ── Val ───────────────────────────────────────────────────────────────

    /// Replaces the whole document with `json`. Returns the new top node.
    pub fn root(&mut self, json: &Value) -> Result<Ts, ApiError> {
        self.transact(|b| {
            let id = b.json(json)?;
            b.root(id)?;
            Ok(id)
        })
    }

    /// Points the `val` register `val_id` (or the root, for `ORIGIN`) at a
    /// new node built from `json`.
    pub fn val_set(&mut self, val_id: Ts, json: &Value) -> Result<Ts, ApiError> {
        if val_id != ORIGIN {
            self.expect(val_id, NodeKind::Val)?;
        }
        self.transact(|b| {
            let id = b.json(json)?;
            b.set_val(val_id, id)?;
            Ok(id)
        })
    }

    // ── Obj ───────────────────────────────────────────────────────────────

    /// Sets keys of an `obj` node. An empty `entries` is a no-op.
    pub fn obj_set(&mut self, obj_id: Ts, entries: &[(&str, Value)]) -> Result<(), ApiError> {
        self.expect(obj_id, NodeKind::Obj)?;
        if entries.is_empty() {
            return Ok(());
        }
        self.transact(|b| {
            let mut pairs = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                pairs.push(((*key).to_owned(), b.json(value)?));
            }
            b.ins_obj(obj_id, pairs)?;
            Ok(())
        })
    }

    /// Deletes keys of an `obj` node by writing `undefined` to them.
    pub fn obj_del(&mut self, obj_id: Ts, keys: &[&str]) -> Result<(), ApiError> {
        self.expect(obj_id, NodeKind::Obj)?;
        if keys.is_empty() {
            return Ok(());
        }
        let pairs = keys.iter().map(|key| ((*key).to_owned(), UNDEFINED)).collect();
        self.transact(|b| b.ins_obj(obj_id, pairs).map(|_| ()))
    }

    /// Whether `key` currently holds a value.
    pub fn obj_has(&self, obj_id: Ts, key: &str) -> bool {
        matches!(self.model.index.get(&obj_id), Some(Node::Obj(obj)) if obj.get(key).is_some())
    }

    // ── Vec ───────────────────────────────────────────────────────────────

    /// Writes slots of a `vec` node. Slots must be below the vector's arity.
    pub fn vec_set(&mut self, vec_id: Ts, entries: &[(u8, Value)]) -> Result<(), ApiError> {
        let len = match self.expect(vec_id, NodeKind::Vec)? {
            Node::Vec(vec) => vec.len(),
            _ => 0,
        };
        if let Some((index, _)) = entries.iter().find(|(index, _)| *index as usize >= len) {
            return Err(ApiError::OutOfBounds {
                index: *index as usize,
                len,
            });
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.transact(|b| {
            let mut pairs = Vec::with_capacity(entries.len());
            for (index, value) in entries {
                pairs.push((*index, b.json(value)?));
            }
            b.ins_vec(vec_id, pairs)?;
            Ok(())
        })
    }

    // ── Sequences ─────────────────────────────────────────────────────────

    /// Anchor for an insert at visible position `pos` and the sequence size.
    fn anchor(&self, id: Ts, kind: NodeKind, pos: usize) -> Result<Ts, ApiError> {
        let (size, found) = match self.expect(id, kind)? {
            Node::Str(n) => (n.size(), pos.checked_sub(1).and_then(|p| n.rga.find(p))),
            Node::Bin(n) => (n.size(), pos.checked_sub(1).and_then(|p| n.rga.find(p))),
            Node::Arr(n) => (n.size(), pos.checked_sub(1).and_then(|p| n.rga.find(p))),
            _ => (0, None),
        };
        if pos > size {
            return Err(ApiError::OutOfBounds { index: pos, len: size });
        }
        Ok(found.unwrap_or(id))
    }

    /// Id spans of the visible range `[pos, pos + len)`.
    fn interval(&self, id: Ts, kind: NodeKind, pos: usize, len: usize) -> Result<Vec<Tss>, ApiError> {
        let (size, spans) = match self.expect(id, kind)? {
            Node::Str(n) => (n.size(), n.rga.find_interval(pos, len)),
            Node::Bin(n) => (n.size(), n.rga.find_interval(pos, len)),
            Node::Arr(n) => (n.size(), n.rga.find_interval(pos, len)),
            _ => (0, Vec::new()),
        };
        if pos + len > size {
            return Err(ApiError::OutOfBounds {
                index: pos + len,
                len: size,
            });
        }
        Ok(spans)
    }

    /// Inserts `text` at UTF-16 position `pos` of a `str` node.
    pub fn str_ins(&mut self, str_id: Ts, pos: usize, text: &str) -> Result<(), ApiError> {
        let after = self.anchor(str_id, NodeKind::Str, pos)?;
        if text.is_empty() {
            return Ok(());
        }
        self.transact(|b| b.ins_str(str_id, after, text.to_owned()).map(|_| ()))
    }

    /// Deletes `len` UTF-16 code units starting at `pos` of a `str` node.
    pub fn str_del(&mut self, str_id: Ts, pos: usize, len: usize) -> Result<(), ApiError> {
        let spans = self.interval(str_id, NodeKind::Str, pos, len)?;
        if spans.is_empty() {
            return Ok(());
        }
        self.transact(|b| b.del(str_id, spans).map(|_| ()))
    }

    pub fn bin_ins(&mut self, bin_id: Ts, pos: usize, data: &[u8]) -> Result<(), ApiError> {
        let after = self.anchor(bin_id, NodeKind::Bin, pos)?;
        if data.is_empty() {
            return Ok(());
        }
        self.transact(|b| b.ins_bin(bin_id, after, data.to_vec()).map(|_| ()))
    }

    pub fn bin_del(&mut self, bin_id: Ts, pos: usize, len: usize) -> Result<(), ApiError> {
        let spans = self.interval(bin_id, NodeKind::Bin, pos, len)?;
        if spans.is_empty() {
            return Ok(());
        }
        self.transact(|b| b.del(bin_id, spans).map(|_| ()))
    }

    /// Inserts `values` at position `pos` of an `arr` node. Each value
    /// becomes a fresh node tree.
    pub fn arr_ins(&mut self, arr_id: Ts, pos: usize, values: &[Value]) -> Result<(), ApiError> {
        let after = self.anchor(arr_id, NodeKind::Arr, pos)?;
        if values.is_empty() {
            return Ok(());
        }
        self.transact(|b| {
            let ids = values
                .iter()
                .map(|value| b.json(value))
                .collect::<Result<Vec<_>, _>>()?;
            b.ins_arr(arr_id, after, ids)?;
            Ok(())
        })
    }

    pub fn arr_del(&mut self, arr_id: Ts, pos: usize, len: usize) -> Result<(), ApiError> {
        let spans = self.interval(arr_id, NodeKind::Arr, pos, len)?;
        if spans.is_empty() {
            return Ok(());
        }
        self.transact(|b| b.del(arr_id, spans).map(|_| ()))
    }

    /// Replaces the element at `pos` of an `arr` node, keeping its position.
    pub fn arr_upd(&mut self, arr_id: Ts, pos: usize, value: &Value) -> Result<Ts, ApiError> {
        let (size, slot) = match self.expect(arr_id, NodeKind::Arr)? {
            Node::Arr(n) => (n.size(), n.rga.find(pos)),
            _ => (0, None),
        };
        let slot = slot.ok_or(ApiError::OutOfBounds {
            index: pos,
            len: size,
        })?;
        self.transact(|b| {
            let id = b.json(value)?;
            b.upd_arr(arr_id, slot, id)?;
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const A: u64 = 100_000;
    const B: u64 = 200_000;

    #[test]
    fn edits_apply_immediately() {
        let mut model = Model::new(A);
        let mut api = model.api();
        let obj = api.root(&json!({"title": "hi", "tags": []})).unwrap();
        let title = api.model.find(&[json!("title")]).unwrap();
        api.str_ins(title, 2, "!").unwrap();
        let tags = api.model.find(&[json!("tags")]).unwrap();
        api.arr_ins(tags, 0, &[json!("a"), json!(1)]).unwrap();
        api.obj_set(obj, &[("n", json!(3))]).unwrap();
        api.obj_del(obj, &["title"]).unwrap();
        assert!(!api.obj_has(obj, "title"));
        assert_eq!(model.view(), json!({"tags": ["a", 1], "n": 3}));
    }

    #[test]
    fn flushed_patch_replays_on_another_replica() {
        let mut model = Model::new(A);
        let patch = {
            let mut api = model.api();
            let s = api.root(&json!("hello")).unwrap();
            api.str_del(s, 1, 3).unwrap();
            api.str_ins(s, 1, "EL").unwrap();
            api.flush()
        };
        assert_eq!(model.view(), json!("hELo"));

        let mut other = Model::new(B);
        other.apply_patch(&patch).unwrap();
        assert_eq!(other.view(), model.view());
    }

    #[test]
    fn out_of_bounds_leaves_builder_clean() {
        let mut model = Model::new(A);
        let mut api = model.api();
        let s = api.root(&json!("ab")).unwrap();
        let before = api.builder.patch.ops.len();
        assert_eq!(
            api.str_ins(s, 5, "x"),
            Err(ApiError::OutOfBounds { index: 5, len: 2 })
        );
        assert_eq!(
            api.str_del(s, 1, 2),
            Err(ApiError::OutOfBounds { index: 3, len: 2 })
        );
        assert_eq!(api.builder.patch.ops.len(), before);
    }

    #[test]
    fn wrong_kind_is_reported() {
        let mut model = Model::new(A);
        let mut api = model.api();
        let arr = api.root(&json!([1])).unwrap();
        assert_eq!(
            api.str_ins(arr, 0, "x"),
            Err(ApiError::TypeMismatch {
                id: arr,
                expected: NodeKind::Str,
                found: NodeKind::Arr
            })
        );
    }

    #[test]
    fn vec_and_arr_updates() {
        let mut model = Model::new(A);
        let mut b = PatchBuilder::from_clock_vector(&model.clock);
        let vec = b.vec(2).unwrap();
        b.root(vec).unwrap();
        model.apply_patch(&b.flush()).unwrap();

        let mut api = model.api();
        api.vec_set(vec, &[(0, json!(true))]).unwrap();
        assert_eq!(
            api.vec_set(vec, &[(2, json!(1))]),
            Err(ApiError::OutOfBounds { index: 2, len: 2 })
        );
        let arr = api.root(&json!([1, 2, 3])).unwrap();
        api.arr_upd(arr, 1, &json!("two")).unwrap();
        api.arr_del(arr, 0, 1).unwrap();
        assert_eq!(api.model.view(), json!(["two", 3]));
        assert!(matches!(
            api.arr_upd(arr, 9, &json!(0)),
            Err(ApiError::OutOfBounds { index: 9, .. })
        ));
    }

    #[test]
    fn binary_edits() {
        let mut model = Model::new(A);
        let mut b = PatchBuilder::from_clock_vector(&model.clock);
        let bin = b.bin().unwrap();
        b.root(bin).unwrap();
        model.apply_patch(&b.flush()).unwrap();

        let mut api = model.api();
        api.bin_ins(bin, 0, &[1, 2, 5]).unwrap();
        api.bin_ins(bin, 2, &[3, 4]).unwrap();
        api.bin_del(bin, 0, 1).unwrap();
        match api.model.node(bin) {
            Some(Node::Bin(node)) => assert_eq!(node.bytes(), vec![2, 3, 4, 5]),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn clock_ceiling_rolls_back() {
        let mut model = Model::with_config(&crate::json_crdt::model::ModelConfig {
            session: Some(A),
            clock: crate::json_crdt_patch::clock::ClockConfig { max_time: 4 },
        });
        let mut api = model.api();
        let s = api.root(&json!("")).unwrap();
        let time = api.builder.clock.time;
        assert!(api.str_ins(s, 0, "too long").is_err());
        assert_eq!(api.builder.clock.time, time);
        assert_eq!(api.model.view(), json!(""));
    }
}
