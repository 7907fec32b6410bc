//! Schema builders for JSON CRDT document construction.
//!
//! A schema is a tree of [`NodeBuilder`]s; building it records the operations
//! that create the described node shape with a [`PatchBuilder`].

use crate::json_crdt_patch::clock::Ts;
use crate::json_crdt_patch::patch_builder::{BuildError, PatchBuilder};
use serde_json::Value;

// ── NodeBuilder ────────────────────────────────────────────────────────────

/// A composable schema node that knows how to build itself via a [`PatchBuilder`].
pub trait NodeBuilder: std::fmt::Debug {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError>;
}

// ── Concrete schema nodes ──────────────────────────────────────────────────

/// `con` constant schema node.
#[derive(Debug, Clone)]
pub struct ConSchema {
    pub raw: Value,
}

impl NodeBuilder for ConSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        builder.con(self.raw.clone())
    }
}

/// `str` schema node.
#[derive(Debug, Clone)]
pub struct StrSchema {
    pub raw: String,
}

impl NodeBuilder for StrSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        let id = builder.str_node()?;
        if !self.raw.is_empty() {
            builder.ins_str(id, id, self.raw.clone())?;
        }
        Ok(id)
    }
}

/// `bin` schema node.
#[derive(Debug, Clone)]
pub struct BinSchema {
    pub raw: Vec<u8>,
}

impl NodeBuilder for BinSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        let id = builder.bin()?;
        if !self.raw.is_empty() {
            builder.ins_bin(id, id, self.raw.clone())?;
        }
        Ok(id)
    }
}

/// `val` schema node wrapping another node.
#[derive(Debug)]
pub struct ValSchema {
    pub value: Box<dyn NodeBuilder>,
}

impl NodeBuilder for ValSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        let val_id = builder.val()?;
        let inner_id = self.value.build(builder)?;
        builder.set_val(val_id, inner_id)?;
        Ok(val_id)
    }
}

/// `vec` schema node; its arity is the number of slots, empty slots stay
/// unset.
#[derive(Debug)]
pub struct VecSchema {
    pub slots: Vec<Option<Box<dyn NodeBuilder>>>,
}

impl NodeBuilder for VecSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        let len = u8::try_from(self.slots.len()).map_err(|_| BuildError::TooManySlots {
            len: self.slots.len(),
        })?;
        let vec_id = builder.vec(len)?;
        let mut pairs: Vec<(u8, Ts)> = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(node) = slot {
                pairs.push((i as u8, node.build(builder)?));
            }
        }
        if !pairs.is_empty() {
            builder.ins_vec(vec_id, pairs)?;
        }
        Ok(vec_id)
    }
}

/// `obj` schema node.
#[derive(Debug)]
pub struct ObjSchema {
    pub entries: Vec<(String, Box<dyn NodeBuilder>)>,
}

impl NodeBuilder for ObjSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        let obj_id = builder.obj()?;
        let mut pairs: Vec<(String, Ts)> = Vec::with_capacity(self.entries.len());
        for (key, node) in &self.entries {
            pairs.push((key.clone(), node.build(builder)?));
        }
        if !pairs.is_empty() {
            builder.ins_obj(obj_id, pairs)?;
        }
        Ok(obj_id)
    }
}

/// `arr` schema node.
#[derive(Debug)]
pub struct ArrSchema {
    pub items: Vec<Box<dyn NodeBuilder>>,
}

impl NodeBuilder for ArrSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        let arr_id = builder.arr()?;
        if !self.items.is_empty() {
            let ids = self
                .items
                .iter()
                .map(|n| n.build(builder))
                .collect::<Result<Vec<_>, _>>()?;
            builder.ins_arr(arr_id, arr_id, ids)?;
        }
        Ok(arr_id)
    }
}

/// Arbitrary JSON, built with [`PatchBuilder::json`].
#[derive(Debug, Clone)]
pub struct JsonSchema {
    pub raw: Value,
}

impl NodeBuilder for JsonSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        builder.json(&self.raw)
    }
}

// ── Schema factory `s` ─────────────────────────────────────────────────────

/// Short constructors for schema nodes.
pub mod s {
    use super::*;

    pub fn con(raw: Value) -> Box<dyn NodeBuilder> {
        Box::new(ConSchema { raw })
    }
    pub fn str(raw: &str) -> Box<dyn NodeBuilder> {
        Box::new(StrSchema {
            raw: raw.to_owned(),
        })
    }
    pub fn bin(raw: Vec<u8>) -> Box<dyn NodeBuilder> {
        Box::new(BinSchema { raw })
    }
    pub fn val(value: Box<dyn NodeBuilder>) -> Box<dyn NodeBuilder> {
        Box::new(ValSchema { value })
    }
    pub fn vec(slots: Vec<Option<Box<dyn NodeBuilder>>>) -> Box<dyn NodeBuilder> {
        Box::new(VecSchema { slots })
    }
    pub fn obj(entries: Vec<(&str, Box<dyn NodeBuilder>)>) -> Box<dyn NodeBuilder> {
        Box::new(ObjSchema {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        })
    }
    pub fn arr(items: Vec<Box<dyn NodeBuilder>>) -> Box<dyn NodeBuilder> {
        Box::new(ArrSchema { items })
    }
    pub fn json(raw: Value) -> Box<dyn NodeBuilder> {
        Box::new(JsonSchema { raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::operations::Op;
    use serde_json::json;

    const SID: u64 = 100_000;

    #[test]
    fn con_node_builds() {
        let mut builder = PatchBuilder::new(SID, 0);
        s::con(json!(42)).build(&mut builder).unwrap();
        assert_eq!(builder.patch.ops.len(), 1);
    }

    #[test]
    fn str_node_builds_with_content() {
        let mut builder = PatchBuilder::new(SID, 0);
        s::str("hello").build(&mut builder).unwrap();
        assert_eq!(builder.patch.ops.len(), 2);
        s::str("").build(&mut builder).unwrap();
        assert_eq!(builder.patch.ops.len(), 3);
    }

    #[test]
    fn vec_with_too_many_slots_is_refused() {
        let mut builder = PatchBuilder::new(SID, 0);
        let slots = (0..256).map(|_| None).collect();
        assert_eq!(
            s::vec(slots).build(&mut builder).unwrap_err(),
            BuildError::TooManySlots { len: 256 }
        );
        assert!(builder.patch.ops.is_empty());

        let slots = (0..255).map(|_| None).collect();
        s::vec(slots).build(&mut builder).unwrap();
        assert_eq!(builder.patch.ops.len(), 1);
    }

    #[test]
    fn vec_arity_follows_slots() {
        let mut builder = PatchBuilder::new(SID, 0);
        s::vec(vec![None, Some(s::con(json!(true))), None])
            .build(&mut builder)
            .unwrap();
        assert_eq!(builder.patch.ops[0], Op::NewVec { id: crate::json_crdt_patch::clock::ts(SID, 0), len: 3 });
        match &builder.patch.ops[2] {
            Op::InsVec { data, .. } => assert_eq!(data[0].0, 1),
            other => panic!("unexpected op {other}"),
        }
    }

    #[test]
    fn obj_node_builds() {
        let mut builder = PatchBuilder::new(SID, 0);
        s::obj(vec![("name", s::str("Alice")), ("tags", s::arr(vec![]))])
            .build(&mut builder)
            .unwrap();
        let names: Vec<_> = builder.patch.ops.iter().map(|op| op.name()).collect();
        assert_eq!(names, vec!["new_obj", "new_str", "ins_str", "new_arr", "ins_obj"]);
    }
}
