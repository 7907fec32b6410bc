//! Extension registry.
//!
//! Extensions add higher-level semantics on top of the base node types. An
//! extension node is a `vec` with two slots:
//!
//! ```text
//! vec
//! ├─ 0: con [<ext_id>, <sid % 256>, <time % 256>]
//! └─ 1: any   (extension data)
//! ```
//!
//! where `sid` and `time` come from the id of the `vec` itself, so a header
//! copied into an unrelated vector is not mistaken for an extension node.
//! Each extension has an 8-bit id; at most 256 can be registered at once.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::json_crdt::model::{Model, ModelApi};
use crate::json_crdt::nodes::{Node, MAX_VIEW_DEPTH};
use crate::json_crdt_patch::clock::Ts;
use crate::json_crdt_patch::operations::ConValue;
use crate::json_crdt_patch::patch_builder::{BuildError, PatchBuilder};
use crate::json_crdt_patch::schema::NodeBuilder;

// ── Extension ─────────────────────────────────────────────────────────────

/// A registered extension type.
pub trait Extension: Send + Sync {
    /// Globally unique 8-bit id.
    fn id(&self) -> u8;

    fn name(&self) -> &str;

    /// Schema of the data slot for a fresh node initialised from `init`.
    fn schema(&self, init: &Value) -> Box<dyn NodeBuilder>;

    /// Logical view of an extension node.
    fn view(&self, model: &Model, node: &ExtNode) -> Value;

    /// Schema of a complete extension node (header plus data).
    fn new_node(&self, init: &Value) -> ExtSchema {
        ExtSchema {
            ext: self.id(),
            data: self.schema(init),
        }
    }
}

/// A `vec` recognised as an extension node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtNode {
    /// Id of the wrapping `vec`.
    pub id: Ts,
    pub ext: u8,
    /// Id of the data node in slot 1.
    pub data: Ts,
}

/// Editing handle for one extension node.
pub struct ExtApi<'a, 'm> {
    pub node: ExtNode,
    pub api: &'a mut ModelApi<'m>,
}

/// Schema that builds `vec[header, data]` for extension `ext`.
#[derive(Debug)]
pub struct ExtSchema {
    pub ext: u8,
    pub data: Box<dyn NodeBuilder>,
}

fn header(ext: u8, id: Ts) -> Value {
    json!([ext, id.sid % 256, id.time % 256])
}

impl NodeBuilder for ExtSchema {
    fn build(&self, builder: &mut PatchBuilder) -> Result<Ts, BuildError> {
        let id = builder.vec(2)?;
        let head = builder.con(header(self.ext, id))?;
        let data = self.data.build(builder)?;
        builder.ins_vec(id, vec![(0, head), (1, data)])?;
        Ok(id)
    }
}

// ── Extensions registry ───────────────────────────────────────────────────

/// Registry of known extensions, keyed by id.
#[derive(Default)]
pub struct Extensions {
    ext: HashMap<u8, Box<dyn Extension>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extension, replacing any previous one with the same id.
    pub fn register(&mut self, ext: Box<dyn Extension>) {
        self.ext.insert(ext.id(), ext);
    }

    pub fn get(&self, id: u8) -> Option<&dyn Extension> {
        self.ext.get(&id).map(|e| e.as_ref())
    }

    pub fn size(&self) -> usize {
        self.ext.len()
    }

    /// Recognises the node `id` as a node of a registered extension.
    pub fn node(&self, model: &Model, id: Ts) -> Option<ExtNode> {
        let Some(Node::Vec(vec)) = model.index.get(&id) else {
            return None;
        };
        if vec.len() != 2 {
            return None;
        }
        let Some(Node::Con(con)) = model.index.get(&vec.get(0)?) else {
            return None;
        };
        let ConValue::Json(Value::Array(head)) = &con.val else {
            return None;
        };
        let ext = head.first()?.as_u64()?;
        let ext = u8::try_from(ext).ok()?;
        if Value::Array(head.clone()) != header(ext, id) || !self.ext.contains_key(&ext) {
            return None;
        }
        Some(ExtNode {
            id,
            ext,
            data: vec.get(1)?,
        })
    }

    /// Editing handle for the extension node `id`.
    pub fn api<'a, 'm>(&self, api: &'a mut ModelApi<'m>, id: Ts) -> Option<ExtApi<'a, 'm>> {
        let node = self.node(&*api.model, id)?;
        Some(ExtApi { node, api })
    }

    /// Document view where every extension node renders through its
    /// extension instead of as a raw `vec`.
    pub fn view(&self, model: &Model) -> Value {
        self.view_of(model, model.root.val, 0)
    }

    fn view_of(&self, model: &Model, id: Ts, depth: usize) -> Value {
        if depth > MAX_VIEW_DEPTH {
            return Value::Null;
        }
        if let Some(node) = self.node(model, id) {
            if let Some(ext) = self.get(node.ext) {
                return ext.view(model, &node);
            }
        }
        let child = |id: Ts| self.view_of(model, id, depth + 1);
        match model.index.get(&id) {
            None => Value::Null,
            Some(Node::Val(reg)) => child(reg.val),
            Some(Node::Obj(obj)) => Value::Object(
                obj.entries()
                    .map(|(key, id)| (key.to_owned(), child(id)))
                    .collect(),
            ),
            Some(Node::Vec(vec)) => Value::Array(
                (0..vec.len())
                    .map(|i| vec.get(i).map(&child).unwrap_or(Value::Null))
                    .collect(),
            ),
            Some(Node::Arr(arr)) => Value::Array(arr.items().into_iter().map(child).collect()),
            Some(node) => node.view(&model.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::schema::s;

    const A: u64 = 100_000;

    /// Wraps a string; renders it upper-cased.
    struct Shout;

    impl Extension for Shout {
        fn id(&self) -> u8 {
            7
        }
        fn name(&self) -> &str {
            "shout"
        }
        fn schema(&self, init: &Value) -> Box<dyn NodeBuilder> {
            s::str(init.as_str().unwrap_or_default())
        }
        fn view(&self, model: &Model, node: &ExtNode) -> Value {
            match model.value_view(node.data) {
                Value::String(text) => Value::String(text.to_uppercase()),
                other => other,
            }
        }
    }

    fn model_with_ext() -> (Model, Ts) {
        let mut model = Model::new(A);
        let mut b = PatchBuilder::from_clock_vector(&model.clock);
        let ext = Shout.new_node(&json!("hey")).build(&mut b).unwrap();
        let obj = b.obj().unwrap();
        b.ins_obj(obj, vec![("greeting".to_owned(), ext)]).unwrap();
        b.root(obj).unwrap();
        model.apply_patch(&b.flush()).unwrap();
        (model, ext)
    }

    #[test]
    fn register_and_lookup() {
        let mut exts = Extensions::new();
        assert_eq!(exts.size(), 0);
        exts.register(Box::new(Shout));
        exts.register(Box::new(Shout));
        assert_eq!(exts.size(), 1);
        assert_eq!(exts.get(7).map(|e| e.name()), Some("shout"));
        assert!(exts.get(8).is_none());
    }

    #[test]
    fn recognises_extension_nodes() {
        let (model, ext) = model_with_ext();
        let mut exts = Extensions::new();
        assert_eq!(exts.node(&model, ext), None);
        exts.register(Box::new(Shout));
        let node = exts.node(&model, ext).unwrap();
        assert_eq!(node.ext, 7);
        assert_eq!(model.value_view(node.data), json!("hey"));
        assert_eq!(exts.node(&model, model.root.val), None);
    }

    #[test]
    fn view_renders_through_extension() {
        let (mut model, ext) = model_with_ext();
        let mut exts = Extensions::new();
        exts.register(Box::new(Shout));
        assert_eq!(exts.view(&model), json!({"greeting": "HEY"}));
        assert_eq!(model.view()["greeting"][0], json!([7, A % 256, ext.time % 256]));

        let mut api = model.api();
        let mut handle = exts.api(&mut api, ext).unwrap();
        let data = handle.node.data;
        handle.api.str_ins(data, 3, "!").unwrap();
        assert_eq!(exts.view(&model), json!({"greeting": "HEY!"}));
    }
}
