#![allow(dead_code)]

use json_crdt_core::json_crdt::nodes::Node;
use json_crdt_core::{ApplyError, Model, Patch, Ts};
use serde_json::Value;

pub const A: u64 = 100_000;
pub const B: u64 = 200_000;
pub const C: u64 = 300_000;

/// A document owned by `A` whose root is `value`, plus forks for `sids`.
pub fn replicas(value: &Value, sids: &[u64]) -> (Model, Vec<Model>) {
    let mut base = Model::new(A);
    base.api().root(value).expect("seed document");
    let forks = sids.iter().map(|sid| base.fork(Some(*sid))).collect();
    (base, forks)
}

/// Id of the node at `path`.
pub fn at(model: &Model, path: &[Value]) -> Ts {
    model.find(path).expect("path resolves")
}

/// Id of the document's top node.
pub fn top(model: &Model) -> Ts {
    at(model, &[])
}

/// Runs one local edit and returns the patch it produced.
pub fn edit(model: &mut Model, f: impl FnOnce(&mut json_crdt_core::ModelApi<'_>)) -> Patch {
    let mut api = model.api();
    f(&mut api);
    api.flush()
}

/// Delivers `patches` in the given order, re-queueing any that arrive
/// before their dependencies. Panics if delivery stalls.
pub fn deliver(model: &mut Model, patches: &[Patch]) {
    let mut pending: Vec<&Patch> = patches.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut waiting = Vec::new();
        for patch in pending {
            match model.apply_patch(patch) {
                Ok(_) => {}
                Err(ApplyError::DanglingReference { .. }) => waiting.push(patch),
                Err(err) => panic!("patch rejected: {err}"),
            }
        }
        assert!(waiting.len() < before, "delivery stalled with {} patches", waiting.len());
        pending = waiting;
    }
}

/// Number of chunks (tombstones included) in a sequence node.
pub fn chunk_count(model: &Model, id: Ts) -> usize {
    match model.node(id) {
        Some(Node::Str(n)) => n.rga.chunks().count(),
        Some(Node::Bin(n)) => n.rga.chunks().count(),
        Some(Node::Arr(n)) => n.rga.chunks().count(),
        other => panic!("not a sequence: {other:?}"),
    }
}

pub fn assert_converged(models: &[&Model]) {
    let first = models[0].view();
    for model in &models[1..] {
        assert_eq!(model.view(), first, "replica {} diverged", model.sid());
    }
}
