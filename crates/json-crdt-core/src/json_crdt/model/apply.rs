//! Patch application.
//!
//! A patch is applied in two phases. The check phase resolves every
//! reference against the index plus whatever earlier operations of the same
//! patch are about to create; only if all of them resolve does the commit
//! phase mutate the document. A rejected patch leaves the model untouched.

use std::collections::{BTreeSet, HashMap};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::json_crdt::model::Model;
use crate::json_crdt::nodes::{ArrNode, BinNode, ConNode, Node, NodeKind, ObjNode, StrNode, ValNode, VecNode};
use crate::json_crdt_patch::clock::{ClockOverflow, Ts, Tss};
use crate::json_crdt_patch::constants::{ORIGIN, UNDEFINED};
use crate::json_crdt_patch::operations::Op;
use crate::json_crdt_patch::patch::{Patch, PatchError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("malformed patch: {0}")]
    MalformedPatch(#[from] PatchError),
    #[error("operation references unknown identity {id}")]
    DanglingReference { id: Ts },
    #[error("node {id} is a {found}, expected {expected}")]
    TypeMismatch {
        id: Ts,
        expected: NodeKind,
        found: NodeKind,
    },
    #[error(transparent)]
    ClockOverflow(#[from] ClockOverflow),
}

/// Outcome of a successful [`Model::apply_patch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations that changed (or were eligible to change) the document.
    pub applied: usize,
    /// Operations skipped because their ids had already been applied.
    pub skipped: usize,
    /// Nodes created by the applied operations.
    pub created: usize,
}

impl ApplyReport {
    /// Returns `true` when the whole patch had been seen before.
    pub fn is_noop(&self) -> bool {
        self.applied == 0
    }
}

// ── Check phase ─────────────────────────────────────────────────────────────

/// What earlier operations of the patch being checked will create.
#[derive(Default)]
struct Staging {
    nodes: HashMap<Ts, (NodeKind, u8)>,
    elements: HashMap<Ts, Vec<Tss>>,
}

impl Staging {
    fn covers(&self, obj: Ts, id: Ts) -> Option<u64> {
        self.elements.get(&obj)?.iter().find_map(|s| {
            (s.sid == id.sid && s.time <= id.time && id.time < s.time + s.span)
                .then_some(s.time + s.span)
        })
    }
}

struct Checker<'a> {
    model: &'a Model,
    staging: Staging,
}

impl<'a> Checker<'a> {
    fn new(model: &'a Model) -> Self {
        Self {
            model,
            staging: Staging::default(),
        }
    }

    /// Kind (and vector arity) of an existing or staged node.
    fn kind_of(&self, id: Ts) -> Option<(NodeKind, u8)> {
        if let Some(node) = self.model.index.get(&id) {
            let len = match node {
                Node::Vec(v) => v.len() as u8,
                _ => 0,
            };
            return Some((node.kind(), len));
        }
        self.staging.nodes.get(&id).copied()
    }

    fn expect(&self, id: Ts, expected: NodeKind) -> Result<u8, ApplyError> {
        match self.kind_of(id) {
            None => Err(ApplyError::DanglingReference { id }),
            Some((found, _)) if found != expected => Err(ApplyError::TypeMismatch {
                id,
                expected,
                found,
            }),
            Some((_, len)) => Ok(len),
        }
    }

    fn value(&self, id: Ts) -> Result<(), ApplyError> {
        match self.kind_of(id) {
            Some(_) => Ok(()),
            None => Err(ApplyError::DanglingReference { id }),
        }
    }

    fn value_or_undefined(&self, id: Ts) -> Result<(), ApplyError> {
        if id == UNDEFINED {
            return Ok(());
        }
        self.value(id)
    }

    /// End of the run of known elements of `obj` starting at `id`.
    fn element_run_end(&self, obj: Ts, id: Ts) -> Option<u64> {
        let committed = match self.model.index.get(&obj) {
            Some(Node::Str(n)) => n.rga.run_end(id),
            Some(Node::Bin(n)) => n.rga.run_end(id),
            Some(Node::Arr(n)) => n.rga.run_end(id),
            _ => None,
        };
        committed.or_else(|| self.staging.covers(obj, id))
    }

    fn anchor(&self, obj: Ts, after: Ts) -> Result<(), ApplyError> {
        if after == obj || self.element_run_end(obj, after).is_some() {
            return Ok(());
        }
        Err(ApplyError::DanglingReference { id: after })
    }

    fn span(&self, obj: Ts, span: &Tss) -> Result<(), ApplyError> {
        let end = span.time + span.span;
        let mut time = span.time;
        while time < end {
            let id = Ts::new(span.sid, time);
            time = self
                .element_run_end(obj, id)
                .ok_or(ApplyError::DanglingReference { id })?;
        }
        Ok(())
    }

    fn sequence(&self, obj: Ts) -> Result<NodeKind, ApplyError> {
        match self.kind_of(obj) {
            None => Err(ApplyError::DanglingReference { id: obj }),
            Some((kind @ (NodeKind::Str | NodeKind::Bin | NodeKind::Arr), _)) => Ok(kind),
            Some((found, _)) => Err(ApplyError::TypeMismatch {
                id: obj,
                expected: NodeKind::Arr,
                found,
            }),
        }
    }

    fn check(&mut self, op: &Op) -> Result<(), ApplyError> {
        match op {
            Op::NewCon { id, .. } => self.stage(*id, NodeKind::Con, 0),
            Op::NewVal { id } => self.stage(*id, NodeKind::Val, 0),
            Op::NewObj { id } => self.stage(*id, NodeKind::Obj, 0),
            Op::NewVec { id, len } => self.stage(*id, NodeKind::Vec, *len),
            Op::NewStr { id } => self.stage(*id, NodeKind::Str, 0),
            Op::NewBin { id } => self.stage(*id, NodeKind::Bin, 0),
            Op::NewArr { id } => self.stage(*id, NodeKind::Arr, 0),
            Op::InsVal { obj, val, .. } => {
                if *obj != ORIGIN {
                    self.expect(*obj, NodeKind::Val)?;
                }
                self.value_or_undefined(*val)?;
            }
            Op::InsObj { obj, data, .. } => {
                self.expect(*obj, NodeKind::Obj)?;
                for (_, val) in data {
                    self.value_or_undefined(*val)?;
                }
            }
            Op::InsVec { id, obj, data } => {
                let len = self.expect(*obj, NodeKind::Vec)?;
                for (index, val) in data {
                    if *index >= len {
                        return Err(PatchError::SlotOutOfRange {
                            id: *id,
                            index: *index,
                            len,
                        }
                        .into());
                    }
                    self.value_or_undefined(*val)?;
                }
            }
            Op::InsStr { id, obj, after, .. } => {
                self.expect(*obj, NodeKind::Str)?;
                self.anchor(*obj, *after)?;
                self.stage_elements(*obj, *id, op.span());
            }
            Op::InsBin { id, obj, after, .. } => {
                self.expect(*obj, NodeKind::Bin)?;
                self.anchor(*obj, *after)?;
                self.stage_elements(*obj, *id, op.span());
            }
            Op::InsArr {
                id,
                obj,
                after,
                data,
            } => {
                self.expect(*obj, NodeKind::Arr)?;
                self.anchor(*obj, *after)?;
                for val in data {
                    self.value(*val)?;
                }
                self.stage_elements(*obj, *id, op.span());
            }
            Op::UpdArr { obj, after, val, .. } => {
                self.expect(*obj, NodeKind::Arr)?;
                if self.element_run_end(*obj, *after).is_none() {
                    return Err(ApplyError::DanglingReference { id: *after });
                }
                self.value(*val)?;
            }
            Op::Del { obj, what, .. } => {
                self.sequence(*obj)?;
                for span in what {
                    self.span(*obj, span)?;
                }
            }
            Op::Nop { .. } => {}
        }
        Ok(())
    }

    fn stage(&mut self, id: Ts, kind: NodeKind, len: u8) {
        self.staging.nodes.entry(id).or_insert((kind, len));
    }

    fn stage_elements(&mut self, obj: Ts, id: Ts, span: u64) {
        self.staging
            .elements
            .entry(obj)
            .or_default()
            .push(Tss::new(id.sid, id.time, span));
    }
}

// ── Commit phase ────────────────────────────────────────────────────────────

fn patch_label(patch: &Patch) -> String {
    match patch.get_id() {
        Some(id) => format!("{}!{}", id, patch.span()),
        None => "(nil)".to_owned(),
    }
}

impl Model {
    /// Applies a patch received from any replica (including this one).
    ///
    /// Operations whose ids were already applied are skipped, so duplicate
    /// delivery is harmless. Every remaining operation must reference nodes
    /// and elements that already exist or are created earlier in the same
    /// patch; otherwise the patch is rejected as a whole and may be
    /// re-delivered once its dependencies have arrived.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<ApplyReport, ApplyError> {
        let result = self.try_apply(patch);
        if let Err(err) = &result {
            warn!("rejected patch {}: {}", patch_label(patch), err);
        }
        result
    }

    fn try_apply(&mut self, patch: &Patch) -> Result<ApplyReport, ApplyError> {
        patch.validate()?;

        let mut report = ApplyReport::default();
        let mut fresh: Vec<&Op> = Vec::with_capacity(patch.ops.len());
        for op in &patch.ops {
            let id = op.id();
            let span = op.span();
            if self.clock.seen.contains(id.sid, id.time, span) {
                trace!("skipping already applied {}", op);
                report.skipped += 1;
                continue;
            }
            if self.clock.seen.overlaps(id.sid, id.time, span) {
                return Err(PatchError::PartialOverlap { id }.into());
            }
            fresh.push(op);
        }
        let Some(last) = fresh.last() else {
            trace!("patch {} already applied", patch_label(patch));
            return Ok(report);
        };

        let end = last.id().time + last.span();
        if end > self.clock.max_time {
            return Err(ClockOverflow {
                sid: last.id().sid,
                time: last.id().time,
            }
            .into());
        }

        let mut checker = Checker::new(self);
        for op in &fresh {
            checker.check(op)?;
        }

        let mut dirty: BTreeSet<Ts> = BTreeSet::new();
        for op in &fresh {
            self.commit(op);
            if op.is_creation() {
                report.created += 1;
            } else if let Some(obj) = op.target() {
                if self.index.get(&obj).is_some_and(Node::is_dirty) {
                    dirty.insert(obj);
                }
            }
            let id = op.id();
            self.clock.observe(id, op.span())?;
            self.clock.seen.insert(id.sid, id.time, op.span());
            report.applied += 1;
        }
        for id in dirty {
            if let Some(node) = self.index.get_mut(&id) {
                node.refresh_view();
            }
        }
        self.tick += 1;
        debug!(
            "applied patch {}: {} ops, {} skipped, clock at {}",
            patch_label(patch),
            report.applied,
            report.skipped,
            self.clock.time
        );
        Ok(report)
    }

    /// Performs one checked operation.
    fn commit(&mut self, op: &Op) {
        match op {
            // ── Creation operations ────────────────────────────────────────
            Op::NewCon { id, val } => {
                self.index
                    .entry(*id)
                    .or_insert_with(|| Node::Con(ConNode::new(*id, val.clone())));
            }
            Op::NewVal { id } => {
                self.index
                    .entry(*id)
                    .or_insert_with(|| Node::Val(ValNode::new(*id)));
            }
            Op::NewObj { id } => {
                self.index
                    .entry(*id)
                    .or_insert_with(|| Node::Obj(ObjNode::new(*id)));
            }
            Op::NewVec { id, len } => {
                self.index
                    .entry(*id)
                    .or_insert_with(|| Node::Vec(VecNode::new(*id, *len)));
            }
            Op::NewStr { id } => {
                self.index
                    .entry(*id)
                    .or_insert_with(|| Node::Str(StrNode::new(*id)));
            }
            Op::NewBin { id } => {
                self.index
                    .entry(*id)
                    .or_insert_with(|| Node::Bin(BinNode::new(*id)));
            }
            Op::NewArr { id } => {
                self.index
                    .entry(*id)
                    .or_insert_with(|| Node::Arr(ArrNode::new(*id)));
            }

            // ── Mutation operations ────────────────────────────────────────
            Op::InsVal { id, obj, val } => {
                if *obj == ORIGIN {
                    self.root.set(*id, *val);
                } else if let Some(Node::Val(reg)) = self.index.get_mut(obj) {
                    reg.set(*id, *val);
                }
            }
            Op::InsObj { id, obj, data } => {
                if let Some(Node::Obj(map)) = self.index.get_mut(obj) {
                    for (key, val) in data {
                        map.put(*id, key, *val);
                    }
                }
            }
            Op::InsVec { id, obj, data } => {
                if let Some(Node::Vec(vec)) = self.index.get_mut(obj) {
                    for (index, val) in data {
                        vec.put(*id, *index as usize, *val);
                    }
                }
            }
            Op::InsStr {
                id,
                obj,
                after,
                data,
            } => {
                if let Some(Node::Str(node)) = self.index.get_mut(obj) {
                    node.ins(*after, *id, data);
                }
            }
            Op::InsBin {
                id,
                obj,
                after,
                data,
            } => {
                if let Some(Node::Bin(node)) = self.index.get_mut(obj) {
                    node.ins(*after, *id, data);
                }
            }
            Op::InsArr {
                id,
                obj,
                after,
                data,
            } => {
                if let Some(Node::Arr(node)) = self.index.get_mut(obj) {
                    node.ins(*after, *id, data);
                }
            }
            Op::UpdArr { obj, after, val, .. } => {
                if let Some(Node::Arr(node)) = self.index.get_mut(obj) {
                    node.upd(*after, *val);
                }
            }
            Op::Del { obj, what, .. } => {
                match self.index.get_mut(obj) {
                    Some(Node::Str(node)) => {
                        node.delete(what);
                    }
                    Some(Node::Bin(node)) => {
                        node.delete(what);
                    }
                    Some(Node::Arr(node)) => {
                        node.delete(what);
                    }
                    _ => {}
                }
            }
            Op::Nop { .. } => {}
        }
    }
}
