//! Verbose JSON snapshot codec.
//!
//! ```json
//! {
//!   "clock": {"sid": 65536, "time": 9, "max_time": .., "peers": [..], "seen": {..}},
//!   "root": {"writer": {"sid": .., "time": ..}, "val": {..}},
//!   "nodes": [{"type": "str", "id": {..}, "chunks": [..]}, ..]
//! }
//! ```
//!
//! Nodes are listed in id order and sequence chunks in view order, so
//! encoding the same document twice yields the same bytes.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{CodecError, ModelCodec};
use crate::json_crdt::model::Model;
use crate::json_crdt::nodes::rga::Rga;
use crate::json_crdt::nodes::{
    ArrNode, BinNode, ConNode, Node, NodeIndex, ObjNode, Slot, StrNode, ValNode, VecNode,
};
use crate::json_crdt_patch::clock::{ClockVector, SpanLedger, Ts};
use crate::json_crdt_patch::constants::ORIGIN;
use crate::json_crdt_patch::operations::ConValue;

#[derive(Debug, Clone, Copy, Default)]
pub struct VerboseCodec {
    /// Indent the output.
    pub pretty: bool,
}

impl VerboseCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

// ── Snapshot types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    clock: ClockSnapshot,
    root: Slot,
    nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClockSnapshot {
    sid: u64,
    time: u64,
    max_time: u64,
    peers: Vec<Ts>,
    /// Inclusive `(first, last)` ranges of applied ids per session.
    seen: BTreeMap<u64, Vec<(u64, u64)>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ChunkSnapshot<T> {
    id: Ts,
    span: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    deleted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    data: Vec<T>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum NodeSnapshot {
    Con { id: Ts, value: ConValue },
    Val { id: Ts, writer: Ts, val: Ts },
    Obj { id: Ts, keys: BTreeMap<String, Slot> },
    Vec { id: Ts, slots: Vec<Option<Slot>> },
    Str { id: Ts, chunks: Vec<ChunkSnapshot<u16>> },
    Bin { id: Ts, chunks: Vec<ChunkSnapshot<u8>> },
    Arr { id: Ts, chunks: Vec<ChunkSnapshot<Ts>> },
}

// ── Encode ──────────────────────────────────────────────────────────────────

fn encode_clock(clock: &ClockVector) -> ClockSnapshot {
    let mut peers: Vec<Ts> = clock.peers.values().copied().collect();
    peers.sort_by_key(|p| p.sid);
    let seen = clock
        .seen
        .sessions()
        .map(|sid| (sid, clock.seen.ranges(sid).to_vec()))
        .collect();
    ClockSnapshot {
        sid: clock.sid,
        time: clock.time,
        max_time: clock.max_time,
        peers,
        seen,
    }
}

fn encode_chunks<T: Clone>(rga: &Rga<T>) -> Vec<ChunkSnapshot<T>> {
    rga.chunks()
        .map(|chunk| ChunkSnapshot {
            id: chunk.id,
            span: chunk.span,
            deleted: chunk.deleted,
            data: chunk.data.clone(),
        })
        .collect()
}

fn encode_node(node: &Node) -> NodeSnapshot {
    match node {
        Node::Con(n) => NodeSnapshot::Con {
            id: n.id,
            value: n.val.clone(),
        },
        Node::Val(n) => NodeSnapshot::Val {
            id: n.id,
            writer: n.writer,
            val: n.val,
        },
        Node::Obj(n) => NodeSnapshot::Obj {
            id: n.id,
            keys: n.keys.clone(),
        },
        Node::Vec(n) => NodeSnapshot::Vec {
            id: n.id,
            slots: n.slots.clone(),
        },
        Node::Str(n) => NodeSnapshot::Str {
            id: n.id,
            chunks: encode_chunks(&n.rga),
        },
        Node::Bin(n) => NodeSnapshot::Bin {
            id: n.id,
            chunks: encode_chunks(&n.rga),
        },
        Node::Arr(n) => NodeSnapshot::Arr {
            id: n.id,
            chunks: encode_chunks(&n.rga),
        },
    }
}

fn snapshot(model: &Model) -> Snapshot {
    let mut nodes: Vec<&Node> = model.index.values().collect();
    nodes.sort_by_key(|n| n.id());
    Snapshot {
        clock: encode_clock(&model.clock),
        root: Slot {
            writer: model.root.writer,
            val: model.root.val,
        },
        nodes: nodes.into_iter().map(encode_node).collect(),
    }
}

// ── Decode ──────────────────────────────────────────────────────────────────

fn invalid(msg: impl Into<String>) -> CodecError {
    CodecError::InvalidSnapshot(msg.into())
}

fn decode_clock(snap: ClockSnapshot) -> Result<ClockVector, CodecError> {
    if snap.time > snap.max_time {
        return Err(invalid(format!(
            "clock time {} is past the ceiling {}",
            snap.time, snap.max_time
        )));
    }
    let mut seen = SpanLedger::new();
    for (sid, ranges) in snap.seen {
        for (first, last) in ranges {
            let span = last
                .checked_sub(first)
                .and_then(|d| d.checked_add(1))
                .ok_or_else(|| invalid(format!("ledger range {first}..{last} of {sid}")))?;
            seen.insert(sid, first, span);
        }
    }
    Ok(ClockVector {
        sid: snap.sid,
        time: snap.time,
        peers: snap.peers.into_iter().map(|p| (p.sid, p)).collect(),
        seen,
        max_time: snap.max_time,
    })
}

fn decode_chunks<T: Clone>(id: Ts, chunks: Vec<ChunkSnapshot<T>>) -> Result<Rga<T>, CodecError> {
    let mut starts = HashSet::with_capacity(chunks.len());
    for chunk in &chunks {
        if chunk.span == 0
            || chunk.id.time.checked_add(chunk.span).is_none()
            || !starts.insert(chunk.id)
        {
            return Err(invalid(format!("bad chunk {} in {}", chunk.id, id)));
        }
        if !chunk.deleted && chunk.data.len() as u64 != chunk.span {
            return Err(invalid(format!(
                "chunk {} in {} holds {} elements, expected {}",
                chunk.id,
                id,
                chunk.data.len(),
                chunk.span
            )));
        }
    }
    Ok(Rga::from_chunks(
        id,
        chunks
            .into_iter()
            .map(|c| (c.id, c.span, c.deleted, c.data)),
    ))
}

fn decode_node(snap: NodeSnapshot) -> Result<Node, CodecError> {
    Ok(match snap {
        NodeSnapshot::Con { id, value } => Node::Con(ConNode::new(id, value)),
        NodeSnapshot::Val { id, writer, val } => Node::Val(ValNode { id, writer, val }),
        NodeSnapshot::Obj { id, keys } => Node::Obj(ObjNode { id, keys }),
        NodeSnapshot::Vec { id, slots } => {
            if slots.len() > u8::MAX as usize {
                return Err(invalid(format!("vector {id} has {} slots", slots.len())));
            }
            Node::Vec(VecNode { id, slots })
        }
        NodeSnapshot::Str { id, chunks } => Node::Str(StrNode::from_rga(decode_chunks(id, chunks)?)),
        NodeSnapshot::Bin { id, chunks } => Node::Bin(BinNode::from_rga(decode_chunks(id, chunks)?)),
        NodeSnapshot::Arr { id, chunks } => Node::Arr(ArrNode::from_rga(decode_chunks(id, chunks)?)),
    })
}

fn restore(snap: Snapshot) -> Result<Model, CodecError> {
    let clock = decode_clock(snap.clock)?;
    let mut index = NodeIndex::with_capacity(snap.nodes.len());
    for node in snap.nodes {
        let node = decode_node(node)?;
        let id = node.id();
        if id == ORIGIN || index.insert(id, node).is_some() {
            return Err(invalid(format!("duplicate node {id}")));
        }
    }
    let mut model = Model::from_clock(clock);
    model.root = ValNode {
        id: ORIGIN,
        writer: snap.root.writer,
        val: snap.root.val,
    };
    model.index = index;
    Ok(model)
}

impl ModelCodec for VerboseCodec {
    fn encode(&self, model: &Model) -> Result<Vec<u8>, CodecError> {
        let snap = snapshot(model);
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&snap)?
        } else {
            serde_json::to_vec(&snap)?
        };
        Ok(bytes)
    }

    fn decode(&self, data: &[u8]) -> Result<Model, CodecError> {
        let snap: Snapshot = serde_json::from_slice(data)?;
        restore(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::patch_builder::PatchBuilder;
    use serde_json::json;

    const A: u64 = 100_000;
    const B: u64 = 200_000;

    #[test]
    fn round_trip_preserves_tombstones_and_clock() {
        let mut model = Model::new(A);
        {
            let mut api = model.api();
            let s = api.root(&json!({"text": "hello", "list": [1, 2, 3]})).unwrap();
            let text = api.model.find(&[json!("text")]).unwrap();
            api.str_del(text, 1, 2).unwrap();
            let list = api.model.find(&[json!("list")]).unwrap();
            api.arr_del(list, 0, 1).unwrap();
            api.obj_del(s, &["nope"]).unwrap();
        }
        let codec = VerboseCodec::new();
        let bytes = codec.encode(&model).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.view(), model.view());
        assert_eq!(decoded.clock, model.clock);
        assert_eq!(decoded.root, model.root);
        assert_eq!(decoded.index.len(), model.index.len());
        assert_eq!(codec.encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn decoded_replica_keeps_merging() {
        let mut model = Model::new(A);
        let s = model.api().root(&json!("ab")).unwrap();
        let codec = VerboseCodec::pretty();
        let mut copy = codec.decode(&codec.encode(&model).unwrap()).unwrap();

        let mut b = PatchBuilder::new(B, copy.clock.time);
        let anchor = match copy.node(s) {
            Some(Node::Str(n)) => n.rga.find(0).unwrap(),
            other => panic!("unexpected node {other:?}"),
        };
        b.ins_str(s, anchor, "X".to_owned()).unwrap();
        let patch = b.flush();
        copy.apply_patch(&patch).unwrap();
        model.apply_patch(&patch).unwrap();
        assert_eq!(copy.view(), json!("aXb"));
        assert_eq!(copy.view(), model.view());
    }

    #[test]
    fn rejects_inconsistent_snapshots() {
        let codec = VerboseCodec::new();
        assert!(matches!(codec.decode(b"{"), Err(CodecError::Json(_))));

        let model = Model::new(A);
        let mut snap: serde_json::Value =
            serde_json::from_slice(&codec.encode(&model).unwrap()).unwrap();
        snap["nodes"] = json!([{
            "type": "str",
            "id": {"sid": A, "time": 1},
            "chunks": [{"id": {"sid": A, "time": 2}, "span": 3, "data": [97]}]
        }]);
        let bytes = serde_json::to_vec(&snap).unwrap();
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn rejects_ranges_that_overflow() {
        let codec = VerboseCodec::new();
        let model = Model::new(A);
        let base: serde_json::Value =
            serde_json::from_slice(&codec.encode(&model).unwrap()).unwrap();

        let mut snap = base.clone();
        snap["clock"]["seen"] = json!({"200000": [[0, u64::MAX]]});
        let bytes = serde_json::to_vec(&snap).unwrap();
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::InvalidSnapshot(_))
        ));

        let mut snap = base;
        snap["nodes"] = json!([{
            "type": "bin",
            "id": {"sid": A, "time": 1},
            "chunks": [{"id": {"sid": B, "time": u64::MAX - 1}, "span": 2, "deleted": true}]
        }]);
        let bytes = serde_json::to_vec(&snap).unwrap();
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::InvalidSnapshot(_))
        ));
    }
}
