//! [`Patch`]: a JSON CRDT patch containing a sequence of operations.

use crate::json_crdt_patch::clock::{print_ts, ts, Ts, Tss};
use crate::json_crdt_patch::constants::SESSION;
use crate::json_crdt_patch::operations::{ConValue, Op};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reasons a patch is structurally unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("operation {id} has an empty payload")]
    EmptyPayload { id: Ts },
    #[error("operation {id} is authored by the reserved system session")]
    SystemSession { id: Ts },
    #[error("operation {found} does not belong to session {expected}")]
    SessionMismatch { expected: u64, found: Ts },
    #[error("operation {found} breaks contiguity, expected time {expected}")]
    NonContiguous { expected: u64, found: Ts },
    #[error("operation {id} spans past the end of logical time")]
    SpanOverflow { id: Ts },
    #[error("operation {id} partially overlaps ids that were already applied")]
    PartialOverlap { id: Ts },
    #[error("operation {id} writes slot {index} of a vector with {len} slots")]
    SlotOutOfRange { id: Ts, index: u8, len: u8 },
}

/// A JSON CRDT Patch: an ordered list of operations with optional metadata.
///
/// Normally created via [`PatchBuilder`](super::patch_builder::PatchBuilder).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// The list of operations in the patch.
    pub ops: Vec<Op>,

    /// Arbitrary metadata (not interpreted by the CRDT library).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Patch {
    /// Creates an empty patch with no operations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ID of the first operation, if any.
    pub fn get_id(&self) -> Option<Ts> {
        self.ops.first().map(|op| op.id())
    }

    /// Returns the total logical clock span consumed by all operations.
    pub fn span(&self) -> u64 {
        self.ops.iter().map(|op| op.span()).sum()
    }

    /// Returns the logical time expected for the next operation to be inserted.
    ///
    /// Returns 0 if the patch has no operations.
    pub fn next_time(&self) -> u64 {
        match self.ops.last() {
            None => 0,
            Some(op) => op.id().time + op.span(),
        }
    }

    /// Checks that the operations form one gap-free run of ids authored by a
    /// single non-system session, and that no operation is empty.
    ///
    /// An empty patch is valid.
    pub fn validate(&self) -> Result<(), PatchError> {
        let Some(first) = self.get_id() else {
            return Ok(());
        };
        if first.sid == SESSION::SYSTEM {
            return Err(PatchError::SystemSession { id: first });
        }
        let mut expected = first.time;
        for op in &self.ops {
            let id = op.id();
            if id.sid != first.sid {
                return Err(PatchError::SessionMismatch {
                    expected: first.sid,
                    found: id,
                });
            }
            if id.time != expected {
                return Err(PatchError::NonContiguous {
                    expected,
                    found: id,
                });
            }
            if is_empty_payload(op) {
                return Err(PatchError::EmptyPayload { id });
            }
            expected = id
                .time
                .checked_add(op.span())
                .ok_or(PatchError::SpanOverflow { id })?;
        }
        Ok(())
    }

    /// Creates a new patch where every timestamp is transformed by `f`.
    pub fn rewrite_time<F>(&self, f: &F) -> Patch
    where
        F: Fn(Ts) -> Ts,
    {
        Patch {
            ops: self.ops.iter().map(|op| rewrite_op(op, f)).collect(),
            meta: self.meta.clone(),
        }
    }

    /// Rebases the patch so that the first operation begins at `new_time`.
    ///
    /// Only timestamps belonging to the patch's session ID and at or after
    /// `transform_after` (defaults to the patch start time) are shifted.
    /// An empty patch is returned unchanged.
    pub fn rebase(&self, new_time: u64, transform_after: Option<u64>) -> Patch {
        let Some(id) = self.get_id() else {
            return self.clone();
        };
        let sid = id.sid;
        let start = id.time;
        let transform_after = transform_after.unwrap_or(start);
        if start == new_time {
            return self.clone();
        }
        self.rewrite_time(&|stamp: Ts| -> Ts {
            if stamp.sid != sid || stamp.time < transform_after {
                return stamp;
            }
            let moved = stamp.time as i128 - start as i128 + new_time as i128;
            ts(sid, moved.max(0) as u64)
        })
    }
}

fn is_empty_payload(op: &Op) -> bool {
    match op {
        Op::InsObj { data, .. } => data.is_empty(),
        Op::InsVec { data, .. } => data.is_empty(),
        Op::InsStr { data, .. } => data.is_empty(),
        Op::InsBin { data, .. } => data.is_empty(),
        Op::InsArr { data, .. } => data.is_empty(),
        Op::Del { what, .. } => what.is_empty() || what.iter().any(|s| s.span == 0),
        Op::Nop { len, .. } => *len == 0,
        _ => false,
    }
}

impl std::fmt::Display for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id_str = match self.get_id() {
            Some(id) => print_ts(id),
            None => "(nil)".to_owned(),
        };
        write!(f, "Patch {}!{}", id_str, self.span())?;
        for op in &self.ops {
            write!(f, "\n  {}", op)?;
        }
        Ok(())
    }
}

/// Applies the timestamp transform function to a single operation.
fn rewrite_op<F>(op: &Op, f: &F) -> Op
where
    F: Fn(Ts) -> Ts,
{
    match op {
        Op::NewCon { id, val } => Op::NewCon {
            id: f(*id),
            val: match val {
                ConValue::Ref(stamp) => ConValue::Ref(f(*stamp)),
                other => other.clone(),
            },
        },
        Op::NewVal { id } => Op::NewVal { id: f(*id) },
        Op::NewObj { id } => Op::NewObj { id: f(*id) },
        Op::NewVec { id, len } => Op::NewVec {
            id: f(*id),
            len: *len,
        },
        Op::NewStr { id } => Op::NewStr { id: f(*id) },
        Op::NewBin { id } => Op::NewBin { id: f(*id) },
        Op::NewArr { id } => Op::NewArr { id: f(*id) },
        Op::InsVal { id, obj, val } => Op::InsVal {
            id: f(*id),
            obj: f(*obj),
            val: f(*val),
        },
        Op::InsObj { id, obj, data } => Op::InsObj {
            id: f(*id),
            obj: f(*obj),
            data: data.iter().map(|(k, v)| (k.clone(), f(*v))).collect(),
        },
        Op::InsVec { id, obj, data } => Op::InsVec {
            id: f(*id),
            obj: f(*obj),
            data: data.iter().map(|(k, v)| (*k, f(*v))).collect(),
        },
        Op::InsStr {
            id,
            obj,
            after,
            data,
        } => Op::InsStr {
            id: f(*id),
            obj: f(*obj),
            after: f(*after),
            data: data.clone(),
        },
        Op::InsBin {
            id,
            obj,
            after,
            data,
        } => Op::InsBin {
            id: f(*id),
            obj: f(*obj),
            after: f(*after),
            data: data.clone(),
        },
        Op::InsArr {
            id,
            obj,
            after,
            data,
        } => Op::InsArr {
            id: f(*id),
            obj: f(*obj),
            after: f(*after),
            data: data.iter().map(|v| f(*v)).collect(),
        },
        Op::UpdArr {
            id,
            obj,
            after,
            val,
        } => Op::UpdArr {
            id: f(*id),
            obj: f(*obj),
            after: f(*after),
            val: f(*val),
        },
        Op::Del { id, obj, what } => Op::Del {
            id: f(*id),
            obj: f(*obj),
            what: what
                .iter()
                .map(|s| {
                    let moved = f(s.ts());
                    Tss::new(moved.sid, moved.time, s.span)
                })
                .collect(),
        },
        Op::Nop { id, len } => Op::Nop {
            id: f(*id),
            len: *len,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::clock::{ts, tss};

    const SID: u64 = 100_000;

    fn str_patch() -> Patch {
        let mut p = Patch::new();
        p.ops.push(Op::NewStr { id: ts(SID, 10) });
        p.ops.push(Op::InsStr {
            id: ts(SID, 11),
            obj: ts(SID, 10),
            after: ts(SID, 10),
            data: "hi".into(),
        });
        p
    }

    #[test]
    fn empty_patch() {
        let p = Patch::new();
        assert_eq!(p.get_id(), None);
        assert_eq!(p.span(), 0);
        assert_eq!(p.next_time(), 0);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn next_time_after_multi_tick_op() {
        let p = str_patch();
        assert_eq!(p.get_id(), Some(ts(SID, 10)));
        assert_eq!(p.span(), 3);
        assert_eq!(p.next_time(), 13);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validate_rejects_gaps() {
        let mut p = str_patch();
        p.ops.push(Op::NewObj { id: ts(SID, 14) });
        assert_eq!(
            p.validate(),
            Err(PatchError::NonContiguous {
                expected: 13,
                found: ts(SID, 14)
            })
        );
    }

    #[test]
    fn validate_rejects_foreign_session() {
        let mut p = str_patch();
        p.ops.push(Op::NewObj { id: ts(SID + 1, 13) });
        assert!(matches!(
            p.validate(),
            Err(PatchError::SessionMismatch { expected: SID, .. })
        ));
    }

    #[test]
    fn validate_rejects_system_session_and_empty_ops() {
        let mut p = Patch::new();
        p.ops.push(Op::NewObj { id: ts(0, 5) });
        assert!(matches!(p.validate(), Err(PatchError::SystemSession { .. })));

        let mut p = Patch::new();
        p.ops.push(Op::Del {
            id: ts(SID, 1),
            obj: ts(SID, 0),
            what: vec![tss(SID, 0, 0)],
        });
        assert_eq!(
            p.validate(),
            Err(PatchError::EmptyPayload { id: ts(SID, 1) })
        );
    }

    #[test]
    fn rebase_moves_own_session_only() {
        let mut p = str_patch();
        p.ops.push(Op::InsVal {
            id: ts(SID, 13),
            obj: ts(2, 100),
            val: ts(SID, 10),
        });
        let rebased = p.rebase(20, None);
        assert_eq!(rebased.get_id(), Some(ts(SID, 20)));
        assert_eq!(rebased.ops[1].id(), ts(SID, 21));
        match &rebased.ops[2] {
            Op::InsVal { obj, val, .. } => {
                assert_eq!(*obj, ts(2, 100));
                assert_eq!(*val, ts(SID, 20));
            }
            other => panic!("unexpected op {other}"),
        }
        assert!(rebased.validate().is_ok());
    }
}
