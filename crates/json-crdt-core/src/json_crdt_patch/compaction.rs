//! Patch compaction utilities.

use crate::json_crdt_patch::clock::ts;
use crate::json_crdt_patch::operations::Op;
use crate::json_crdt_patch::patch::Patch;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombineError {
    #[error("cannot combine patches of sessions {left} and {right}")]
    SessionMismatch { left: u64, right: u64 },
    #[error("patch starting at time {start} overlaps the previous one ending before {next}")]
    TimestampConflict { start: u64, next: u64 },
}

/// Combines two or more patches of one session into a single patch.
///
/// Patches must be ordered by logical time with no overlapping spans. A
/// `Nop` fills any gap so that decoded identities stay correct. Empty
/// patches are ignored.
pub fn combine(patches: Vec<Patch>) -> Result<Patch, CombineError> {
    let mut iter = patches.into_iter();
    let Some(mut first) = iter.next() else {
        return Ok(Patch::new());
    };
    for current in iter {
        let (Some(fid), Some(cid)) = (first.get_id(), current.get_id()) else {
            if first.ops.is_empty() {
                first.ops = current.ops;
            }
            continue;
        };
        if fid.sid != cid.sid {
            return Err(CombineError::SessionMismatch {
                left: fid.sid,
                right: cid.sid,
            });
        }
        let next = first.next_time();
        if cid.time < next {
            return Err(CombineError::TimestampConflict {
                start: cid.time,
                next,
            });
        }
        if cid.time > next {
            first.ops.push(Op::Nop {
                id: ts(fid.sid, next),
                len: cid.time - next,
            });
        }
        first.ops.extend(current.ops);
    }
    Ok(first)
}

/// Compacts operations within a single patch by merging consecutive string
/// inserts (when they are into the same string and are consecutive appends).
pub fn compact(patch: &mut Patch) {
    if patch.ops.len() < 2 {
        return;
    }
    let ops = std::mem::take(&mut patch.ops);
    let mut merged: Vec<Op> = Vec::with_capacity(ops.len());

    for op in ops {
        if let Some(Op::InsStr {
            id: lid,
            obj: lobj,
            data: ldata,
            ..
        }) = merged.last_mut()
        {
            if let Op::InsStr {
                id: cid,
                obj: cobj,
                after: cafter,
                data: cdata,
            } = &op
            {
                let last_next_tick = lid.time + ldata.encode_utf16().count() as u64;
                let is_time_consecutive = last_next_tick == cid.time;
                let is_same_string = *lobj == *cobj;
                // the current op anchors on the last unit of the previous op
                let is_append = cafter.sid == lid.sid && cafter.time + 1 == last_next_tick;
                if is_time_consecutive && is_same_string && is_append {
                    ldata.push_str(cdata);
                    continue;
                }
            }
        }
        merged.push(op);
    }
    patch.ops = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::clock::ts;

    const SID: u64 = 100_000;

    fn single(op: Op) -> Patch {
        Patch {
            ops: vec![op],
            meta: None,
        }
    }

    #[test]
    fn combine_two_patches() {
        let p = combine(vec![
            single(Op::NewStr { id: ts(SID, 0) }),
            single(Op::NewObj { id: ts(SID, 1) }),
        ])
        .unwrap();
        assert_eq!(p.ops.len(), 2);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn combine_with_gap_inserts_nop() {
        let p = combine(vec![
            single(Op::NewStr { id: ts(SID, 0) }),
            single(Op::NewObj { id: ts(SID, 5) }),
        ])
        .unwrap();
        assert_eq!(
            p.ops[1],
            Op::Nop {
                id: ts(SID, 1),
                len: 4
            }
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn combine_rejects_bad_input() {
        let err = combine(vec![
            single(Op::NewStr { id: ts(SID, 0) }),
            single(Op::NewObj { id: ts(SID + 1, 5) }),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            CombineError::SessionMismatch {
                left: SID,
                right: SID + 1
            }
        );
        let err = combine(vec![
            single(Op::NewStr { id: ts(SID, 3) }),
            single(Op::NewObj { id: ts(SID, 3) }),
        ])
        .unwrap_err();
        assert_eq!(err, CombineError::TimestampConflict { start: 3, next: 4 });
    }

    #[test]
    fn compact_merges_consecutive_ins_str() {
        let str_id = ts(SID, 0);
        let mut patch = Patch::new();
        patch.ops.push(Op::InsStr {
            id: ts(SID, 5),
            obj: str_id,
            after: str_id,
            data: "hel".into(),
        });
        patch.ops.push(Op::InsStr {
            id: ts(SID, 8),
            obj: str_id,
            after: ts(SID, 7),
            data: "lo".into(),
        });
        compact(&mut patch);
        assert_eq!(patch.ops.len(), 1);
        match &patch.ops[0] {
            Op::InsStr { data, .. } => assert_eq!(data, "hello"),
            other => panic!("unexpected op {other}"),
        }
    }

    #[test]
    fn compact_keeps_non_appending_inserts() {
        let str_id = ts(SID, 0);
        let mut patch = Patch::new();
        patch.ops.push(Op::InsStr {
            id: ts(SID, 5),
            obj: str_id,
            after: str_id,
            data: "ab".into(),
        });
        patch.ops.push(Op::InsStr {
            id: ts(SID, 7),
            obj: str_id,
            after: str_id,
            data: "c".into(),
        });
        compact(&mut patch);
        assert_eq!(patch.ops.len(), 2);
    }
}
