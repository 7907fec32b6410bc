//! JSON CRDT Patch operations as a single Rust enum.

use crate::json_crdt_patch::clock::{print_ts, Ts, Tss};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── ConValue ───────────────────────────────────────────────────────────────

/// The value stored in a `new_con` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConValue {
    /// A plain JSON literal.
    Json(Value),
    /// A timestamp quoting another identity of the document.
    Ref(Ts),
    /// The `undefined` literal.
    Undefined,
}

impl ConValue {
    /// JSON rendering of the constant. `undefined` renders as `null`, a
    /// reference as `{"sid": .., "time": ..}`.
    pub fn view(&self) -> Value {
        match self {
            ConValue::Json(v) => v.clone(),
            ConValue::Ref(id) => serde_json::json!({ "sid": id.sid, "time": id.time }),
            ConValue::Undefined => Value::Null,
        }
    }
}

impl From<Value> for ConValue {
    fn from(v: Value) -> Self {
        ConValue::Json(v)
    }
}

// ── Operation ──────────────────────────────────────────────────────────────

/// A single JSON CRDT Patch operation.
///
/// Each variant carries an `id: Ts` identifying the operation in the
/// global logical clock space.
///
/// Span (the number of clock ticks consumed):
/// - Most operations consume 1 tick.
/// - `InsStr` consumes one tick per UTF-16 code unit, `InsBin` one per byte
///   and `InsArr` one per element.
/// - `Nop` consumes `len` ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    // ── Creation operations ──────────────────────────────────────────────
    /// Create a new constant `con` value.
    NewCon { id: Ts, val: ConValue },
    /// Create a new LWW-Register `val` object.
    NewVal { id: Ts },
    /// Create a new LWW-Map `obj` object.
    NewObj { id: Ts },
    /// Create a new LWW-Vector `vec` object with `len` slots.
    NewVec { id: Ts, len: u8 },
    /// Create a new RGA-String `str` object.
    NewStr { id: Ts },
    /// Create a new RGA-Binary `bin` object.
    NewBin { id: Ts },
    /// Create a new RGA-Array `arr` object.
    NewArr { id: Ts },

    // ── Mutation operations ──────────────────────────────────────────────
    /// Set the value of a `val` register. `obj == ORIGIN` sets the root.
    InsVal { id: Ts, obj: Ts, val: Ts },
    /// Set key→value pairs in an `obj` map.
    InsObj {
        id: Ts,
        obj: Ts,
        data: Vec<(String, Ts)>,
    },
    /// Set index→value pairs in a `vec` vector.
    InsVec {
        id: Ts,
        obj: Ts,
        data: Vec<(u8, Ts)>,
    },
    /// Insert a string into a `str` RGA.
    InsStr {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: String,
    },
    /// Insert binary data into a `bin` RGA.
    InsBin {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: Vec<u8>,
    },
    /// Insert elements into an `arr` RGA.
    InsArr {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: Vec<Ts>,
    },
    /// Replace the value of the `arr` element identified by `after`.
    UpdArr { id: Ts, obj: Ts, after: Ts, val: Ts },
    /// Delete ranges of elements in a `str`, `bin` or `arr` node.
    Del { id: Ts, obj: Ts, what: Vec<Tss> },
    /// No-op, skips clock cycles without performing any CRDT action.
    Nop { id: Ts, len: u64 },
}

impl Op {
    /// Returns the ID (first timestamp) of this operation.
    pub fn id(&self) -> Ts {
        match self {
            Op::NewCon { id, .. }
            | Op::NewVal { id }
            | Op::NewObj { id }
            | Op::NewVec { id, .. }
            | Op::NewStr { id }
            | Op::NewBin { id }
            | Op::NewArr { id }
            | Op::InsVal { id, .. }
            | Op::InsObj { id, .. }
            | Op::InsVec { id, .. }
            | Op::InsStr { id, .. }
            | Op::InsBin { id, .. }
            | Op::InsArr { id, .. }
            | Op::UpdArr { id, .. }
            | Op::Del { id, .. }
            | Op::Nop { id, .. } => *id,
        }
    }

    /// Re-stamps the operation with a new first id.
    pub(crate) fn set_id(&mut self, new_id: Ts) {
        match self {
            Op::NewCon { id, .. }
            | Op::NewVal { id }
            | Op::NewObj { id }
            | Op::NewVec { id, .. }
            | Op::NewStr { id }
            | Op::NewBin { id }
            | Op::NewArr { id }
            | Op::InsVal { id, .. }
            | Op::InsObj { id, .. }
            | Op::InsVec { id, .. }
            | Op::InsStr { id, .. }
            | Op::InsBin { id, .. }
            | Op::InsArr { id, .. }
            | Op::UpdArr { id, .. }
            | Op::Del { id, .. }
            | Op::Nop { id, .. } => *id = new_id,
        }
    }

    /// Number of logical clock cycles consumed by this operation.
    pub fn span(&self) -> u64 {
        match self {
            Op::InsStr { data, .. } => data.encode_utf16().count() as u64,
            Op::InsBin { data, .. } => data.len() as u64,
            Op::InsArr { data, .. } => data.len() as u64,
            Op::Nop { len, .. } => *len,
            _ => 1,
        }
    }

    /// Node targeted by a mutation, `None` for creation ops and `Nop`.
    pub fn target(&self) -> Option<Ts> {
        match self {
            Op::InsVal { obj, .. }
            | Op::InsObj { obj, .. }
            | Op::InsVec { obj, .. }
            | Op::InsStr { obj, .. }
            | Op::InsBin { obj, .. }
            | Op::InsArr { obj, .. }
            | Op::UpdArr { obj, .. }
            | Op::Del { obj, .. } => Some(*obj),
            _ => None,
        }
    }

    /// Returns `true` for the `new_*` family.
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            Op::NewCon { .. }
                | Op::NewVal { .. }
                | Op::NewObj { .. }
                | Op::NewVec { .. }
                | Op::NewStr { .. }
                | Op::NewBin { .. }
                | Op::NewArr { .. }
        )
    }

    /// Short mnemonic name of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            Op::NewCon { .. } => "new_con",
            Op::NewVal { .. } => "new_val",
            Op::NewObj { .. } => "new_obj",
            Op::NewVec { .. } => "new_vec",
            Op::NewStr { .. } => "new_str",
            Op::NewBin { .. } => "new_bin",
            Op::NewArr { .. } => "new_arr",
            Op::InsVal { .. } => "ins_val",
            Op::InsObj { .. } => "ins_obj",
            Op::InsVec { .. } => "ins_vec",
            Op::InsStr { .. } => "ins_str",
            Op::InsBin { .. } => "ins_bin",
            Op::InsArr { .. } => "ins_arr",
            Op::UpdArr { .. } => "upd_arr",
            Op::Del { .. } => "del",
            Op::Nop { .. } => "nop",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.id();
        let span = self.span();
        if span > 1 {
            write!(f, "{} {}!{}", self.name(), print_ts(id), span)?;
        } else {
            write!(f, "{} {}", self.name(), print_ts(id))?;
        }
        match self {
            Op::NewCon { val, .. } => write!(f, " {{ {} }}", val.view()),
            Op::NewVec { len, .. } => write!(f, " [{}]", len),
            Op::InsVal { obj, val, .. } => {
                write!(f, ", obj = {}, val = {}", print_ts(*obj), print_ts(*val))
            }
            Op::InsObj { obj, data, .. } => {
                let pairs: Vec<_> = data
                    .iter()
                    .map(|(k, v)| format!("{:?}: {}", k, print_ts(*v)))
                    .collect();
                write!(f, ", obj = {} {{ {} }}", print_ts(*obj), pairs.join(", "))
            }
            Op::InsVec { obj, data, .. } => {
                let pairs: Vec<_> = data
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, print_ts(*v)))
                    .collect();
                write!(f, ", obj = {} {{ {} }}", print_ts(*obj), pairs.join(", "))
            }
            Op::InsStr {
                obj, after, data, ..
            } => write!(
                f,
                ", obj = {} {{ {} ← {:?} }}",
                print_ts(*obj),
                print_ts(*after),
                data
            ),
            Op::InsBin {
                obj, after, data, ..
            } => write!(
                f,
                ", obj = {} {{ {} ← {:?} }}",
                print_ts(*obj),
                print_ts(*after),
                data
            ),
            Op::InsArr {
                obj, after, data, ..
            } => {
                let items: Vec<_> = data.iter().map(|v| print_ts(*v)).collect();
                write!(
                    f,
                    ", obj = {} {{ {} ← [{}] }}",
                    print_ts(*obj),
                    print_ts(*after),
                    items.join(", ")
                )
            }
            Op::UpdArr {
                obj, after, val, ..
            } => write!(
                f,
                ", obj = {} {{ {} ← {} }}",
                print_ts(*obj),
                print_ts(*after),
                print_ts(*val)
            ),
            Op::Del { obj, what, .. } => {
                let spans: Vec<_> = what
                    .iter()
                    .map(|s| format!("{}!{}", print_ts(s.ts()), s.span))
                    .collect();
                write!(f, ", obj = {} {{ {} }}", print_ts(*obj), spans.join(", "))
            }
            _ => Ok(()),
        }
    }
}
