//! [`PatchBuilder`]: fluent builder for constructing [`Patch`]es.

use crate::json_crdt_patch::clock::{ts, ClockConfig, ClockOverflow, ClockVector, LogicalClock, Ts, Tss};
use crate::json_crdt_patch::constants::ORIGIN;
use crate::json_crdt_patch::operations::{ConValue, Op};
use crate::json_crdt_patch::patch::Patch;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while recording operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{op} requires a non-empty payload")]
    EmptyPayload { op: &'static str },
    #[error("vec holds at most 255 slots, got {len}")]
    TooManySlots { len: usize },
    #[error(transparent)]
    ClockOverflow(#[from] ClockOverflow),
}

// ── PatchBuilder ───────────────────────────────────────────────────────────

/// Utility for constructing a [`Patch`] operation by operation.
///
/// Every method allocates the ids its operation consumes from the builder's
/// own clock and returns the id of the recorded operation.
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    pub clock: LogicalClock,
    pub patch: Patch,
}

impl PatchBuilder {
    /// Creates a new builder with a fresh [`LogicalClock`].
    pub fn new(sid: u64, time: u64) -> Self {
        Self::from_clock(LogicalClock::new(sid, time))
    }

    pub fn with_config(sid: u64, time: u64, config: ClockConfig) -> Self {
        Self::from_clock(LogicalClock::with_config(sid, time, config))
    }

    pub fn from_clock(clock: LogicalClock) -> Self {
        Self {
            clock,
            patch: Patch::new(),
        }
    }

    /// Creates a builder that continues the local session of `cv`.
    pub fn from_clock_vector(cv: &ClockVector) -> Self {
        Self::from_clock(cv.logical())
    }

    /// Returns the sequence number of the next operation's timestamp.
    pub fn next_time(&self) -> u64 {
        let patch_next = self.patch.next_time();
        if patch_next == 0 {
            self.clock.time
        } else {
            patch_next
        }
    }

    /// Returns the current patch and resets the builder. The clock keeps
    /// running, so the next patch continues where this one ended.
    pub fn flush(&mut self) -> Patch {
        std::mem::take(&mut self.patch)
    }

    // ── Padding ────────────────────────────────────────────────────────────

    /// Adds a `Nop` if the clock has drifted ahead of the patch's last op.
    pub fn pad(&mut self) {
        let next_time = self.patch.next_time();
        if next_time == 0 {
            return;
        }
        let drift = self.clock.time.saturating_sub(next_time);
        if drift > 0 {
            let id = ts(self.clock.sid, next_time);
            self.patch.ops.push(Op::Nop { id, len: drift });
        }
    }

    fn push(&mut self, mut op: Op) -> Result<Ts, BuildError> {
        self.pad();
        let id = self.clock.tick(op.span())?;
        op.set_id(id);
        self.patch.ops.push(op);
        Ok(id)
    }

    // ── Creation operations ────────────────────────────────────────────────

    /// Create a new `con` constant holding a JSON literal.
    pub fn con(&mut self, val: Value) -> Result<Ts, BuildError> {
        self.con_value(ConValue::Json(val))
    }

    /// Create a new `con` constant referencing another identity.
    pub fn con_ref(&mut self, ref_id: Ts) -> Result<Ts, BuildError> {
        self.con_value(ConValue::Ref(ref_id))
    }

    /// Create a new `con` constant holding `undefined`.
    pub fn con_undefined(&mut self) -> Result<Ts, BuildError> {
        self.con_value(ConValue::Undefined)
    }

    pub fn con_value(&mut self, val: ConValue) -> Result<Ts, BuildError> {
        self.push(Op::NewCon { id: ORIGIN, val })
    }

    /// Create a new `val` LWW-Register.
    pub fn val(&mut self) -> Result<Ts, BuildError> {
        self.push(Op::NewVal { id: ORIGIN })
    }

    /// Create a new `obj` LWW-Map.
    pub fn obj(&mut self) -> Result<Ts, BuildError> {
        self.push(Op::NewObj { id: ORIGIN })
    }

    /// Create a new `vec` LWW-Vector with `len` slots.
    pub fn vec(&mut self, len: u8) -> Result<Ts, BuildError> {
        self.push(Op::NewVec { id: ORIGIN, len })
    }

    /// Create a new `str` RGA-String.
    pub fn str_node(&mut self) -> Result<Ts, BuildError> {
        self.push(Op::NewStr { id: ORIGIN })
    }

    /// Create a new `bin` RGA-Binary.
    pub fn bin(&mut self) -> Result<Ts, BuildError> {
        self.push(Op::NewBin { id: ORIGIN })
    }

    /// Create a new `arr` RGA-Array.
    pub fn arr(&mut self) -> Result<Ts, BuildError> {
        self.push(Op::NewArr { id: ORIGIN })
    }

    // ── Mutation operations ────────────────────────────────────────────────

    /// Set the value of the document root `val` register.
    pub fn root(&mut self, val: Ts) -> Result<Ts, BuildError> {
        self.set_val(ORIGIN, val)
    }

    /// Set the value of a `val` register.
    pub fn set_val(&mut self, obj: Ts, val: Ts) -> Result<Ts, BuildError> {
        self.push(Op::InsVal {
            id: ORIGIN,
            obj,
            val,
        })
    }

    /// Set key→value pairs in an `obj`.
    pub fn ins_obj(&mut self, obj: Ts, data: Vec<(String, Ts)>) -> Result<Ts, BuildError> {
        if data.is_empty() {
            return Err(BuildError::EmptyPayload { op: "ins_obj" });
        }
        self.push(Op::InsObj {
            id: ORIGIN,
            obj,
            data,
        })
    }

    /// Set index→value pairs in a `vec`.
    pub fn ins_vec(&mut self, obj: Ts, data: Vec<(u8, Ts)>) -> Result<Ts, BuildError> {
        if data.is_empty() {
            return Err(BuildError::EmptyPayload { op: "ins_vec" });
        }
        self.push(Op::InsVec {
            id: ORIGIN,
            obj,
            data,
        })
    }

    /// Insert a string into a `str` object.
    pub fn ins_str(&mut self, obj: Ts, after: Ts, data: String) -> Result<Ts, BuildError> {
        if data.is_empty() {
            return Err(BuildError::EmptyPayload { op: "ins_str" });
        }
        self.push(Op::InsStr {
            id: ORIGIN,
            obj,
            after,
            data,
        })
    }

    /// Insert binary data into a `bin` object.
    pub fn ins_bin(&mut self, obj: Ts, after: Ts, data: Vec<u8>) -> Result<Ts, BuildError> {
        if data.is_empty() {
            return Err(BuildError::EmptyPayload { op: "ins_bin" });
        }
        self.push(Op::InsBin {
            id: ORIGIN,
            obj,
            after,
            data,
        })
    }

    /// Insert elements into an `arr` object.
    pub fn ins_arr(&mut self, arr: Ts, after: Ts, data: Vec<Ts>) -> Result<Ts, BuildError> {
        if data.is_empty() {
            return Err(BuildError::EmptyPayload { op: "ins_arr" });
        }
        self.push(Op::InsArr {
            id: ORIGIN,
            obj: arr,
            after,
            data,
        })
    }

    /// Replace the value of the `arr` element `after`.
    pub fn upd_arr(&mut self, arr: Ts, after: Ts, val: Ts) -> Result<Ts, BuildError> {
        self.push(Op::UpdArr {
            id: ORIGIN,
            obj: arr,
            after,
            val,
        })
    }

    /// Delete spans of elements in a sequence node.
    pub fn del(&mut self, obj: Ts, what: Vec<Tss>) -> Result<Ts, BuildError> {
        if what.is_empty() || what.iter().any(|s| s.span == 0) {
            return Err(BuildError::EmptyPayload { op: "del" });
        }
        self.push(Op::Del {
            id: ORIGIN,
            obj,
            what,
        })
    }

    /// Insert a no-op of the given span.
    pub fn nop(&mut self, span: u64) -> Result<Ts, BuildError> {
        if span == 0 {
            return Err(BuildError::EmptyPayload { op: "nop" });
        }
        self.push(Op::Nop {
            id: ORIGIN,
            len: span,
        })
    }

    // ── JSON helpers ───────────────────────────────────────────────────────

    /// Build a node tree for an arbitrary JSON value and return its root id.
    ///
    /// Strings become `str` nodes, arrays `arr`, objects `obj`; every other
    /// value is stored as a `con`.
    pub fn json(&mut self, value: &Value) -> Result<Ts, BuildError> {
        match value {
            Value::String(text) => {
                let id = self.str_node()?;
                if !text.is_empty() {
                    self.ins_str(id, id, text.clone())?;
                }
                Ok(id)
            }
            Value::Array(items) => {
                let id = self.arr()?;
                if !items.is_empty() {
                    let ids = items
                        .iter()
                        .map(|item| self.json(item))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.ins_arr(id, id, ids)?;
                }
                Ok(id)
            }
            Value::Object(map) => {
                let id = self.obj()?;
                if !map.is_empty() {
                    let mut pairs = Vec::with_capacity(map.len());
                    for (key, item) in map {
                        pairs.push((key.clone(), self.json(item)?));
                    }
                    self.ins_obj(id, pairs)?;
                }
                Ok(id)
            }
            scalar => self.con(scalar.clone()),
        }
    }

    /// Like [`json`](Self::json), wrapped in a `val` register.
    pub fn json_val(&mut self, value: &Value) -> Result<Ts, BuildError> {
        let reg = self.val()?;
        let inner = self.json(value)?;
        self.set_val(reg, inner)?;
        Ok(reg)
    }
}
