//! JSON CRDT Patch protocol.
//!
//! The foundational layer for JSON CRDT collaboration. Defines:
//! - Clock types (`Ts`, `Tss`, `LogicalClock`, `ClockVector`, `SpanLedger`)
//! - the CRDT operations (`Op` enum)
//! - `Patch`, an ordered gap-free sequence of operations of one session
//! - `PatchBuilder`, a fluent builder for constructing patches
//! - `combine`/`compact` helpers and the `schema` DSL

pub mod clock;
pub mod compaction;
pub mod constants;
pub mod operations;
pub mod patch;
pub mod patch_builder;
pub mod schema;

// ── Re-exports ─────────────────────────────────────────────────────────────

pub use clock::{compare, contains_id, interval, print_ts, tick, ts, tss};
pub use clock::{
    generate_session_id, is_valid_session_id, ClockConfig, ClockOverflow, ClockVector,
    LogicalClock, SpanLedger, Ts, Tss, MAX_SAFE_TIME,
};
pub use compaction::{combine, compact, CombineError};
pub use constants::{ORIGIN, SESSION, SYSTEM_SESSION_TIME, UNDEFINED};
pub use operations::{ConValue, Op};
pub use patch::{Patch, PatchError};
pub use patch_builder::{BuildError, PatchBuilder};
pub use schema::{s, NodeBuilder};
