//! JSON CRDT document engine.
//!
//! Replicas edit a shared JSON-like document without coordination and merge
//! each other's edits deterministically. Edits travel as [`Patch`]es: ordered
//! runs of operations authored by one session. A [`Model`] applies patches in
//! any order and any number of times, and every replica that applied the
//! same set of patches renders the same view.
//!
//! - [`json_crdt_patch`]: timestamps, clocks, operations, patches and the
//!   builder used to author them.
//! - [`json_crdt`]: node types, the RGA sequence engine, the document model,
//!   the extension registry and codecs.
//!
//! ```
//! use json_crdt_core::{Model, Patch};
//! use serde_json::json;
//!
//! let mut alice = Model::new(100_000);
//! let mut api = alice.api();
//! let text = api.root(&json!("hi")).unwrap();
//! api.str_ins(text, 2, "!").unwrap();
//! let patch: Patch = api.flush();
//!
//! let mut bob = Model::new(200_000);
//! bob.apply_patch(&patch).unwrap();
//! assert_eq!(bob.view(), json!("hi!"));
//! ```

pub mod json_crdt;
pub mod json_crdt_patch;

pub use json_crdt::model::{ApiError, ApplyError, ApplyReport, DocState, Model, ModelApi, ModelConfig};
pub use json_crdt_patch::clock::{ClockConfig, ClockOverflow, Ts, Tss};
pub use json_crdt_patch::patch::{Patch, PatchError};
pub use json_crdt_patch::patch_builder::{BuildError, PatchBuilder};
