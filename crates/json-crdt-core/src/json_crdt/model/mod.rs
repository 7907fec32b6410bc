//! JSON CRDT document model.
//!
//! # Overview
//!
//! A [`Model`] is the in-memory representation of a JSON CRDT document.
//! It contains the root register, a node index (every CRDT node ever created,
//! keyed by its timestamp ID) and a vector clock that tracks which operations
//! have been applied.
//!
//! Operations are applied via [`Model::apply_patch`]; local edits are easiest
//! to author through [`Model::api`]. The resulting JSON view can be obtained
//! with [`Model::view`].

pub mod api;
pub mod apply;
pub mod find;

pub use api::{ApiError, ModelApi};
pub use apply::{ApplyError, ApplyReport};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_crdt_patch::clock::{generate_session_id, ClockConfig, ClockVector, Ts};
use crate::json_crdt_patch::constants::{ORIGIN, UNDEFINED};
use super::nodes::{Node, NodeIndex, ValNode};

/// Settings a host can load from its own configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Session to author operations with; a random one when absent.
    pub session: Option<u64>,
    pub clock: ClockConfig,
}

/// Lifecycle of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    /// The root register was never written.
    Empty,
    /// The root register points at a value.
    Populated,
}

/// In-memory JSON CRDT document model.
///
/// `tick` is a mutation counter: it increments once per patch that changed
/// the document, so callers can cheaply tell when a cached view is stale.
#[derive(Debug, Clone)]
pub struct Model {
    /// Document root, a LWW register with the id `ORIGIN`.
    pub root: ValNode,
    /// All CRDT nodes keyed by their timestamp ID. Nodes are never removed.
    pub index: NodeIndex,
    /// Logical clock: local time, peers and the ledger of applied ids.
    pub clock: ClockVector,
    /// Mutation counter.
    pub tick: u64,
}

impl Model {
    /// Create a new empty model with the given session ID.
    ///
    /// The clock starts at time `1` so that a builder never emits an
    /// operation at time `0`.
    pub fn new(sid: u64) -> Self {
        Self::from_clock(ClockVector::new(sid, 1))
    }

    /// Create a model with a randomly-generated session ID.
    pub fn create() -> Self {
        Self::new(generate_session_id())
    }

    pub fn with_config(config: &ModelConfig) -> Self {
        let sid = config.session.unwrap_or_else(generate_session_id);
        Self::from_clock(ClockVector::with_config(sid, 1, config.clock))
    }

    /// Create an empty model around an existing clock.
    pub fn from_clock(clock: ClockVector) -> Self {
        Self {
            root: ValNode::new(ORIGIN),
            index: NodeIndex::default(),
            clock,
            tick: 0,
        }
    }

    /// Session this replica authors operations with.
    pub fn sid(&self) -> u64 {
        self.clock.sid
    }

    /// Return the JSON view of the current document state. An unset root
    /// renders as `null`.
    pub fn view(&self) -> Value {
        self.value_view(self.root.val)
    }

    /// JSON view of the node `id`, `null` if it is unknown.
    pub fn value_view(&self, id: Ts) -> Value {
        match self.index.get(&id) {
            Some(node) => node.view(&self.index),
            None => Value::Null,
        }
    }

    pub fn state(&self) -> DocState {
        if self.root.writer == ORIGIN {
            DocState::Empty
        } else {
            DocState::Populated
        }
    }

    /// Node at the top of the document, if the root points at one.
    pub fn root_node(&self) -> Option<&Node> {
        if self.root.val == UNDEFINED {
            return None;
        }
        self.index.get(&self.root.val)
    }

    pub fn node(&self, id: Ts) -> Option<&Node> {
        self.index.get(&id)
    }

    /// Independent copy of the document that authors operations as `sid`,
    /// or as a fresh random session when `sid` is `None`.
    pub fn fork(&self, sid: Option<u64>) -> Model {
        let sid = sid.unwrap_or_else(|| {
            let mut sid = generate_session_id();
            while sid == self.clock.sid {
                sid = generate_session_id();
            }
            sid
        });
        Model {
            root: self.root.clone(),
            index: self.index.clone(),
            clock: self.clock.fork(sid),
            tick: self.tick,
        }
    }

    /// Editing API that records and applies local operations.
    pub fn api(&mut self) -> ModelApi<'_> {
        ModelApi::new(self)
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "model {} nodes, tick {}", self.index.len(), self.tick)?;
        writeln!(f, "{}", self.view())?;
        write!(f, "{}", self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::patch_builder::PatchBuilder;
    use serde_json::json;

    const A: u64 = 100_000;

    #[test]
    fn new_model_is_empty() {
        let model = Model::new(A);
        assert_eq!(model.view(), Value::Null);
        assert_eq!(model.state(), DocState::Empty);
        assert!(model.root_node().is_none());
        assert_eq!(model.clock.time, 1);
    }

    #[test]
    fn first_root_write_populates() {
        let mut model = Model::new(A);
        let mut b = PatchBuilder::from_clock_vector(&model.clock);
        let c = b.con(json!(null)).unwrap();
        b.root(c).unwrap();
        model.apply_patch(&b.flush()).unwrap();
        assert_eq!(model.state(), DocState::Populated);
        assert_eq!(model.view(), json!(null));
    }

    #[test]
    fn fork_is_independent() {
        let mut model = Model::new(A);
        let mut b = PatchBuilder::from_clock_vector(&model.clock);
        let s = b.json(&json!("a")).unwrap();
        b.root(s).unwrap();
        model.apply_patch(&b.flush()).unwrap();

        let mut fork = model.fork(None);
        assert_ne!(fork.sid(), model.sid());
        assert_eq!(fork.clock.time, model.clock.time);
        fork.api().str_ins(s, 1, "b").unwrap();
        assert_eq!(fork.view(), json!("ab"));
        assert_eq!(model.view(), json!("a"));
    }

    #[test]
    fn config_defaults_deserialize() {
        let config: ModelConfig = serde_json::from_value(json!({"session": 70000})).unwrap();
        assert_eq!(config.session, Some(70_000));
        assert_eq!(config.clock, ClockConfig::default());
        let model = Model::with_config(&config);
        assert_eq!(model.sid(), 70_000);
        let config: ModelConfig = serde_json::from_value(json!({"clock": {"max_time": 10}})).unwrap();
        assert_eq!(Model::with_config(&config).clock.max_time, 10);
    }
}
