//! Document codecs.
//!
//! A codec must preserve more than the view: the clock (session, time,
//! peers and the ledger of applied ids) and the identity of every node and
//! sequence element survive a round trip, so a decoded replica keeps
//! merging patches exactly like the one that was encoded.

pub mod verbose;

pub use verbose::VerboseCodec;

use thiserror::Error;

use crate::json_crdt::model::Model;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Encodes a whole document and decodes it back.
pub trait ModelCodec {
    fn encode(&self, model: &Model) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, data: &[u8]) -> Result<Model, CodecError>;
}
