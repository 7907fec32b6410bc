//! JSON CRDT document model and node types.
//!
//! - [`nodes`]: the node variants and the RGA sequence engine behind
//!   strings, binary blobs and arrays
//! - [`model`]: the document, patch application, path lookup and the local
//!   editing API
//! - [`extensions`]: registry of typed wrappers over composite nodes
//! - [`codec`]: whole-document snapshots

pub mod codec;
pub mod extensions;
pub mod model;
pub mod nodes;

pub use codec::{CodecError, ModelCodec, VerboseCodec};
pub use extensions::{ExtApi, ExtNode, ExtSchema, Extension, Extensions};
pub use model::Model;
pub use nodes::{Node, NodeIndex, NodeKind};
