//! The retrieval pipeline.
//!
//! Records flow chunker → embedder → synchronizer into the vector index;
//! queries flow embedder → index → prompt builder. Each stage is its own
//! module with the error taxonomy from `core::errors`.

pub mod chunker;
pub mod completion;
pub mod embedder;
pub mod prompt;
pub mod search;
pub mod sync;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A bounded fragment of a record's content, independently embeddable.
///
/// Ids are derived from the record: the record id itself when the content
/// fit in one segment, `{record_id}_chunk_{index}` otherwise. Segments are
/// regenerated whole whenever a record changes, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub content: String,
    pub metadata: Value,
}

/// A segment plus its embedding. Exists only between the embedding call
/// and the verified upsert.
#[derive(Debug, Clone)]
pub struct EmbeddedSegment {
    pub segment: Segment,
    pub vector: Vec<f32>,
}
