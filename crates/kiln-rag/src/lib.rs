//! Retrieval-augmented query orchestration: mode dispatch, context assembly,
//! and the corpus embedding pipeline.

pub mod context;
pub mod engine;
pub mod error;
pub mod index;

pub use engine::{RagEngine, RagResponse};
pub use error::RagError;
pub use index::Indexer;
