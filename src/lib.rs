//! Local knowledge base: document ingestion, embedding, retrieval-augmented
//! generation, and fine-tuning supervision over a SQLite corpus.

pub mod service;

pub use service::{HybridParams, KilnService};
