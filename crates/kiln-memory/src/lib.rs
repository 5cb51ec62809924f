//! Document corpus: ingestion, chunking, SQLite persistence, and cosine
//! similarity search over embedded chunks.

pub mod document;
pub mod error;
pub mod ingest;
pub mod store;
pub mod types;
pub mod vector;

pub use document::chunker::{ChunkDraft, Chunker};
pub use error::{IngestionError, SearchError, StorageError};
pub use ingest::Ingestor;
pub use store::{ChatMessage, ChatRole, JobRow, SqliteStore};
pub use types::{Document, FileType, RetrievalResult, StoredChunk};
