pub mod chunker;
pub mod loader;

pub use chunker::{ChunkDraft, Chunker};
pub use loader::{DocxLoader, PdfLoader, TextLoader, extract_text};

use crate::error::IngestionError;

/// Default maximum file size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Format-specific text extraction.
pub trait DocumentLoader: Send + Sync {
    fn load(
        &self,
        path: &std::path::Path,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<String, IngestionError>> + Send + '_>,
    >;

    fn supported_extensions(&self) -> &[&str];
}
