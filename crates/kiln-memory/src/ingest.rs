//! File-to-corpus pipeline: extract text, deduplicate by content hash, split
//! into chunks, and persist.

use std::path::Path;

use chrono::Utc;
use tracing::info;

use crate::document::{Chunker, extract_text};
use crate::error::IngestionError;
use crate::store::{HashMatch, SqliteStore};
use crate::types::Document;

/// Ingestion front door. Holds the store handle and the active chunking
/// parameters; cheap to clone.
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: SqliteStore,
    chunker: Chunker,
}

impl Ingestor {
    #[must_use]
    pub fn new(store: SqliteStore, chunker: Chunker) -> Self {
        Self { store, chunker }
    }

    /// Ingest a file into the corpus. Byte-identical content is rejected with
    /// [`IngestionError::DuplicateContent`]; re-uploading content whose
    /// document was soft-deleted revives that document instead of creating a
    /// second row. Returns the document and its chunk count.
    ///
    /// # Errors
    ///
    /// Format, parse, I/O, and storage failures, plus the duplicate policy
    /// above.
    pub async fn ingest(
        &self,
        path: &Path,
        title: Option<&str>,
    ) -> Result<(Document, usize), IngestionError> {
        let (content, file_type) = extract_text(path).await?;
        let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();

        match self.store.find_by_hash(&content_hash).await? {
            Some(HashMatch::Live(existing_id)) => {
                return Err(IngestionError::DuplicateContent { existing_id });
            }
            Some(HashMatch::SoftDeleted(id)) => {
                let doc = self.store.revive_document(&id).await?;
                let chunks = self.chunker.split(&doc.content);
                let count = chunks.len();
                self.store.replace_chunks(&id, &chunks).await?;
                info!(document_id = %id, chunks = count, "revived soft-deleted document");
                return Ok((doc, count));
            }
            None => {}
        }

        let title = match title {
            Some(t) => t.to_string(),
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string(),
        };

        let now = Utc::now();
        let doc = Document {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            content,
            path: path.display().to_string(),
            file_type,
            content_hash,
            created_at: now,
            updated_at: now,
        };

        let chunks = self.chunker.split(&doc.content);
        self.store.insert_document(&doc, &chunks).await?;
        info!(
            document_id = %doc.id,
            file_type = file_type.as_str(),
            chunks = chunks.len(),
            "document ingested"
        );
        Ok((doc, chunks.len()))
    }

    /// Re-split an existing document with the current chunking parameters,
    /// discarding its old chunks and their embeddings. Explicit by design:
    /// changing chunking config never reprocesses the corpus implicitly.
    ///
    /// # Errors
    ///
    /// `Storage(RowNotFound)` when the document does not exist or is deleted.
    pub async fn rechunk(&self, document_id: &str) -> Result<usize, IngestionError> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or(IngestionError::Storage(sqlx::Error::RowNotFound))?;

        let chunks = self.chunker.split(&doc.content);
        self.store.replace_chunks(document_id, &chunks).await?;
        info!(document_id = %document_id, chunks = chunks.len(), "document re-chunked");
        Ok(chunks.len())
    }
}
