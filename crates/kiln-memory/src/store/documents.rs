use chrono::{DateTime, Utc};

use super::SqliteStore;
use crate::document::ChunkDraft;
use crate::error::IngestionError;
use crate::types::{Document, FileType};

/// Outcome of a content-hash lookup.
pub(crate) enum HashMatch {
    Live(String),
    SoftDeleted(String),
}

impl SqliteStore {
    /// Look up a document by content hash, distinguishing live rows from
    /// soft-deleted ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub(crate) async fn find_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<HashMatch>, sqlx::Error> {
        let row: Option<(String, Option<DateTime<Utc>>)> =
            sqlx::query_as("SELECT id, deleted_at FROM documents WHERE content_hash = ?")
                .bind(content_hash)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(id, deleted_at)| {
            if deleted_at.is_some() {
                HashMatch::SoftDeleted(id)
            } else {
                HashMatch::Live(id)
            }
        }))
    }

    /// Insert a document and its chunks in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; nothing is persisted partially.
    pub async fn insert_document(
        &self,
        doc: &Document,
        chunks: &[ChunkDraft],
    ) -> Result<(), IngestionError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO documents \
             (id, title, content, file_path, file_type, content_hash, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.path)
        .bind(doc.file_type.as_str())
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, content, word_count) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&doc.id)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(i64::try_from(chunk.word_count).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Revive a soft-deleted document that matches re-uploaded content.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or the row vanished.
    pub(crate) async fn revive_document(&self, id: &str) -> Result<Document, IngestionError> {
        sqlx::query("UPDATE documents SET deleted_at = NULL, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        self.get_document(id)
            .await?
            .ok_or(IngestionError::Storage(sqlx::Error::RowNotFound))
    }

    /// All live documents, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_documents(&self) -> Result<Vec<Document>, sqlx::Error> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, title, content, file_path, file_type, content_hash, created_at, updated_at \
             FROM documents WHERE deleted_at IS NULL ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(DocumentRow::into_document).collect())
    }

    /// Fetch one live document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, sqlx::Error> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, title, content, file_path, file_type, content_hash, created_at, updated_at \
             FROM documents WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(DocumentRow::into_document))
    }

    /// Soft-delete a document; its chunks drop out of search transitively.
    /// Returns `false` when no live document matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn delete_document(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE documents SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(Utc::now())
                .bind(id)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace all chunks of a document with freshly split drafts. Existing
    /// embeddings are discarded along with the old rows.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the swap is transactional.
    pub async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkDraft],
    ) -> Result<(), IngestionError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, content, word_count) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(document_id)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(i64::try_from(chunk.word_count).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE documents SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    title: String,
    content: String,
    file_path: String,
    file_type: String,
    content_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self) -> Document {
        Document {
            file_type: FileType::from_extension(&self.file_type).unwrap_or(FileType::Txt),
            id: self.id,
            title: self.title,
            content: self.content,
            path: self.file_path,
            content_hash: self.content_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
