use super::SqliteStore;
use crate::types::StoredChunk;
use crate::vector::{blob_to_vec, vec_to_blob};

impl SqliteStore {
    /// Chunks of live documents that still need a vector for `fingerprint`:
    /// never embedded, or stamped by a different provider/model.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn chunks_pending_embedding(
        &self,
        fingerprint: &str,
    ) -> Result<Vec<(String, String)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT c.id, c.content FROM chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE d.deleted_at IS NULL \
               AND (c.embedding IS NULL OR c.fingerprint IS NOT ?) \
             ORDER BY d.created_at ASC, c.chunk_index ASC",
        )
        .bind(fingerprint)
        .fetch_all(self.pool())
        .await
    }

    /// Store a chunk's vector stamped with the producing fingerprint and
    /// clear its stale flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn store_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
        fingerprint: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE chunks SET embedding = ?, fingerprint = ?, stale = 0 WHERE id = ?",
        )
        .bind(vec_to_blob(vector))
        .bind(fingerprint)
        .bind(chunk_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Flag every embedded chunk whose fingerprint differs from the active
    /// one as stale, and unflag matching ones. Returns the number of chunks
    /// newly excluded from search.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_stale_except(&self, fingerprint: &str) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let stale = sqlx::query(
            "UPDATE chunks SET stale = 1 \
             WHERE embedding IS NOT NULL AND fingerprint IS NOT ? AND stale = 0",
        )
        .bind(fingerprint)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE chunks SET stale = 0 \
             WHERE embedding IS NOT NULL AND fingerprint = ? AND stale = 1",
        )
        .bind(fingerprint)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(stale.rows_affected())
    }

    /// Count of searchable chunks for `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn embedded_count(&self, fingerprint: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE d.deleted_at IS NULL AND c.embedding IS NOT NULL \
               AND c.stale = 0 AND c.fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_one(self.pool())
        .await
    }

    /// All chunks of a document, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn chunks_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<StoredChunk>, sqlx::Error> {
        let rows: Vec<(String, String, i64, String, i64, Option<Vec<u8>>, Option<String>, i64)> =
            sqlx::query_as(
                "SELECT id, document_id, chunk_index, content, word_count, embedding, fingerprint, stale \
                 FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
            )
            .bind(document_id)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, document_id, index, content, word_count, embedding, fingerprint, stale)| {
                    StoredChunk {
                        id,
                        document_id,
                        index,
                        content,
                        word_count,
                        embedding: embedding.as_deref().map(blob_to_vec),
                        fingerprint,
                        stale: stale != 0,
                    }
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::document::ChunkDraft;
    use crate::types::{Document, FileType};

    async fn seeded_store() -> (SqliteStore, String) {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let now = Utc::now();
        let doc = Document {
            id: "doc-1".into(),
            title: "t".into(),
            content: "one two three four".into(),
            path: "/tmp/t.txt".into(),
            file_type: FileType::Txt,
            content_hash: "h".into(),
            created_at: now,
            updated_at: now,
        };
        let chunks = vec![
            ChunkDraft {
                index: 0,
                text: "one two".into(),
                word_count: 2,
            },
            ChunkDraft {
                index: 1,
                text: "three four".into(),
                word_count: 2,
            },
        ];
        store.insert_document(&doc, &chunks).await.unwrap();
        (store, doc.id)
    }

    #[tokio::test]
    async fn fresh_chunks_are_pending() {
        let (store, _) = seeded_store().await;
        let pending = store.chunks_pending_embedding("p:m").await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn stored_embedding_round_trips() {
        let (store, doc_id) = seeded_store().await;
        let pending = store.chunks_pending_embedding("p:m").await.unwrap();
        store
            .store_embedding(&pending[0].0, &[0.1, 0.2, 0.3], "p:m")
            .await
            .unwrap();

        let chunks = store.chunks_for_document(&doc_id).await.unwrap();
        let embedded = chunks.iter().find(|c| c.embedding.is_some()).unwrap();
        assert_eq!(embedded.embedding.as_ref().unwrap(), &vec![0.1, 0.2, 0.3]);
        assert_eq!(embedded.fingerprint.as_deref(), Some("p:m"));
        assert!(!embedded.stale);

        assert_eq!(store.chunks_pending_embedding("p:m").await.unwrap().len(), 1);
        assert_eq!(store.embedded_count("p:m").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn provider_switch_marks_chunks_stale() {
        let (store, doc_id) = seeded_store().await;
        for (id, _) in store.chunks_pending_embedding("old:m").await.unwrap() {
            store.store_embedding(&id, &[1.0, 0.0], "old:m").await.unwrap();
        }
        assert_eq!(store.embedded_count("old:m").await.unwrap(), 2);

        let newly_stale = store.mark_stale_except("new:m").await.unwrap();
        assert_eq!(newly_stale, 2);
        assert_eq!(store.embedded_count("new:m").await.unwrap(), 0);
        assert!(store
            .chunks_for_document(&doc_id)
            .await
            .unwrap()
            .iter()
            .all(|c| c.stale));

        // all chunks now pending for the new fingerprint
        assert_eq!(store.chunks_pending_embedding("new:m").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn switching_back_unflags_matching_chunks() {
        let (store, _) = seeded_store().await;
        for (id, _) in store.chunks_pending_embedding("old:m").await.unwrap() {
            store.store_embedding(&id, &[1.0, 0.0], "old:m").await.unwrap();
        }
        store.mark_stale_except("new:m").await.unwrap();
        store.mark_stale_except("old:m").await.unwrap();
        assert_eq!(store.embedded_count("old:m").await.unwrap(), 2);
    }
}
