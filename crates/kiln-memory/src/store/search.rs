use super::SqliteStore;
use crate::error::SearchError;
use crate::types::RetrievalResult;
use crate::vector::{blob_to_vec, cosine_similarity};

impl SqliteStore {
    /// Brute-force cosine search over every fresh chunk embedded with the
    /// active fingerprint. Results are filtered by `threshold`, then ordered
    /// by score descending with ties broken by chunk index and document id
    /// so repeated queries return identical rankings.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::IndexUnavailable`] when no chunk carries a
    /// fresh vector for `fingerprint`, or a storage error if the scan fails.
    pub async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        threshold: f32,
        fingerprint: &str,
    ) -> Result<Vec<RetrievalResult>, SearchError> {
        let rows: Vec<(String, String, String, i64, String, Vec<u8>)> = sqlx::query_as(
            "SELECT c.id, c.document_id, d.title, c.chunk_index, c.content, c.embedding \
             FROM chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE d.deleted_at IS NULL \
               AND c.embedding IS NOT NULL \
               AND c.stale = 0 \
               AND c.fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_all(self.pool())
        .await?;

        if rows.is_empty() {
            return Err(SearchError::IndexUnavailable);
        }

        let mut scored: Vec<RetrievalResult> = rows
            .into_iter()
            .map(
                |(chunk_id, document_id, document_title, chunk_index, content, blob)| {
                    let score = cosine_similarity(query_vector, &blob_to_vec(&blob));
                    RetrievalResult {
                        chunk_id,
                        document_id,
                        document_title,
                        chunk_index,
                        content,
                        score,
                    }
                },
            )
            .filter(|r| r.score >= threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}
