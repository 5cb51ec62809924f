use chrono::Utc;
use kiln_core::config::RagConfig;

use super::SqliteStore;
use crate::error::StorageError;

impl SqliteStore {
    /// Persist the active retrieval configuration. The table holds a single
    /// row; saving replaces it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the upsert fails.
    pub async fn save_rag_config(&self, config: &RagConfig) -> Result<(), StorageError> {
        let payload = serde_json::to_string(config)?;
        sqlx::query(
            "INSERT INTO rag_config (id, payload, updated_at) VALUES (1, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, \
             updated_at = excluded.updated_at",
        )
        .bind(payload)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Load the persisted retrieval configuration, if any was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or deserialization fails.
    pub async fn load_rag_config(&self) -> Result<Option<RagConfig>, StorageError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM rag_config WHERE id = 1")
                .fetch_optional(self.pool())
                .await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
