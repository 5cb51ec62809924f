use chrono::{DateTime, Utc};

use super::SqliteStore;

/// Archived fine-tuning job record. The config and final progress snapshot
/// are stored as JSON so the schema stays agnostic of trainer internals.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: String,
    pub config: String,
    pub status: String,
    pub progress: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SqliteStore {
    /// Record a newly launched job.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record_job_started(
        &self,
        id: &str,
        config_json: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO training_jobs (id, config, status, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(config_json)
        .bind("running")
        .bind(started_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Stamp a job with its terminal status, last progress snapshot, and
    /// failure message if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn record_job_finished(
        &self,
        id: &str,
        status: &str,
        progress_json: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE training_jobs SET status = ?, progress = ?, error = ?, finished_at = ? \
             WHERE id = ?",
        )
        .bind(status)
        .bind(progress_json)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent jobs first, capped at `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn training_history(&self, limit: i64) -> Result<Vec<JobRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, config, status, progress, error, started_at, finished_at \
             FROM training_jobs ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn started_job_appears_in_history() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        store
            .record_job_started("job-1", r#"{"method":"lora"}"#, Utc::now())
            .await
            .unwrap();

        let history = store.training_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "running");
        assert!(history[0].finished_at.is_none());
    }

    #[tokio::test]
    async fn finished_job_carries_terminal_state() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        store
            .record_job_started("job-1", "{}", Utc::now())
            .await
            .unwrap();
        store
            .record_job_finished("job-1", "failed", Some(r#"{"progress":0.4}"#), Some("boom"))
            .await
            .unwrap();

        let history = store.training_history(10).await.unwrap();
        assert_eq!(history[0].status, "failed");
        assert_eq!(history[0].error.as_deref(), Some("boom"));
        assert!(history[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let base = Utc::now();
        for i in 0..5 {
            store
                .record_job_started(
                    &format!("job-{i}"),
                    "{}",
                    base + chrono::Duration::seconds(i),
                )
                .await
                .unwrap();
        }

        let history = store.training_history(3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, "job-4");
        assert_eq!(history[2].id, "job-2");
    }
}
