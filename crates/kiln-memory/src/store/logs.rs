use chrono::{DateTime, Utc};
use kiln_core::events::{LogEntry, LogLevel};

use super::SqliteStore;

/// How many log rows the persistent table retains.
const LOG_RETENTION: i64 = 500;

impl SqliteStore {
    /// Append a log entry and prune rows beyond the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or prune fails.
    pub async fn append_log(&self, entry: &LogEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO logs (timestamp, level, component, message) VALUES (?, ?, ?, ?)",
        )
        .bind(entry.timestamp)
        .bind(entry.level.as_str())
        .bind(&entry.component)
        .bind(&entry.message)
        .execute(self.pool())
        .await?;

        sqlx::query(
            "DELETE FROM logs WHERE id NOT IN \
             (SELECT id FROM logs ORDER BY id DESC LIMIT ?)",
        )
        .bind(LOG_RETENTION)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent persisted log entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent_logs(&self, limit: i64) -> Result<Vec<LogEntry>, sqlx::Error> {
        let mut rows: Vec<(DateTime<Utc>, String, String, String)> = sqlx::query_as(
            "SELECT timestamp, level, component, message \
             FROM logs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.reverse();

        Ok(rows
            .into_iter()
            .map(|(timestamp, level, component, message)| LogEntry {
                timestamp,
                level: parse_level(&level),
                component,
                message,
            })
            .collect())
    }
}

fn parse_level(raw: &str) -> LogLevel {
    match raw {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}
