use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SqliteStore;

/// Who produced a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One persisted chat message. Messages reference the documents that were
/// retrieved for the exchange they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub document_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: ChatRole, content: &str, document_refs: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            document_refs,
            created_at: Utc::now(),
        }
    }
}

impl SqliteStore {
    /// Append a chat message to the conversation history.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails.
    pub async fn record_chat_message(&self, message: &ChatMessage) -> Result<(), sqlx::Error> {
        let refs = serde_json::to_string(&message.document_refs)
            .map_err(|e| sqlx::Error::Encode(e.into()))?;
        sqlx::query(
            "INSERT INTO chat_messages (id, role, content, document_refs, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(refs)
        .bind(message.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent chat messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn chat_history(&self, limit: i64) -> Result<Vec<ChatMessage>, sqlx::Error> {
        let mut rows: Vec<(String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, role, content, document_refs, created_at \
             FROM chat_messages ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.reverse();

        Ok(rows
            .into_iter()
            .map(|(id, role, content, refs, created_at)| ChatMessage {
                id,
                role: parse_role(&role),
                content,
                document_refs: serde_json::from_str(&refs).unwrap_or_default(),
                created_at,
            })
            .collect())
    }
}

fn parse_role(raw: &str) -> ChatRole {
    match raw {
        "assistant" => ChatRole::Assistant,
        _ => ChatRole::User,
    }
}
