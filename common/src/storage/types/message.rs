use std::fmt;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::conversation::Conversation;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

stored_object!(Message, "message", {
    conversation_id: String,
    role: MessageRole,
    content: String,
    metadata: Option<serde_json::Value>
});

impl Message {
    pub fn new(
        conversation_id: String,
        role: MessageRole,
        content: String,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            role,
            content,
            metadata,
        }
    }

    /// Appends a message and advances the owning conversation's
    /// `updated_at` to the message timestamp, atomically.
    pub async fn append(db: &SurrealDbClient, message: Message) -> Result<(), AppError> {
        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "CREATE type::thing('{message_table}', $message_id) CONTENT $message;",
                message_table = Self::table_name(),
            ))
            .query(format!(
                "UPDATE type::thing('{conversation_table}', $conversation_id) SET updated_at = $at;",
                conversation_table = Conversation::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("message_id", message.id.clone()))
            .bind(("conversation_id", message.conversation_id.clone()))
            .bind(("at", surrealdb::sql::Datetime::from(message.created_at)))
            .bind(("message", message))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Every message of a conversation in non-decreasing timestamp order.
    pub async fn all_for_conversation(
        db: &SurrealDbClient,
        conversation_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let messages: Vec<Self> = db
            .query(format!(
                "SELECT * FROM {table}
                 WHERE conversation_id = $conversation_id
                 ORDER BY created_at ASC",
                table = Self::table_name()
            ))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok(messages)
    }

    /// The last `limit` messages, returned oldest-first.
    pub async fn history(
        db: &SurrealDbClient,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let mut messages: Vec<Self> = db
            .query(format!(
                "SELECT * FROM {table}
                 WHERE conversation_id = $conversation_id
                 ORDER BY created_at DESC
                 LIMIT $limit",
                table = Self::table_name()
            ))
            .bind(("conversation_id", conversation_id.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;

        messages.reverse();
        Ok(messages)
    }

    pub async fn count_for_conversation(
        db: &SurrealDbClient,
        conversation_id: &str,
    ) -> Result<usize, AppError> {
        let mut response = db
            .query(format!(
                "SELECT VALUE count() FROM {table}
                 WHERE conversation_id = $conversation_id
                 GROUP ALL",
                table = Self::table_name()
            ))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?;

        let counts: Vec<usize> = response.take(0)?;
        Ok(counts.first().copied().unwrap_or(0))
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

// helper function to format a slice of messages as dialogue lines
pub fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}
