use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::message::Message;

stored_object!(Conversation, "conversation", {
    tenant_id: String,
    user_id: String,
    title: String
});

impl Conversation {
    pub fn new(tenant_id: String, user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            user_id,
            title,
        }
    }

    /// Fetches a conversation, enforcing tenant visibility and ownership.
    /// A tenant mismatch reads as absence; a user mismatch is forbidden.
    pub async fn get_owned(
        db: &SurrealDbClient,
        conversation_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Self, AppError> {
        let conversation: Conversation = db
            .get_item(conversation_id)
            .await?
            .filter(|c: &Conversation| c.tenant_id == tenant_id)
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if conversation.user_id != user_id {
            return Err(AppError::Forbidden(
                "You don't have access to this conversation".to_string(),
            ));
        }

        Ok(conversation)
    }

    pub async fn list_for_user(
        db: &SurrealDbClient,
        tenant_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let conversations: Vec<Self> = db
            .query(format!(
                "SELECT * FROM {table}
                 WHERE tenant_id = $tenant_id AND user_id = $user_id
                 ORDER BY updated_at DESC
                 LIMIT $limit",
                table = Self::table_name()
            ))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;

        Ok(conversations)
    }

    /// Deletes the conversation and all of its messages in one transaction.
    pub async fn delete_with_messages(
        db: &SurrealDbClient,
        conversation_id: &str,
    ) -> Result<(), AppError> {
        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "DELETE {message_table} WHERE conversation_id = $conversation_id;",
                message_table = Message::table_name(),
            ))
            .query(format!(
                "DELETE type::thing('{conversation_table}', $conversation_id);",
                conversation_table = Self::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("conversation_id", conversation_id.to_string()))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }
}
