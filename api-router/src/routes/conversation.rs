use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use common::{
    auth::UserContext,
    storage::types::message::{Message, MessageRole},
};
use rag_pipeline::ConversationalQueryRequest;
use serde::{Deserialize, Serialize};

use crate::{
    api_state::ApiState,
    error::ApiError,
    routes::query::{resolve_tenant, source_schemas, SourceSchema},
};

fn default_k() -> usize {
    5
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationalQueryRequestSchema {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub question: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub memory_window: Option<usize>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationalQueryResponseSchema {
    pub answer: String,
    pub sources: Vec<SourceSchema>,
    pub confidence: f32,
    pub conversation_id: String,
    pub query_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSchema {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponseSchema {
    pub conversations: Vec<ConversationSchema>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSchema {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<Message> for MessageSchema {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            timestamp: message.created_at,
            metadata: message.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetailSchema {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<MessageSchema>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponseSchema {
    pub success: bool,
}

pub async fn conversational_query(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Json(payload): Json<ConversationalQueryRequestSchema>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(payload.tenant_id, &user)?;

    let response = state
        .conversational
        .conversational_query(ConversationalQueryRequest {
            conversation_id: payload.conversation_id,
            query: payload.question,
            tenant_id: tenant,
            user_id: user.uid,
            context_limit: Some(payload.k),
            memory_window: payload.memory_window,
        })
        .await?;

    let conversation_id = response.conversation_id.clone().unwrap_or_default();

    Ok(Json(ConversationalQueryResponseSchema {
        sources: source_schemas(&response),
        answer: response.answer,
        confidence: response.confidence,
        conversation_id,
        query_id: response.query_id,
    }))
}

pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state
        .conversational
        .list_conversations(&user.tenant_id, &user.uid, params.limit)
        .await?;

    let mut listed = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let message_count =
            Message::count_for_conversation(&state.db, &conversation.id).await?;
        listed.push(ConversationSchema {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            message_count,
        });
    }

    Ok(Json(ConversationsResponseSchema {
        conversations: listed,
    }))
}

pub async fn get_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, messages) = state
        .conversational
        .get_conversation(&conversation_id, &user.tenant_id, &user.uid)
        .await?;

    Ok(Json(ConversationDetailSchema {
        id: conversation.id,
        title: conversation.title,
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
        messages: messages.into_iter().map(MessageSchema::from).collect(),
    }))
}

pub async fn delete_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .conversational
        .delete_conversation(&conversation_id, &user.tenant_id, &user.uid)
        .await?;

    Ok(Json(DeleteResponseSchema { success: true }))
}
