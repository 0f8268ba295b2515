use std::sync::Arc;
use std::time::Duration;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            conversation::Conversation,
            message::{format_history, Message, MessageRole},
            text_chunk::TextChunk,
        },
    },
    utils::{config::AppConfig, deadline::with_deadline, embedding::EmbeddingProvider},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    chat::ChatProvider, service::DEFAULT_CONTEXT_LIMIT, QueryResponse, SourceDocument,
};

pub const DEFAULT_MEMORY_WINDOW: usize = 10;

/// How many trailing messages (three exchanges) prefix the retrieval query.
const CONTEXT_MESSAGES: usize = 6;

/// Words taken from the first query when titling a new conversation.
const TITLE_WORDS: usize = 6;

#[derive(Debug, Clone)]
pub struct ConversationalQueryRequest {
    pub conversation_id: Option<String>,
    pub query: String,
    pub tenant_id: String,
    pub user_id: String,
    pub context_limit: Option<usize>,
    pub memory_window: Option<usize>,
}

/// The conversational pipeline: unlike `RagService` it carries
/// per-conversation memory, folding recent turns into both retrieval and
/// generation, and persisting every exchange.
pub struct ConversationalRagService {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    chat: Arc<ChatProvider>,
    config: Arc<AppConfig>,
    rag_only: bool,
}

impl ConversationalRagService {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        chat: Arc<ChatProvider>,
        config: Arc<AppConfig>,
    ) -> Self {
        let rag_only = config.effective_rag_only();
        Self {
            db,
            embedder,
            chat,
            config,
            rag_only,
        }
    }

    pub async fn conversational_query(
        &self,
        request: ConversationalQueryRequest,
    ) -> Result<QueryResponse, AppError> {
        let read_deadline = Duration::from_secs(self.config.store_read_timeout_secs);
        let write_deadline = Duration::from_secs(self.config.store_write_timeout_secs);

        // Resume the conversation, or open a new one titled from the query.
        let (conversation_id, history) = match &request.conversation_id {
            Some(id) => {
                let conversation = with_deadline(
                    "conversation lookup",
                    read_deadline,
                    Conversation::get_owned(&self.db, id, &request.tenant_id, &request.user_id),
                )
                .await?;

                let window = request.memory_window.unwrap_or(DEFAULT_MEMORY_WINDOW);
                let history = with_deadline(
                    "conversation history",
                    read_deadline,
                    Message::history(&self.db, &conversation.id, window),
                )
                .await?;

                (conversation.id, history)
            }
            None => {
                let conversation = Conversation::new(
                    request.tenant_id.clone(),
                    request.user_id.clone(),
                    derive_title(&request.query),
                );
                let id = conversation.id.clone();
                self.db.store_item(conversation).await?;
                info!(conversation_id = %id, tenant_id = %request.tenant_id, "created conversation");
                (id, Vec::new())
            }
        };

        let contextual_query = build_contextual_query(&request.query, &history);

        let query_vector = with_deadline(
            "query embedding",
            Duration::from_secs(self.config.embed_timeout_secs),
            self.embedder.embed_query(&contextual_query),
        )
        .await?;

        let k = request.context_limit.unwrap_or(DEFAULT_CONTEXT_LIMIT);
        let hits = with_deadline(
            "vector search",
            read_deadline,
            TextChunk::search(&self.db, &request.tenant_id, query_vector, k),
        )
        .await?;

        let answer = with_deadline(
            "answer generation",
            Duration::from_secs(self.config.chat_timeout_secs),
            self.chat
                .conversational_answer(&hits, &request.query, &history, self.rag_only),
        )
        .await?;

        let confidence = hits
            .first()
            .map_or(0.0, |hit| hit.score.clamp(0.0, 1.0));

        // Persist the user turn, then the assistant turn with its
        // grounding metadata. The conversation's updated_at follows each
        // appended message's timestamp.
        let user_message = Message::new(
            conversation_id.clone(),
            MessageRole::User,
            request.query.clone(),
            None,
        );
        with_deadline(
            "message append",
            write_deadline,
            Message::append(&self.db, user_message),
        )
        .await?;

        let assistant_message = Message::new(
            conversation_id.clone(),
            MessageRole::Assistant,
            answer.clone(),
            Some(json!({
                "sources": hits.iter().map(|h| h.source.clone()).collect::<Vec<_>>(),
                "confidence": confidence,
                "context_used": hits.len(),
            })),
        );
        with_deadline(
            "message append",
            write_deadline,
            Message::append(&self.db, assistant_message),
        )
        .await?;

        Ok(QueryResponse {
            answer,
            sources: hits
                .iter()
                .map(|hit| SourceDocument {
                    id: hit.id.clone(),
                    title: hit.source.clone(),
                    content: hit.text.clone(),
                    score: hit.score,
                })
                .collect(),
            confidence,
            query_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id,
            conversation_id: Some(conversation_id),
        })
    }

    pub async fn list_conversations(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, AppError> {
        Conversation::list_for_user(&self.db, tenant_id, user_id, limit).await
    }

    /// A conversation with its full message history, oldest first.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<(Conversation, Vec<Message>), AppError> {
        let conversation =
            Conversation::get_owned(&self.db, conversation_id, tenant_id, user_id).await?;
        let messages = Message::all_for_conversation(&self.db, conversation_id).await?;
        Ok((conversation, messages))
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<(), AppError> {
        Conversation::get_owned(&self.db, conversation_id, tenant_id, user_id).await?;
        Conversation::delete_with_messages(&self.db, conversation_id).await
    }
}

/// Title a fresh conversation from the first six words of the query.
fn derive_title(query: &str) -> String {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() {
        return "New Conversation".to_string();
    }

    let mut title = words
        .iter()
        .take(TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > TITLE_WORDS {
        title.push('…');
    }
    title
}

/// Prefixes the current question with up to the last three exchanges so
/// retrieval sees the dialogue, not just the follow-up fragment.
fn build_contextual_query(query: &str, history: &[Message]) -> String {
    if history.is_empty() {
        return query.to_string();
    }

    let start = history.len().saturating_sub(CONTEXT_MESSAGES);
    let context = format_history(&history[start..]);

    format!("Previous conversation:\n{context}\n\nCurrent question: {query}")
}
