use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            source::Source,
            text_chunk::{SearchHit, TextChunk},
        },
    },
    utils::{
        authz::tenant_limits,
        config::AppConfig,
        deadline::with_deadline,
        embedding::EmbeddingProvider,
    },
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    chat::ChatProvider,
    chunker::{chunk_text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP},
    extract::{read_file_text, TextExtractor},
};

pub const DEFAULT_CONTEXT_LIMIT: usize = 5;

/// Preview length for debug output.
const DEBUG_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub tenant_id: String,
    pub user_id: String,
    pub context_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceDocument>,
    pub confidence: f32,
    pub query_id: String,
    pub tenant_id: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub ok: bool,
    pub source_id: String,
    pub chunks_created: usize,
    pub title: String,
    pub tenant_id: String,
    pub embedder: String,
}

#[derive(Debug, Serialize)]
pub struct DebugChunk {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct DebugReport {
    pub query: String,
    pub tenant_id: String,
    pub embedder: String,
    pub chat_model: String,
    pub rag_only: bool,
    pub retrieved_chunks: Vec<DebugChunk>,
    pub total_results: usize,
}

/// Orchestrates the single-shot pipeline: embed, tenant-scoped search,
/// grounded answer for queries; chunk, batch-embed, upsert for ingest.
/// Holds port handles only, no request state.
pub struct RagService {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    chat: Arc<ChatProvider>,
    config: Arc<AppConfig>,
    rag_only: bool,
}

impl RagService {
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

    fn embed_deadline(&self) -> Duration {
        Duration::from_secs(self.config.embed_timeout_secs)
    }

    fn chat_deadline(&self) -> Duration {
        Duration::from_secs(self.config.chat_timeout_secs)
    }

    fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.config.store_read_timeout_secs)
    }

    fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.config.store_write_timeout_secs)
    }

    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, AppError> {
        let query_vector = with_deadline(
            "query embedding",
            self.embed_deadline(),
            self.embedder.embed_query(&request.query),
        )
        .await?;

        let k = request.context_limit.unwrap_or(DEFAULT_CONTEXT_LIMIT);
        let hits = with_deadline(
            "vector search",
            self.read_deadline(),
            TextChunk::search(&self.db, &request.tenant_id, query_vector, k),
        )
        .await?;

        let answer = with_deadline(
            "answer generation",
            self.chat_deadline(),
            self.chat.answer(&hits, &request.query, self.rag_only),
        )
        .await?;

        Ok(QueryResponse {
            answer,
            sources: hits.iter().map(source_document).collect(),
            confidence: confidence(&hits),
            query_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id,
            conversation_id: None,
        })
    }

    /// Synchronous ingest: chunk, embed the whole batch, persist the
    /// source atomically.
    pub async fn ingest_text(
        &self,
        title: &str,
        text: &str,
        tenant_id: &str,
    ) -> Result<IngestOutcome, AppError> {
        let limits = tenant_limits(&self.config, tenant_id);
        let chunk_size = usize::min(DEFAULT_CHUNK_SIZE, limits.max_chunk_size);
        let chunks = chunk_text(text, chunk_size, DEFAULT_OVERLAP.min(chunk_size / 2))?;

        let embeddings = with_deadline(
            "batch embedding",
            self.embed_deadline(),
            self.embedder.embed_batch(&chunks),
        )
        .await?;

        let chunks_created = chunks.len();
        let source_id = with_deadline(
            "chunk upsert",
            self.write_deadline(),
            TextChunk::upsert_chunks(
                &self.db,
                tenant_id,
                title,
                chunks,
                embeddings,
                self.embedder.dimension(),
            ),
        )
        .await?;

        info!(
            tenant_id,
            source_id, chunks = chunks_created, "ingested text source"
        );

        Ok(IngestOutcome {
            ok: true,
            source_id,
            chunks_created,
            title: title.to_string(),
            tenant_id: tenant_id.to_string(),
            embedder: self.embedder.backend_label().to_string(),
        })
    }

    /// File ingest: extension dispatch to plain read or the external
    /// extractor, then the text path.
    pub async fn ingest_file(
        &self,
        path: &Path,
        title: &str,
        tenant_id: &str,
        extractor: &dyn TextExtractor,
    ) -> Result<IngestOutcome, AppError> {
        let text = read_file_text(path, extractor).await?;
        self.ingest_text(title, &text, tenant_id).await
    }

    pub async fn recent_sources(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<Source>, AppError> {
        with_deadline(
            "recent sources",
            self.read_deadline(),
            Source::recent(&self.db, tenant_id, limit),
        )
        .await
    }

    /// Same retrieval as `query`, but reports what was retrieved instead
    /// of generating an answer.
    pub async fn debug_query(
        &self,
        query: &str,
        tenant_id: &str,
        k: usize,
    ) -> Result<DebugReport, AppError> {
        let query_vector = with_deadline(
            "query embedding",
            self.embed_deadline(),
            self.embedder.embed_query(query),
        )
        .await?;

        let hits = with_deadline(
            "vector search",
            self.read_deadline(),
            TextChunk::search(&self.db, tenant_id, query_vector, k),
        )
        .await?;

        Ok(DebugReport {
            query: query.to_string(),
            tenant_id: tenant_id.to_string(),
            embedder: self.embedder.backend_label().to_string(),
            chat_model: self.chat.backend_label().to_string(),
            rag_only: self.rag_only,
            total_results: hits.len(),
            retrieved_chunks: hits
                .into_iter()
                .map(|hit| DebugChunk {
                    id: hit.id,
                    source: hit.source,
                    text: preview(&hit.text),
                    score: hit.score,
                })
                .collect(),
        })
    }
}

fn source_document(hit: &SearchHit) -> SourceDocument {
    SourceDocument {
        id: hit.id.clone(),
        title: hit.source.clone(),
        content: hit.text.clone(),
        score: hit.score,
    }
}

/// Confidence is the top hit's score clamped into [0, 1]; no hits means 0.
fn confidence(hits: &[SearchHit]) -> f32 {
    hits.first().map_or(0.0, |hit| hit.score.clamp(0.0, 1.0))
}

fn preview(text: &str) -> String {
    if text.chars().count() > DEBUG_PREVIEW_CHARS {
        let truncated: String = text.chars().take(DEBUG_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
