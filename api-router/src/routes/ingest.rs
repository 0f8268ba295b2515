use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use common::{
    auth::UserContext,
    storage::types::ingest_job::{IngestJob, IngestJobStatus},
};
use ingest_manager::{IngestRequest, SubmitOutcome};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError, routes::query::resolve_tenant};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequestSchema {
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum IngestResponseSchema {
    #[serde(rename_all = "camelCase")]
    Accepted {
        ok: bool,
        job_id: String,
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        ok: bool,
        source_id: String,
        chunks: usize,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusParams {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJobStatusSchema {
    pub job_id: String,
    pub status: String,
    pub tenant_id: String,
    pub user_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<IngestJob> for IngestJobStatusSchema {
    fn from(job: IngestJob) -> Self {
        let mut schema = Self {
            job_id: job.id,
            status: job.status.label().to_string(),
            tenant_id: job.tenant_id,
            user_id: job.user_id,
            title: job.title,
            source_id: None,
            chunk_count: None,
            duration_ms: None,
            error: None,
            created_at: job.created_at,
            started_at: None,
            updated_at: job.updated_at,
        };

        match job.status {
            IngestJobStatus::Queued => {}
            IngestJobStatus::Processing { started_at } => {
                schema.started_at = Some(started_at);
            }
            IngestJobStatus::Completed {
                source_id,
                chunk_count,
                duration_ms,
            } => {
                schema.source_id = Some(source_id);
                schema.chunk_count = Some(chunk_count);
                schema.duration_ms = Some(duration_ms);
            }
            IngestJobStatus::Failed { error } => {
                schema.error = Some(error);
            }
        }

        schema
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentParams {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentDocumentSchema {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub created_at: DateTime<Utc>,
    pub chunks: usize,
}

#[derive(Debug, Serialize)]
pub struct RecentDocumentsResponseSchema {
    pub items: Vec<RecentDocumentSchema>,
}

pub async fn ingest_text(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Json(payload): Json<IngestRequestSchema>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(payload.tenant_id, &user)?;

    let outcome = state
        .jobs
        .submit(IngestRequest {
            title: payload.title,
            text: payload.text,
            tenant_id: tenant,
            user_id: user.uid,
        })
        .await?;

    let response = match outcome {
        SubmitOutcome::Queued { ok, job_id, status } => IngestResponseSchema::Accepted {
            ok,
            job_id,
            status: status.to_string(),
        },
        SubmitOutcome::Completed(outcome) => IngestResponseSchema::Done {
            ok: outcome.ok,
            source_id: outcome.source_id,
            chunks: outcome.chunks_created,
        },
    };

    Ok(Json(response))
}

pub async fn ingest_status(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Query(params): Query<StatusParams>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.get_job(&params.job_id, &user).await?;
    Ok(Json(IngestJobStatusSchema::from(job)))
}

pub async fn recent_documents(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Query(params): Query<RecentParams>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(params.tenant_id, &user)?;

    let sources = state.rag.recent_sources(&tenant, params.limit).await?;

    Ok(Json(RecentDocumentsResponseSchema {
        items: sources
            .into_iter()
            .map(|source| RecentDocumentSchema {
                id: source.id,
                title: source.title,
                doc_type: "document".to_string(),
                created_at: source.created_at,
                chunks: source.chunk_count,
            })
            .collect(),
    }))
}
