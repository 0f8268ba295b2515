use std::time::Instant;

use axum::{extract::State, response::IntoResponse, Extension, Json};
use common::{auth::UserContext, utils::authz::can_access_tenant};
use event_bus::DomainEvent;
use rag_pipeline::{QueryRequest, QueryResponse};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{api_state::ApiState, error::ApiError};

fn default_k() -> usize {
    5
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequestSchema {
    pub question: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSchema {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponseSchema {
    pub answer: String,
    pub sources: Vec<SourceSchema>,
    pub confidence: f32,
    pub query_id: String,
}

pub(crate) fn source_schemas(response: &QueryResponse) -> Vec<SourceSchema> {
    response
        .sources
        .iter()
        .map(|doc| SourceSchema {
            id: doc.id.clone(),
            title: doc.title.clone(),
            content: doc.content.clone(),
            score: doc.score,
        })
        .collect()
}

/// Resolve the target tenant and enforce the cross-tenant rule.
pub(crate) fn resolve_tenant(
    requested: Option<String>,
    user: &UserContext,
) -> Result<String, ApiError> {
    let tenant = requested.unwrap_or_else(|| user.tenant_id.clone());
    if !can_access_tenant(&user.role, &user.tenant_id, &tenant) {
        return Err(ApiError::Forbidden("Cross-tenant access denied".to_string()));
    }
    Ok(tenant)
}

pub async fn query(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Json(payload): Json<QueryRequestSchema>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(payload.tenant_id, &user)?;
    let question = payload.question.clone();

    let started = Instant::now();
    let response = state
        .rag
        .query(QueryRequest {
            query: payload.question,
            tenant_id: tenant.clone(),
            user_id: user.uid.clone(),
            context_limit: Some(payload.k),
        })
        .await?;

    // Fire-and-forget; a bus hiccup must not fail the query.
    let event = DomainEvent::query_executed(
        &tenant,
        &response.query_id,
        &question,
        &user.uid,
        started.elapsed().as_millis() as u64,
    );
    if let Err(err) = state.bus.publish(&event).await {
        error!(error = %err, "failed to publish QueryExecuted event");
    }

    Ok(Json(QueryResponseSchema {
        sources: source_schemas(&response),
        answer: response.answer,
        confidence: response.confidence,
        query_id: response.query_id,
    }))
}

pub async fn debug_rag(
    State(state): State<ApiState>,
    Extension(user): Extension<UserContext>,
    Json(payload): Json<QueryRequestSchema>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(payload.tenant_id, &user)?;

    let report = state
        .rag
        .debug_query(&payload.question, &tenant, payload.k)
        .await?;

    Ok(Json(report))
}
