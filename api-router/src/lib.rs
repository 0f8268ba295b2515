#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    http::{HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use common::utils::config::AppConfig;
use middleware_api_auth::api_auth;
use middleware_rate_limit::rate_limit;
use routes::{
    conversation::{
        conversational_query, delete_conversation, get_conversation, list_conversations,
    },
    ingest::{ingest_status, ingest_text, recent_documents},
    liveness::live,
    query::{debug_rag, query},
    readiness::ready,
};
use tower_http::cors::CorsLayer;

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod middleware_rate_limit;
mod routes;

/// The service's HTTP surface. Health probes are public; everything else
/// sits behind auth and rate limiting.
pub fn api_routes(state: ApiState) -> Router {
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/healthz", get(live))
        .route("/readyz", get(ready));

    // Protected endpoints; auth resolves the caller before the limiter
    // keys on it.
    let protected = Router::new()
        .route("/query", post(query))
        .route("/query/debug/rag", post(debug_rag))
        .route("/query/ingest/text", post(ingest_text))
        .route("/query/ingest/status", get(ingest_status))
        .route("/query/ingest/recent", get(recent_documents))
        .route("/query/conversation/query", post(conversational_query))
        .route("/query/conversations", get(list_conversations))
        .route(
            "/query/conversations/{conversation_id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route_layer(from_fn_with_state(state.clone(), rate_limit))
        .route_layer(from_fn_with_state(state.clone(), api_auth));

    public.merge(protected).with_state(state)
}

/// CORS policy from configuration; invalid origins are skipped.
pub fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
