use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{api_state::ApiState, error::ApiError};

/// Resolves the caller's identity through the configured verifier and
/// attaches the `UserContext` for downstream handlers.
pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(&request);
    let user = state.auth.verify(token.as_deref()).await?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn extract_bearer(request: &Request) -> Option<String> {
    request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        .or_else(|| {
            request
                .headers()
                .get("X-API-Key")
                .and_then(|v| v.to_str().ok())
        })
        .map(String::from)
}
