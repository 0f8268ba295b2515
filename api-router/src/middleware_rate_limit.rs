use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::{
    auth::UserContext,
    utils::{
        authz::tenant_limits,
        rate_limit::{RateDecision, TenantRateLimits},
    },
};
use tracing::warn;

use crate::{api_state::ApiState, error::ApiError};

/// Edge burst protection per caller identity, then the tenant's
/// multi-window quota. Runs after auth so authenticated callers are
/// keyed by user id rather than address.
pub async fn rate_limit(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request.extensions().get::<UserContext>().cloned();

    let identifier = match &user {
        Some(user) => format!("user:{}", user.uid),
        None => format!("ip:{}", client_ip(&request)),
    };

    let edge = state
        .limiter
        .check_edge_limit(&identifier, state.config.edge_burst_per_minute)
        .await?;
    if !edge.is_allowed() {
        warn!(identifier, "edge rate limit exceeded");
        return Err(ApiError::from_rate_decision(edge));
    }

    if let Some(user) = &user {
        let mut limits = TenantRateLimits::from_config(&state.config);
        // Per-tenant overrides bound the hourly query budget.
        let tenant = tenant_limits(&state.config, &user.tenant_id);
        limits.hour = limits
            .hour
            .min(u32::try_from(tenant.max_queries_per_hour).unwrap_or(u32::MAX));

        let decision = state
            .limiter
            .check_tenant_limit(&user.tenant_id, &limits)
            .await?;
        if let RateDecision::Exceeded { window, .. } = &decision {
            warn!(
                tenant_id = %user.tenant_id,
                window = window.as_str(),
                "tenant rate limit exceeded"
            );
            return Err(ApiError::from_rate_decision(decision));
        }
    }

    Ok(next.run(request).await)
}

/// Client address for unauthenticated callers, proxy headers first.
fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
    {
        return real_ip.trim().to_string();
    }

    "unknown".to_string()
}
