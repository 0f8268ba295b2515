use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::{error::AppError, utils::rate_limit::RateDecision};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limit exceeded for the {window} window")]
    RateLimited {
        window: String,
        limit: u32,
        current: u64,
        retry_after: u64,
    },
}

impl ApiError {
    /// 429 from a limiter denial. Allowed decisions are a programming
    /// error and map to a 500 so they cannot pass silently.
    pub fn from_rate_decision(decision: RateDecision) -> Self {
        match decision {
            RateDecision::Exceeded {
                window,
                limit,
                current,
            } => {
                let retry_after = window.duration().as_secs();
                Self::RateLimited {
                    window: window.as_str().to_string(),
                    limit,
                    current,
                    retry_after,
                }
            }
            RateDecision::Allowed => {
                Self::InternalError("allowed decision treated as denial".to_string())
            }
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            AppError::Forbidden(msg) => Self::Forbidden(msg),
            AppError::Timeout(msg) => Self::Timeout(msg),
            AppError::Unavailable(msg) => Self::Unavailable(msg),
            AppError::RateLimited(msg) => Self::RateLimited {
                window: msg,
                limit: 0,
                current: 0,
                retry_after: 60,
            },
            other => {
                tracing::error!("Internal error: {:?}", other);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            Self::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("internal", "Internal server error"),
            ),
            Self::ValidationError(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("validation", message),
            ),
            Self::NotFound(message) => {
                (StatusCode::NOT_FOUND, ErrorResponse::new("not_found", message))
            }
            Self::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("unauthorized", message),
            ),
            Self::Forbidden(message) => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new("forbidden", message),
            ),
            Self::Timeout(message) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorResponse::new("timeout", message),
            ),
            Self::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("unavailable", message),
            ),
            Self::RateLimited {
                window,
                limit,
                current,
                ..
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse::new("rate_limited", &self.to_string())
                    .with_limit(window, *limit, *current),
            ),
        };

        let mut response = (status, Json(error_response)).into_response();

        if let Self::RateLimited { retry_after, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    status: String,
    kind: String,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exceeded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<u64>,
}

impl ErrorResponse {
    fn new(kind: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            kind: kind.to_string(),
            error: message.to_string(),
            exceeded: None,
            limit: None,
            current: None,
        }
    }

    fn with_limit(mut self, window: &str, limit: u32, current: u64) -> Self {
        self.exceeded = Some(window.to_string());
        self.limit = Some(limit);
        self.current = Some(current);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::rate_limit::Window;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("resource not found".to_string());
        assert!(matches!(
            ApiError::from(not_found),
            ApiError::NotFound(msg) if msg == "resource not found"
        ));

        let validation = AppError::Validation("invalid input".to_string());
        assert!(matches!(
            ApiError::from(validation),
            ApiError::ValidationError(msg) if msg == "invalid input"
        ));

        let auth = AppError::Auth("unauthorized".to_string());
        assert!(matches!(
            ApiError::from(auth),
            ApiError::Unauthorized(msg) if msg == "unauthorized"
        ));

        let forbidden = AppError::Forbidden("cross-tenant".to_string());
        assert!(matches!(
            ApiError::from(forbidden),
            ApiError::Forbidden(msg) if msg == "cross-tenant"
        ));

        let timeout = AppError::Timeout("too slow".to_string());
        assert!(matches!(ApiError::from(timeout), ApiError::Timeout(_)));

        let io = AppError::Io(std::io::Error::other("io error"));
        assert!(matches!(ApiError::from(io), ApiError::InternalError(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::Unauthorized("not allowed".to_string()),
            StatusCode::UNAUTHORIZED,
        );
        assert_status_code(
            ApiError::Forbidden("cross-tenant".to_string()),
            StatusCode::FORBIDDEN,
        );
        assert_status_code(
            ApiError::Timeout("deadline".to_string()),
            StatusCode::GATEWAY_TIMEOUT,
        );
        assert_status_code(
            ApiError::Unavailable("pool exhausted".to_string()),
            StatusCode::SERVICE_UNAVAILABLE,
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let error = ApiError::from_rate_decision(RateDecision::Exceeded {
            window: Window::Minute,
            limit: 3,
            current: 3,
        });

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("60")
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
