use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Identity attached to every request-scoped operation. Produced by the
/// auth verifier and treated as read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub uid: String,
    pub tenant_id: String,
    pub role: String,
    pub claims: Value,
}

impl UserContext {
    pub fn new(uid: impl Into<String>, tenant_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            tenant_id: tenant_id.into(),
            role: role.into(),
            claims: Value::Object(serde_json::Map::new()),
        }
    }

    /// The development identity injected when auth is bypassed.
    pub fn dev() -> Self {
        Self::new("dev", "demo", "owner")
    }
}

/// Interface to the external token verifier. The service only ships the
/// development bypass; deployments wire a real implementation.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, bearer_token: Option<&str>) -> Result<UserContext, AppError>;
}

/// Accepts every request and hands back the dev identity.
pub struct BypassAuth;

#[async_trait]
impl AuthVerifier for BypassAuth {
    async fn verify(&self, _bearer_token: Option<&str>) -> Result<UserContext, AppError> {
        Ok(UserContext::dev())
    }
}

/// Rejects everything. Used when no verifier has been configured and auth
/// is not bypassed, so misconfiguration fails closed.
pub struct DenyAllAuth;

#[async_trait]
impl AuthVerifier for DenyAllAuth {
    async fn verify(&self, _bearer_token: Option<&str>) -> Result<UserContext, AppError> {
        Err(AppError::Auth("no auth verifier configured".to_string()))
    }
}
