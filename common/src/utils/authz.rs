use serde::{Deserialize, Serialize};

use super::config::AppConfig;

/// The only role allowed to cross tenant boundaries.
pub const OWNER_ROLE: &str = "owner";

/// Same-tenant access, with the owner-role escape hatch.
pub fn can_access_tenant(role: &str, user_tenant: &str, target_tenant: &str) -> bool {
    user_tenant == target_tenant || role == OWNER_ROLE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantLimits {
    pub max_documents: u64,
    pub max_queries_per_hour: u64,
    pub max_chunk_size: usize,
}

impl Default for TenantLimits {
    fn default() -> Self {
        Self {
            max_documents: 10_000,
            max_queries_per_hour: 1_000,
            max_chunk_size: 2_000,
        }
    }
}

/// Limits for a tenant: the configured override when present, defaults
/// otherwise.
pub fn tenant_limits(config: &AppConfig, tenant_id: &str) -> TenantLimits {
    config
        .tenant_limit_overrides
        .get(tenant_id)
        .cloned()
        .unwrap_or_default()
}
