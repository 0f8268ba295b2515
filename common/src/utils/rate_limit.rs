use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::config::AppConfig;

/// A fixed-duration counting window. Counters reset at the window
/// boundary, measured from the first increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    pub fn duration(self) -> Duration {
        match self {
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(3600),
            Self::Day => Duration::from_secs(86_400),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

/// Outcome of a limit check. A denial reports the first exceeded window
/// and leaves every counter untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RateDecision {
    Allowed,
    Exceeded {
        window: Window,
        limit: u32,
        current: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Seconds a denied caller should wait before retrying.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Exceeded { window, .. } => Some(window.duration().as_secs()),
        }
    }
}

/// Counter storage behind the limiter. The check and the increments of
/// one call happen atomically; two racing callers can never both pass a
/// limit with one slot left.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn check_and_increment(
        &self,
        scope: &str,
        quotas: &[(Window, u32)],
    ) -> Result<RateDecision, AppError>;
}

struct Counter {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store. One mutex is the critical section, which
/// makes check-and-increment atomic across all windows of a scope.
#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<(String, Window), Counter>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn check_and_increment(
        &self,
        scope: &str,
        quotas: &[(Window, u32)],
    ) -> Result<RateDecision, AppError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| AppError::InternalError("rate limit store poisoned".to_string()))?;
        let now = Instant::now();

        for (window, limit) in quotas {
            if let Some(counter) = counters.get(&(scope.to_string(), *window)) {
                if counter.expires_at > now && counter.count >= u64::from(*limit) {
                    return Ok(RateDecision::Exceeded {
                        window: *window,
                        limit: *limit,
                        current: counter.count,
                    });
                }
            }
        }

        for (window, _) in quotas {
            let key = (scope.to_string(), *window);
            match counters.get_mut(&key) {
                Some(counter) if counter.expires_at > now => {
                    counter.count += 1;
                }
                _ => {
                    counters.insert(
                        key,
                        Counter {
                            count: 1,
                            expires_at: now + window.duration(),
                        },
                    );
                }
            }
        }

        Ok(RateDecision::Allowed)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl InMemoryCounterStore {
    /// Shifts every counter's expiry into the past, standing in for the
    /// passage of wall-clock time in tests.
    pub fn advance(&self, elapsed: Duration) {
        let mut counters = self.counters.lock().expect("rate limit store poisoned");
        for counter in counters.values_mut() {
            counter.expires_at = counter
                .expires_at
                .checked_sub(elapsed)
                .unwrap_or_else(Instant::now);
        }
    }
}

/// Per-tenant request quotas across the three windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRateLimits {
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
}

impl Default for TenantRateLimits {
    fn default() -> Self {
        Self {
            minute: 100,
            hour: 1000,
            day: 10_000,
        }
    }
}

impl TenantRateLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            minute: config.rate_limit_per_minute,
            hour: config.rate_limit_per_hour,
            day: config.rate_limit_per_day,
        }
    }

    fn quotas(self) -> [(Window, u32); 3] {
        [
            (Window::Minute, self.minute),
            (Window::Hour, self.hour),
            (Window::Day, self.day),
        ]
    }
}

/// Multi-window limiter guarding the API edge and cost-sensitive
/// downstream calls.
#[derive(Clone)]
pub struct TenantRateLimiter {
    store: Arc<dyn CounterStore>,
}

impl TenantRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()))
    }

    pub async fn check_tenant_limit(
        &self,
        tenant_id: &str,
        limits: &TenantRateLimits,
    ) -> Result<RateDecision, AppError> {
        self.store
            .check_and_increment(&format!("tenant:{tenant_id}"), &limits.quotas())
            .await
    }

    /// Burst protection per caller identity (`user:{uid}` or `ip:{addr}`),
    /// using a single minute window.
    pub async fn check_edge_limit(
        &self,
        identifier: &str,
        per_minute: u32,
    ) -> Result<RateDecision, AppError> {
        self.store
            .check_and_increment(
                &format!("edge:{identifier}"),
                &[(Window::Minute, per_minute)],
            )
            .await
    }
}
