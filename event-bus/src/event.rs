use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::idempotency::idempotency_key;

/// Every event type in the system, serialised as its dotted name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "document.ingested")]
    DocumentIngested,
    #[serde(rename = "document.updated")]
    DocumentUpdated,
    #[serde(rename = "document.deleted")]
    DocumentDeleted,
    #[serde(rename = "query.executed")]
    QueryExecuted,
    #[serde(rename = "query.failed")]
    QueryFailed,
    #[serde(rename = "user.registered")]
    UserRegistered,
    #[serde(rename = "user.login")]
    UserLogin,
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "system.health_check")]
    SystemHealthCheck,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentIngested => "document.ingested",
            Self::DocumentUpdated => "document.updated",
            Self::DocumentDeleted => "document.deleted",
            Self::QueryExecuted => "query.executed",
            Self::QueryFailed => "query.failed",
            Self::UserRegistered => "user.registered",
            Self::UserLogin => "user.login",
            Self::SystemError => "system.error",
            Self::SystemHealthCheck => "system.health_check",
        }
    }

    /// The topic an event family routes to.
    pub fn topic(self) -> Topic {
        match self.as_str().split('.').next() {
            Some("document") => Topic::DocumentEvents,
            Some("query") => Topic::QueryEvents,
            Some("user") => Topic::UserEvents,
            Some("system") => Topic::SystemEvents,
            _ => Topic::Events,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed topic set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Events,
    DocumentEvents,
    QueryEvents,
    UserEvents,
    SystemEvents,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Events,
        Topic::DocumentEvents,
        Topic::QueryEvents,
        Topic::UserEvents,
        Topic::SystemEvents,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::DocumentEvents => "document-events",
            Self::QueryEvents => "query-events",
            Self::UserEvents => "user-events",
            Self::SystemEvents => "system-events",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A domain event as it crosses the bus. The body serialises to JSON with
/// an ISO-8601 timestamp and the dotted event type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub correlation_id: String,
    #[serde(default)]
    pub retry_count: u32,
}

impl DomainEvent {
    pub fn new(event_type: EventType, tenant_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            tenant_id: tenant_id.into(),
            user_id: None,
            timestamp: Utc::now(),
            data,
            correlation_id: Uuid::new_v4().to_string(),
            retry_count: 0,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Deterministic fingerprint over (event type, tenant, event id).
    pub fn idempotency_key(&self) -> String {
        idempotency_key(self.event_type.as_str(), &self.tenant_id, &self.event_id)
    }

    /// The wire-visible message attributes used for tenant filtering and
    /// de-duplication.
    pub fn attributes(&self) -> HashMap<String, String> {
        let mut attributes = HashMap::from([
            ("tenant_id".to_string(), self.tenant_id.clone()),
            ("event_type".to_string(), self.event_type.to_string()),
            ("idempotency_key".to_string(), self.idempotency_key()),
            ("correlation_id".to_string(), self.correlation_id.clone()),
            ("retry_count".to_string(), self.retry_count.to_string()),
        ]);
        if let Some(user_id) = &self.user_id {
            attributes.insert("user_id".to_string(), user_id.clone());
        }
        attributes
    }

    pub fn document_ingested(
        tenant_id: &str,
        document_id: &str,
        document_title: &str,
        document_type: &str,
        user_id: Option<&str>,
    ) -> Self {
        let event = Self::new(
            EventType::DocumentIngested,
            tenant_id,
            json!({
                "document_id": document_id,
                "document_title": document_title,
                "document_type": document_type,
            }),
        );
        match user_id {
            Some(uid) => event.with_user(uid),
            None => event,
        }
    }

    pub fn query_executed(
        tenant_id: &str,
        query_id: &str,
        query_text: &str,
        user_id: &str,
        response_time_ms: u64,
    ) -> Self {
        Self::new(
            EventType::QueryExecuted,
            tenant_id,
            json!({
                "query_id": query_id,
                "query_text": query_text,
                "response_time_ms": response_time_ms,
            }),
        )
        .with_user(user_id)
    }
}
