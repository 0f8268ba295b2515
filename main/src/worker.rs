use std::sync::Arc;

use async_trait::async_trait;
use common::utils::config::AppConfig;
use event_bus::{
    bus::DEFAULT_SUBSCRIPTION_SUFFIX, DomainEvent, EventBus, EventHandler, EventType,
    SubscriptionConfig, TenantEventConsumer, Topic,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Downstream processing for domain events. Ingestion completions and
/// query executions are recorded here; this is also the hook point for
/// search-index refreshes, notifications and analytics.
pub struct DownstreamEventHandler;

#[async_trait]
impl EventHandler for DownstreamEventHandler {
    async fn handle(&self, event: DomainEvent) -> anyhow::Result<bool> {
        match event.event_type {
            EventType::DocumentIngested => {
                info!(
                    tenant_id = %event.tenant_id,
                    document_id = %event.data["document_id"].as_str().unwrap_or(""),
                    title = %event.data["document_title"].as_str().unwrap_or("Unknown"),
                    "document ingested"
                );
            }
            EventType::QueryExecuted => {
                info!(
                    tenant_id = %event.tenant_id,
                    query_id = %event.data["query_id"].as_str().unwrap_or(""),
                    response_time_ms = event.data["response_time_ms"].as_u64().unwrap_or(0),
                    "query executed"
                );
            }
            EventType::SystemError => {
                warn!(
                    tenant_id = %event.tenant_id,
                    data = %event.data,
                    "system error event"
                );
            }
            other => {
                info!(tenant_id = %event.tenant_id, event_type = %other, "event received");
            }
        }

        Ok(true)
    }
}

/// One consumer per (tenant, topic) from configuration; all of them stop
/// on the shared cancellation token.
pub fn spawn_event_consumers(
    config: &AppConfig,
    bus: &Arc<EventBus>,
    cancel: &CancellationToken,
) {
    let subscription_config = SubscriptionConfig {
        max_delivery_attempts: config.event_max_delivery_attempts,
        ..SubscriptionConfig::default()
    };

    for tenant_id in &config.event_worker_tenants {
        for topic in [
            Topic::DocumentEvents,
            Topic::QueryEvents,
            Topic::SystemEvents,
        ] {
            let subscription = bus.ensure_tenant_subscription(
                topic,
                tenant_id,
                DEFAULT_SUBSCRIPTION_SUFFIX,
                subscription_config.clone(),
            );
            let consumer =
                TenantEventConsumer::new(bus, subscription, config.event_max_in_flight);
            let handler: Arc<dyn EventHandler> = Arc::new(DownstreamEventHandler);
            let cancel = cancel.clone();

            tokio::spawn(async move {
                consumer.run(handler, cancel).await;
            });
        }
    }
}
