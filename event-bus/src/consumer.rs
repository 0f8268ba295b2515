use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{DeliveredMessage, EventBus, Subscription};
use crate::event::DomainEvent;
use crate::idempotency::ProcessedKeyStore;

/// Handles one event. `Ok(true)` acks the message; `Ok(false)` or an
/// error nacks it, which triggers redelivery under the retry policy.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: DomainEvent) -> anyhow::Result<bool>;
}

/// Consumer loop for one tenant subscription. Delivery processing runs
/// concurrently up to a flow-control bound; cancellation stops the loop
/// without acking or nacking whatever is still in flight.
pub struct TenantEventConsumer {
    subscription: Arc<Subscription>,
    key_store: Arc<dyn ProcessedKeyStore>,
    max_in_flight: usize,
}

impl TenantEventConsumer {
    pub fn new(bus: &EventBus, subscription: Arc<Subscription>, max_in_flight: usize) -> Self {
        Self {
            subscription,
            key_store: bus.key_store(),
            max_in_flight,
        }
    }

    pub async fn run(&self, handler: Arc<dyn EventHandler>, cancel: CancellationToken) {
        info!(
            subscription = %self.subscription.name(),
            max_in_flight = self.max_in_flight,
            "consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        loop {
            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(delivered) = self.subscription.receive(&cancel).await else {
                break;
            };

            let subscription = Arc::clone(&self.subscription);
            let key_store = Arc::clone(&self.key_store);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let _permit = permit;
                process_delivery(&subscription, key_store.as_ref(), handler.as_ref(), delivered)
                    .await;
            });
        }

        info!(subscription = %self.subscription.name(), "consumer stopped");
    }
}

async fn process_delivery(
    subscription: &Subscription,
    key_store: &dyn ProcessedKeyStore,
    handler: &dyn EventHandler,
    delivered: DeliveredMessage,
) {
    let DeliveredMessage {
        delivery_id,
        envelope,
    } = delivered;

    let event = match envelope.event() {
        Ok(event) => event,
        Err(err) => {
            error!(
                subscription = %subscription.name(),
                message_id = %envelope.message_id,
                error = %err,
                "failed to parse event body"
            );
            subscription.nack(delivery_id);
            return;
        }
    };

    // Defence in depth: the subscription filter should already have kept
    // foreign tenants out. Ack so the message is not retried.
    let attribute_tenant = envelope.attributes.get("tenant_id").map(String::as_str);
    if attribute_tenant != Some(subscription.tenant_id()) {
        warn!(
            subscription = %subscription.name(),
            expected = %subscription.tenant_id(),
            got = ?attribute_tenant,
            "tenant mismatch, dropping message"
        );
        subscription.ack(delivery_id);
        return;
    }

    // Per-subscription idempotency: a key processed here once is done.
    let scoped_key = envelope
        .attributes
        .get("idempotency_key")
        .map(|key| format!("{}:{key}", subscription.name()));
    if let Some(key) = &scoped_key {
        if key_store.is_processed(key).await {
            info!(
                subscription = %subscription.name(),
                message_id = %envelope.message_id,
                "message already processed, dropping"
            );
            subscription.ack(delivery_id);
            return;
        }
    }

    match handler.handle(event).await {
        Ok(true) => {
            if let Some(key) = &scoped_key {
                key_store.mark_processed(key).await;
            }
            subscription.ack(delivery_id);
        }
        Ok(false) => {
            warn!(
                subscription = %subscription.name(),
                message_id = %envelope.message_id,
                "handler declined event, nacking for retry"
            );
            subscription.nack(delivery_id);
        }
        Err(err) => {
            error!(
                subscription = %subscription.name(),
                message_id = %envelope.message_id,
                error = %err,
                "handler failed, nacking for retry"
            );
            subscription.nack(delivery_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Envelope, SubscriptionConfig};
    use crate::event::Topic;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingHandler {
        calls: AtomicUsize,
        /// Number of leading calls answered with `Ok(false)`.
        decline_first: usize,
    }

    impl CountingHandler {
        fn new(decline_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                decline_first,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: DomainEvent) -> anyhow::Result<bool> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(call >= self.decline_first)
        }
    }

    fn fast_config() -> SubscriptionConfig {
        SubscriptionConfig {
            ack_deadline: Duration::from_millis(500),
            message_retention: Duration::from_secs(3600),
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            max_delivery_attempts: 3,
        }
    }

    fn envelope_for(event: &DomainEvent) -> Envelope {
        Envelope {
            message_id: "m-test".to_string(),
            body: serde_json::to_string(event).expect("serialise event"),
            attributes: event.attributes(),
            delivery_attempt: 1,
            published_at: Utc::now(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn published_event_reaches_the_handler_once() {
        let bus = EventBus::in_memory();
        let subscription = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );
        let consumer = TenantEventConsumer::new(&bus, Arc::clone(&subscription), 10);
        let handler = CountingHandler::new(0);

        let cancel = CancellationToken::new();
        let run = {
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(handler, cancel).await })
        };

        let event = DomainEvent::document_ingested("demo", "src_1", "Doc1", "document", None);
        bus.publish(&event).await.unwrap();
        // Publishing the identical event again is suppressed at the bus.
        bus.publish(&event).await.unwrap();

        settle().await;
        assert_eq!(handler.calls(), 1);
        assert_eq!(subscription.outstanding_count(), 0);

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn redelivered_duplicates_are_dropped_after_success() {
        let bus = EventBus::in_memory();
        let subscription = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );
        // In-flight bound of one serialises processing, so the duplicate
        // is only looked at after the first copy was marked processed.
        let consumer = TenantEventConsumer::new(&bus, Arc::clone(&subscription), 1);
        let handler = CountingHandler::new(0);

        // At-least-once delivery: the same envelope arrives twice.
        let event = DomainEvent::document_ingested("demo", "src_1", "Doc1", "document", None);
        subscription.enqueue(envelope_for(&event));
        subscription.enqueue(envelope_for(&event));

        let cancel = CancellationToken::new();
        let run = {
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(handler, cancel).await })
        };

        settle().await;
        assert_eq!(handler.calls(), 1, "second copy must be idempotency-dropped");
        assert_eq!(subscription.outstanding_count(), 0, "both copies must be acked");

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn tenant_mismatch_is_acked_and_dropped() {
        let bus = EventBus::in_memory();
        let subscription = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "tenant_a",
            "worker",
            fast_config(),
        );
        let consumer = TenantEventConsumer::new(&bus, Arc::clone(&subscription), 10);
        let handler = CountingHandler::new(0);

        // A foreign-tenant envelope that somehow slipped past the filter.
        let foreign = DomainEvent::document_ingested("tenant_b", "src_1", "Doc1", "document", None);
        subscription.enqueue(envelope_for(&foreign));

        let cancel = CancellationToken::new();
        let run = {
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(handler, cancel).await })
        };

        settle().await;
        assert_eq!(handler.calls(), 0, "foreign tenant must never reach the handler");
        assert_eq!(subscription.outstanding_count(), 0, "message must be acked away");

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn declined_events_are_retried_until_handled() {
        let bus = EventBus::in_memory();
        let subscription = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );
        let consumer = TenantEventConsumer::new(&bus, Arc::clone(&subscription), 10);
        let handler = CountingHandler::new(1);

        let cancel = CancellationToken::new();
        let run = {
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(handler, cancel).await })
        };

        let event = DomainEvent::document_ingested("demo", "src_1", "Doc1", "document", None);
        bus.publish(&event).await.unwrap();

        settle().await;
        assert_eq!(handler.calls(), 2, "first decline, then successful retry");
        assert!(bus.dlq_messages(subscription.dlq_topic()).is_empty());

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn always_failing_events_end_in_the_dlq() {
        let bus = EventBus::in_memory();
        let subscription = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );
        let consumer = TenantEventConsumer::new(&bus, Arc::clone(&subscription), 10);
        let handler = CountingHandler::new(usize::MAX);

        let cancel = CancellationToken::new();
        let run = {
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(handler, cancel).await })
        };

        let event = DomainEvent::document_ingested("demo", "src_1", "Doc1", "document", None);
        bus.publish(&event).await.unwrap();

        settle().await;
        assert_eq!(handler.calls(), 3, "one call per delivery attempt");
        assert_eq!(bus.dlq_messages(subscription.dlq_topic()).len(), 1);

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_promptly() {
        let bus = EventBus::in_memory();
        let subscription = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );
        let consumer = TenantEventConsumer::new(&bus, Arc::clone(&subscription), 10);
        let handler = CountingHandler::new(0);

        let cancel = CancellationToken::new();
        let run = {
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(handler, cancel).await })
        };

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("consumer must stop after cancellation")
            .unwrap();
    }
}
