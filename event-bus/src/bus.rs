use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{DomainEvent, Topic};
use crate::idempotency::{InMemoryKeyStore, ProcessedKeyStore};

pub const DEFAULT_SUBSCRIPTION_SUFFIX: &str = "worker";

/// Errors that can occur when publishing events
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialise event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-subscription delivery policy, mirroring the broker settings a
/// managed queue would carry.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// How long a delivered message may stay unacked before redelivery.
    pub ack_deadline: Duration,
    /// Messages older than this are dropped instead of redelivered.
    pub message_retention: Duration,
    /// First nack-retry delay; doubles per attempt.
    pub min_backoff: Duration,
    /// Ceiling for the retry delay.
    pub max_backoff: Duration,
    /// Delivery attempts before the message moves to the DLQ.
    pub max_delivery_attempts: u32,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            ack_deadline: Duration::from_secs(600),
            message_retention: Duration::from_secs(7 * 24 * 3600),
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(600),
            max_delivery_attempts: 5,
        }
    }
}

/// A serialised event in flight: JSON body plus wire attributes.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub delivery_attempt: u32,
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    pub fn event(&self) -> Result<DomainEvent, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// A message handed to a consumer. It stays outstanding until the
/// consumer acks or nacks it through the subscription; left alone, the
/// ack deadline expires and the broker redelivers.
#[derive(Debug)]
pub struct DeliveredMessage {
    pub delivery_id: u64,
    pub envelope: Envelope,
}

struct OutstandingDelivery {
    envelope: Envelope,
    deadline: Instant,
}

/// A named, tenant-filtered subscription on one topic.
pub struct Subscription {
    name: String,
    topic: Topic,
    tenant_id: String,
    dlq_topic: String,
    config: SubscriptionConfig,
    queue_tx: mpsc::UnboundedSender<Envelope>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    outstanding: Mutex<HashMap<u64, OutstandingDelivery>>,
    next_delivery_id: AtomicU64,
    dlq: Arc<Mutex<HashMap<String, Vec<Envelope>>>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn dlq_topic(&self) -> &str {
        &self.dlq_topic
    }

    pub(crate) fn enqueue(&self, envelope: Envelope) {
        let _ = self.queue_tx.send(envelope);
    }

    /// Waits for the next message. Returns `None` once cancelled; an
    /// in-flight message at that point is neither acked nor nacked and
    /// will be redelivered after its ack deadline.
    pub async fn receive(&self, cancel: &CancellationToken) -> Option<DeliveredMessage> {
        let envelope = {
            let mut queue_rx = self.queue_rx.lock().await;
            tokio::select! {
                () = cancel.cancelled() => return None,
                maybe = queue_rx.recv() => maybe?,
            }
        };

        let delivery_id = self.next_delivery_id.fetch_add(1, Ordering::Relaxed);
        self.outstanding
            .lock()
            .expect("outstanding map poisoned")
            .insert(
                delivery_id,
                OutstandingDelivery {
                    envelope: envelope.clone(),
                    deadline: Instant::now() + self.config.ack_deadline,
                },
            );

        Some(DeliveredMessage {
            delivery_id,
            envelope,
        })
    }

    /// Acknowledges a delivery; the message is done.
    pub fn ack(&self, delivery_id: u64) {
        self.outstanding
            .lock()
            .expect("outstanding map poisoned")
            .remove(&delivery_id);
    }

    /// Negative acknowledgement: schedules a retry under the backoff
    /// policy, or dead-letters the message once attempts are exhausted.
    pub fn nack(&self, delivery_id: u64) {
        let outstanding = self
            .outstanding
            .lock()
            .expect("outstanding map poisoned")
            .remove(&delivery_id);

        if let Some(delivery) = outstanding {
            self.fail_delivery(delivery.envelope, true);
        }
    }

    /// Requeues every outstanding delivery whose ack deadline has passed.
    pub(crate) fn redeliver_expired(&self) {
        let now = Instant::now();
        let expired: Vec<Envelope> = {
            let mut outstanding = self.outstanding.lock().expect("outstanding map poisoned");
            let ids: Vec<u64> = outstanding
                .iter()
                .filter(|(_, delivery)| delivery.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| outstanding.remove(&id))
                .map(|delivery| delivery.envelope)
                .collect()
        };

        for envelope in expired {
            debug!(
                subscription = %self.name,
                message_id = %envelope.message_id,
                "ack deadline expired, redelivering"
            );
            // The deadline itself served as the delay.
            self.fail_delivery(envelope, false);
        }
    }

    fn fail_delivery(&self, envelope: Envelope, with_backoff: bool) {
        let attempts = envelope.delivery_attempt;

        if attempts >= self.config.max_delivery_attempts {
            self.dead_letter(envelope);
            return;
        }

        let age = Utc::now()
            .signed_duration_since(envelope.published_at)
            .to_std()
            .unwrap_or_default();
        if age > self.config.message_retention {
            warn!(
                subscription = %self.name,
                message_id = %envelope.message_id,
                "message exceeded retention, dropping"
            );
            return;
        }

        let mut next = envelope;
        next.delivery_attempt += 1;

        if with_backoff {
            let delay = backoff_delay(&self.config, attempts);
            let queue_tx = self.queue_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = queue_tx.send(next);
            });
        } else {
            let _ = self.queue_tx.send(next);
        }
    }

    fn dead_letter(&self, envelope: Envelope) {
        warn!(
            subscription = %self.name,
            message_id = %envelope.message_id,
            attempts = envelope.delivery_attempt,
            dlq = %self.dlq_topic,
            "delivery attempts exhausted, dead-lettering"
        );
        self.dlq
            .lock()
            .expect("dlq map poisoned")
            .entry(self.dlq_topic.clone())
            .or_default()
            .push(envelope);
    }

    #[cfg(test)]
    pub(crate) fn outstanding_count(&self) -> usize {
        self.outstanding
            .lock()
            .expect("outstanding map poisoned")
            .len()
    }
}

/// Exponential backoff for the given (1-based) failed attempt.
fn backoff_delay(config: &SubscriptionConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = config.min_backoff.saturating_mul(2u32.saturating_pow(exponent));
    delay.min(config.max_backoff)
}

/// Tenant-scoped publish/subscribe bus with the fixed topic set.
/// Publishing de-duplicates on the idempotency key, routes by event
/// family and fans out to the tenant's subscriptions.
pub struct EventBus {
    key_store: Arc<dyn ProcessedKeyStore>,
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
    dlq: Arc<Mutex<HashMap<String, Vec<Envelope>>>>,
    next_message_id: AtomicU64,
    shutdown: CancellationToken,
}

impl EventBus {
    pub fn new(key_store: Arc<dyn ProcessedKeyStore>) -> Self {
        Self {
            key_store,
            subscriptions: RwLock::new(HashMap::new()),
            dlq: Arc::new(Mutex::new(HashMap::new())),
            next_message_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKeyStore::default()))
    }

    pub fn key_store(&self) -> Arc<dyn ProcessedKeyStore> {
        Arc::clone(&self.key_store)
    }

    /// Creates (or returns) the `<topic>-<tenant>-<suffix>` subscription
    /// with its tenant filter and DLQ, and starts its redelivery sweeper.
    pub fn ensure_tenant_subscription(
        &self,
        topic: Topic,
        tenant_id: &str,
        suffix: &str,
        config: SubscriptionConfig,
    ) -> Arc<Subscription> {
        let name = format!("{}-{tenant_id}-{suffix}", topic.name());

        if let Some(existing) = self
            .subscriptions
            .read()
            .expect("subscription map poisoned")
            .get(&name)
        {
            return Arc::clone(existing);
        }

        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("subscription map poisoned");
        if let Some(existing) = subscriptions.get(&name) {
            return Arc::clone(existing);
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let subscription = Arc::new(Subscription {
            name: name.clone(),
            topic,
            tenant_id: tenant_id.to_string(),
            dlq_topic: format!("{}-{tenant_id}-dlq", topic.name()),
            config: config.clone(),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            outstanding: Mutex::new(HashMap::new()),
            next_delivery_id: AtomicU64::new(1),
            dlq: Arc::clone(&self.dlq),
        });
        subscriptions.insert(name.clone(), Arc::clone(&subscription));

        // Redelivery sweeper for expired ack deadlines.
        let sweep_interval = (config.ack_deadline / 4)
            .clamp(Duration::from_millis(50), Duration::from_secs(1));
        let sweeper = Arc::clone(&subscription);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => sweeper.redeliver_expired(),
                }
            }
        });

        info!(subscription = %name, tenant_id, "created tenant subscription");
        subscription
    }

    /// Publishes a domain event: duplicate publishes are suppressed via
    /// the idempotency key, the event routes to its family topic, and
    /// matching tenant subscriptions receive the serialised envelope.
    pub async fn publish(&self, event: &DomainEvent) -> Result<Option<String>, PublishError> {
        let publish_key = format!("pub:{}", event.idempotency_key());
        if self.key_store.is_processed(&publish_key).await {
            info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "event already published, suppressing duplicate"
            );
            return Ok(None);
        }

        let topic = event.event_type.topic();
        let envelope = Envelope {
            message_id: format!("m{}", self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1),
            body: serde_json::to_string(event)?,
            attributes: event.attributes(),
            delivery_attempt: 1,
            published_at: Utc::now(),
        };

        let mut matched = 0;
        {
            let subscriptions = self
                .subscriptions
                .read()
                .expect("subscription map poisoned");
            for subscription in subscriptions.values() {
                if subscription.topic == topic && subscription.tenant_id == event.tenant_id {
                    subscription.enqueue(envelope.clone());
                    matched += 1;
                }
            }
        }

        self.key_store.mark_processed(&publish_key).await;

        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            topic = %topic,
            tenant_id = %event.tenant_id,
            subscriptions = matched,
            "published event"
        );

        Ok(Some(envelope.message_id))
    }

    /// Contents of a dead-letter queue, oldest first.
    pub fn dlq_messages(&self, dlq_topic: &str) -> Vec<Envelope> {
        self.dlq
            .lock()
            .expect("dlq map poisoned")
            .get(dlq_topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Operational snapshot for the health surface.
    pub fn stats(&self) -> BusStats {
        let subscriptions = self
            .subscriptions
            .read()
            .expect("subscription map poisoned")
            .len();
        let dead_lettered = self
            .dlq
            .lock()
            .expect("dlq map poisoned")
            .values()
            .map(Vec::len)
            .sum();

        BusStats {
            subscriptions,
            dead_lettered,
        }
    }
}

/// Point-in-time bus gauges.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BusStats {
    pub subscriptions: usize,
    pub dead_lettered: usize,
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast_config() -> SubscriptionConfig {
        SubscriptionConfig {
            ack_deadline: Duration::from_millis(200),
            message_retention: Duration::from_secs(3600),
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            max_delivery_attempts: 3,
        }
    }

    fn event(tenant: &str) -> DomainEvent {
        DomainEvent::document_ingested(tenant, "src_1", "Doc1", "document", Some("dev"))
    }

    #[tokio::test]
    async fn publish_fans_out_to_matching_tenant_subscriptions_only() {
        let bus = EventBus::in_memory();
        let sub_a = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "tenant_a",
            "worker",
            fast_config(),
        );
        let sub_b = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "tenant_b",
            "worker",
            fast_config(),
        );
        let sub_queries = bus.ensure_tenant_subscription(
            Topic::QueryEvents,
            "tenant_a",
            "worker",
            fast_config(),
        );

        let message_id = bus.publish(&event("tenant_a")).await.unwrap();
        assert!(message_id.is_some());

        let cancel = CancellationToken::new();
        let delivered = sub_a.receive(&cancel).await.expect("delivery");
        assert_eq!(delivered.envelope.attributes["tenant_id"], "tenant_a");
        assert_eq!(
            delivered.envelope.attributes["event_type"],
            "document.ingested"
        );
        sub_a.ack(delivered.delivery_id);

        // Neither the foreign tenant nor the other topic saw anything.
        let deadline = tokio::time::timeout(Duration::from_millis(50), sub_b.receive(&cancel));
        assert!(deadline.await.is_err());
        let deadline =
            tokio::time::timeout(Duration::from_millis(50), sub_queries.receive(&cancel));
        assert!(deadline.await.is_err());
    }

    #[tokio::test]
    async fn subscription_names_follow_the_contract() {
        let bus = EventBus::in_memory();
        let sub = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "acme",
            "worker",
            fast_config(),
        );

        assert_eq!(sub.name(), "document-events-acme-worker");
        assert_eq!(sub.dlq_topic(), "document-events-acme-dlq");
    }

    #[tokio::test]
    async fn ensure_subscription_is_idempotent() {
        let bus = EventBus::in_memory();
        let first = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "acme",
            "worker",
            fast_config(),
        );
        let second = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "acme",
            "worker",
            fast_config(),
        );

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn duplicate_publish_is_suppressed() {
        let bus = EventBus::in_memory();
        let sub = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );

        let event = event("demo");
        let first = bus.publish(&event).await.unwrap();
        let second = bus.publish(&event).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none(), "duplicate must be suppressed");

        let cancel = CancellationToken::new();
        let delivered = sub.receive(&cancel).await.expect("delivery");
        sub.ack(delivered.delivery_id);

        let more = tokio::time::timeout(Duration::from_millis(50), sub.receive(&cancel));
        assert!(more.await.is_err(), "only one copy may be delivered");
    }

    #[tokio::test]
    async fn unacked_delivery_is_redelivered_after_the_ack_deadline() {
        let bus = EventBus::in_memory();
        let sub = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );

        bus.publish(&event("demo")).await.unwrap();

        let cancel = CancellationToken::new();
        let first = sub.receive(&cancel).await.expect("first delivery");
        assert_eq!(first.envelope.delivery_attempt, 1);
        // Dropped without ack or nack.
        drop(first);

        let second = tokio::time::timeout(Duration::from_secs(2), sub.receive(&cancel))
            .await
            .expect("redelivery within deadline")
            .expect("redelivered message");
        assert_eq!(second.envelope.delivery_attempt, 2);
        sub.ack(second.delivery_id);
        assert_eq!(sub.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn nack_triggers_backoff_redelivery() {
        let bus = EventBus::in_memory();
        let sub = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );

        bus.publish(&event("demo")).await.unwrap();

        let cancel = CancellationToken::new();
        let first = sub.receive(&cancel).await.expect("first delivery");
        sub.nack(first.delivery_id);

        let second = tokio::time::timeout(Duration::from_secs(1), sub.receive(&cancel))
            .await
            .expect("retry within backoff")
            .expect("redelivered message");
        assert_eq!(second.envelope.delivery_attempt, 2);
        sub.ack(second.delivery_id);
    }

    #[tokio::test]
    async fn exhausted_deliveries_move_to_the_dlq() {
        let bus = EventBus::in_memory();
        let sub = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );

        bus.publish(&event("demo")).await.unwrap();

        let cancel = CancellationToken::new();
        for attempt in 1..=3 {
            let delivered = tokio::time::timeout(Duration::from_secs(1), sub.receive(&cancel))
                .await
                .expect("delivery")
                .expect("message");
            assert_eq!(delivered.envelope.delivery_attempt, attempt);
            sub.nack(delivered.delivery_id);
        }

        // Third nack exhausted max_delivery_attempts.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let dead = bus.dlq_messages(sub.dlq_topic());
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].delivery_attempt, 3);

        let more = tokio::time::timeout(Duration::from_millis(100), sub.receive(&cancel));
        assert!(more.await.is_err(), "dead-lettered message must not requeue");
    }

    #[tokio::test]
    async fn messages_past_retention_are_dropped_not_retried() {
        let bus = EventBus::in_memory();
        let config = SubscriptionConfig {
            message_retention: Duration::from_secs(0),
            ..fast_config()
        };
        let sub =
            bus.ensure_tenant_subscription(Topic::DocumentEvents, "demo", "worker", config);

        bus.publish(&event("demo")).await.unwrap();

        let cancel = CancellationToken::new();
        let first = sub.receive(&cancel).await.expect("delivery");
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.nack(first.delivery_id);

        let more = tokio::time::timeout(Duration::from_millis(100), sub.receive(&cancel));
        assert!(more.await.is_err(), "expired message must not requeue");
        assert!(bus.dlq_messages(sub.dlq_topic()).is_empty());
    }

    #[tokio::test]
    async fn receive_returns_none_on_cancellation() {
        let bus = EventBus::in_memory();
        let sub = bus.ensure_tenant_subscription(
            Topic::DocumentEvents,
            "demo",
            "worker",
            fast_config(),
        );

        let cancel = CancellationToken::new();
        let receive = sub.receive(&cancel);
        cancel.cancel();
        assert!(receive.await.is_none());
    }

    #[tokio::test]
    async fn envelope_round_trips_the_event() {
        let bus = EventBus::in_memory();
        let sub = bus.ensure_tenant_subscription(
            Topic::QueryEvents,
            "demo",
            "worker",
            fast_config(),
        );

        let published =
            DomainEvent::query_executed("demo", "q_1", "What is Living Twin?", "dev", 17);
        bus.publish(&published).await.unwrap();

        let cancel = CancellationToken::new();
        let delivered = sub.receive(&cancel).await.expect("delivery");
        let event = delivered.envelope.event().expect("parse body");

        assert_eq!(event, published);
        assert_eq!(event.data, json!({
            "query_id": "q_1",
            "query_text": "What is Living Twin?",
            "response_time_ms": 17,
        }));
        sub.ack(delivered.delivery_id);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SubscriptionConfig {
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(600),
            ..SubscriptionConfig::default()
        };

        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(20));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(40));
        assert_eq!(backoff_delay(&config, 7), Duration::from_secs(600));
        assert_eq!(backoff_delay(&config, 30), Duration::from_secs(600));
    }
}
