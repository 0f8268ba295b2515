#![allow(clippy::missing_docs_in_private_items)]

pub mod bus;
pub mod consumer;
pub mod event;
pub mod idempotency;

pub use bus::{Envelope, EventBus, PublishError, Subscription, SubscriptionConfig};
pub use consumer::{EventHandler, TenantEventConsumer};
pub use event::{DomainEvent, EventType, Topic};
pub use idempotency::{idempotency_key, InMemoryKeyStore, ProcessedKeyStore};
