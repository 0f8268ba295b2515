use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Default retention for processed keys, long enough to ride out restarts
/// of upstream publishers.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Deterministic fingerprint over `(event type, tenant, event id)`:
/// the first 32 hex characters of a sha256 digest.
pub fn idempotency_key(event_type: &str, tenant_id: &str, event_id: &str) -> String {
    let digest = Sha256::digest(format!("{event_type}:{tenant_id}:{event_id}").as_bytes());

    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Store of processed idempotency keys. Shared across workers; a marked
/// key must never be processed again within the TTL. At-least-once
/// delivery with best-effort de-duplication is the contract, so the store
/// does not need strong consistency.
#[async_trait]
pub trait ProcessedKeyStore: Send + Sync {
    async fn is_processed(&self, key: &str) -> bool;
    async fn mark_processed(&self, key: &str);
}

/// Process-local key store with TTL expiry. Production deployments swap
/// in a shared store so horizontal scale-out and restarts do not replay.
pub struct InMemoryKeyStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryKeyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_TTL)
    }
}

#[async_trait]
impl ProcessedKeyStore for InMemoryKeyStore {
    async fn is_processed(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().expect("key store poisoned");
        match entries.get(key) {
            Some(marked_at) if marked_at.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    async fn mark_processed(&self, key: &str) {
        let mut entries = self.entries.lock().expect("key store poisoned");
        let now = Instant::now();

        // Opportunistic sweep keeps the map from accumulating dead keys.
        if entries.len() % 1024 == 0 {
            entries.retain(|_, marked_at| now.duration_since(*marked_at) < self.ttl);
        }

        entries.insert(key.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_hex_32() {
        let a = idempotency_key("document.ingested", "demo", "evt_1");
        let b = idempotency_key("document.ingested", "demo", "evt_1");

        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_varies_with_every_component() {
        let base = idempotency_key("document.ingested", "demo", "evt_1");

        assert_ne!(base, idempotency_key("document.updated", "demo", "evt_1"));
        assert_ne!(base, idempotency_key("document.ingested", "other", "evt_1"));
        assert_ne!(base, idempotency_key("document.ingested", "demo", "evt_2"));
    }

    #[test]
    fn key_matches_sha256_prefix() {
        let expected_digest = Sha256::digest(b"document.ingested:demo:evt_1");
        let expected: String = expected_digest
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
            .chars()
            .take(32)
            .collect();

        assert_eq!(idempotency_key("document.ingested", "demo", "evt_1"), expected);
    }

    #[tokio::test]
    async fn marked_keys_read_as_processed() {
        let store = InMemoryKeyStore::default();

        assert!(!store.is_processed("k1").await);
        store.mark_processed("k1").await;
        assert!(store.is_processed("k1").await);
        assert!(!store.is_processed("k2").await);
    }

    #[tokio::test]
    async fn keys_expire_after_the_ttl() {
        let store = InMemoryKeyStore::new(Duration::from_millis(0));

        store.mark_processed("k1").await;
        assert!(!store.is_processed("k1").await);
    }
}
