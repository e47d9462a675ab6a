//! Single-use challenge nonces.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::Mutex;

use crate::error::NonceStoreError;

/// Length of generated nonces.
pub const NONCE_LEN: usize = 17;

/// Result of trying to consume a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The nonce was live and unused; it is now marked used.
    Consumed,
    Unknown,
    AlreadyUsed,
    Expired,
}

/// Storage for issued nonces.
///
/// `consume` must be atomic: two concurrent calls for the same live nonce
/// yield exactly one `Consumed`.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Register a fresh nonce as unused for `ttl`. Returns `false` if the
    /// nonce is already known.
    async fn insert(&self, nonce: &str, ttl: Duration) -> Result<bool, NonceStoreError>;

    async fn consume(&self, nonce: &str) -> Result<ConsumeOutcome, NonceStoreError>;

    fn backend_name(&self) -> &'static str;
}

pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// Generate a nonce and register it, retrying on the (unlikely) collision.
pub async fn issue_nonce(store: &dyn NonceStore, ttl: Duration) -> Result<String, NonceStoreError> {
    for _ in 0..3 {
        let nonce = generate_nonce();
        if store.insert(&nonce, ttl).await? {
            return Ok(nonce);
        }
    }
    Err(NonceStoreError::Collision(
        "three consecutive generated nonces already existed".to_string(),
    ))
}

#[derive(Debug, Clone, Copy)]
struct NonceRecord {
    expires_at: Instant,
    /// Used and expired records stay until here so replays report reuse.
    retain_until: Instant,
    used: bool,
}

/// Process-local nonce store. A single mutex guards the whole map.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    records: Mutex<HashMap<String, NonceRecord>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

fn purge_stale(records: &mut HashMap<String, NonceRecord>, now: Instant) {
    records.retain(|_, record| record.retain_until > now);
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn insert(&self, nonce: &str, ttl: Duration) -> Result<bool, NonceStoreError> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        purge_stale(&mut records, now);
        if records.contains_key(nonce) {
            return Ok(false);
        }
        records.insert(
            nonce.to_string(),
            NonceRecord {
                expires_at: now + ttl,
                retain_until: now + ttl * 2,
                used: false,
            },
        );
        Ok(true)
    }

    async fn consume(&self, nonce: &str) -> Result<ConsumeOutcome, NonceStoreError> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        purge_stale(&mut records, now);
        let Some(record) = records.get_mut(nonce) else {
            return Ok(ConsumeOutcome::Unknown);
        };
        if record.used {
            return Ok(ConsumeOutcome::AlreadyUsed);
        }
        if record.expires_at <= now {
            return Ok(ConsumeOutcome::Expired);
        }
        record.used = true;
        Ok(ConsumeOutcome::Consumed)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn generated_nonces_are_alphanumeric() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(nonce, generate_nonce());
    }

    #[tokio::test]
    async fn nonce_is_consumed_once() {
        let store = MemoryNonceStore::new();
        let nonce = issue_nonce(&store, Duration::from_secs(60))
            .await
            .expect("issue");

        assert_eq!(
            store.consume(&nonce).await.expect("consume"),
            ConsumeOutcome::Consumed
        );
        assert_eq!(
            store.consume(&nonce).await.expect("consume"),
            ConsumeOutcome::AlreadyUsed
        );
        assert_eq!(
            store.consume("neverIssued12345").await.expect("consume"),
            ConsumeOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_refused() {
        let store = MemoryNonceStore::new();
        assert!(store.insert("fixedNonce123", Duration::from_secs(60)).await.expect("insert"));
        assert!(!store.insert("fixedNonce123", Duration::from_secs(60)).await.expect("insert"));
    }

    #[tokio::test]
    async fn expired_nonce_is_reported_then_purged() {
        let store = MemoryNonceStore::new();
        store
            .insert("shortLived12345", Duration::from_millis(30))
            .await
            .expect("insert");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            store.consume("shortLived12345").await.expect("consume"),
            ConsumeOutcome::Expired
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        store
            .insert("anotherNonce123", Duration::from_secs(60))
            .await
            .expect("insert");
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.consume("shortLived12345").await.expect("consume"),
            ConsumeOutcome::Unknown
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_see_exactly_one_success() {
        let store = Arc::new(MemoryNonceStore::new());
        let nonce = issue_nonce(store.as_ref(), Duration::from_secs(60))
            .await
            .expect("issue");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let nonce = nonce.clone();
            handles.push(tokio::spawn(async move { store.consume(&nonce).await }));
        }

        let mut consumed = 0;
        for handle in handles {
            if handle.await.expect("join").expect("consume") == ConsumeOutcome::Consumed {
                consumed += 1;
            }
        }
        assert_eq!(consumed, 1);
    }
}
