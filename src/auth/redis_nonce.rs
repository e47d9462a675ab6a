//! Redis-backed nonce store for multi-instance deployments.
//!
//! Key layout: `walletgate:nonce:{nonce}` -> `unused:{expires_at_unix}` or
//! `used`. Keys live for twice the nonce TTL so that expired and replayed
//! nonces are reported as such instead of unknown.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::nonce::{ConsumeOutcome, NonceStore};
use crate::error::NonceStoreError;

const KEY_PREFIX: &str = "walletgate:nonce:";

/// Check and mark in one server-side step.
///
/// Returns 0 unknown, 1 consumed, 2 already used, 3 expired.
const CONSUME_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return 0
end
if value == 'used' then
    return 2
end
local expires_at = tonumber(string.sub(value, 8))
if expires_at == nil or expires_at <= tonumber(ARGV[1]) then
    return 3
end
redis.call('SET', KEYS[1], 'used', 'KEEPTTL')
return 1
"#;

#[derive(Clone)]
pub struct RedisNonceStore {
    pool: Pool,
    script: std::sync::Arc<redis::Script>,
}

impl std::fmt::Debug for RedisNonceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisNonceStore").finish_non_exhaustive()
    }
}

impl RedisNonceStore {
    /// Build a pool and check connectivity with `PING`.
    pub async fn connect(url: &SecretString) -> Result<Self, NonceStoreError> {
        let pool = Config::from_url(url.expose_secret())
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| NonceStoreError::Unavailable(format!("failed to create Redis pool: {e}")))?;

        let mut conn = pool.get().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await?;
        info!("Redis nonce store connected");

        Ok(Self {
            pool,
            script: std::sync::Arc::new(redis::Script::new(CONSUME_SCRIPT)),
        })
    }
}

fn key_for(nonce: &str) -> String {
    format!("{KEY_PREFIX}{nonce}")
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    async fn insert(&self, nonce: &str, ttl: Duration) -> Result<bool, NonceStoreError> {
        let mut conn = self.pool.get().await?;
        let expires_at = chrono::Utc::now().timestamp() + ttl.as_secs().max(1) as i64;
        let retain_secs = ttl.as_secs().max(1) * 2;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key_for(nonce))
            .arg(format!("unused:{expires_at}"))
            .arg("EX")
            .arg(retain_secs)
            .arg("NX")
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn consume(&self, nonce: &str) -> Result<ConsumeOutcome, NonceStoreError> {
        let mut conn = self.pool.get().await?;
        let code: i64 = self
            .script
            .key(key_for(nonce))
            .arg(chrono::Utc::now().timestamp())
            .invoke_async(&mut *conn)
            .await?;
        match code {
            0 => Ok(ConsumeOutcome::Unknown),
            1 => Ok(ConsumeOutcome::Consumed),
            2 => Ok(ConsumeOutcome::AlreadyUsed),
            3 => Ok(ConsumeOutcome::Expired),
            other => Err(NonceStoreError::Unavailable(format!(
                "unexpected consume script reply {other}"
            ))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
