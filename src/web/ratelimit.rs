//! Per-client rate limiting for challenge messages.
//!
//! Every issued message stores a nonce, so the message endpoint is capped per
//! client IP with a keyed governor limiter. One noisy client cannot exhaust
//! the quota of the others.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::debug;

/// Token bucket per client IP, refilled over one minute.
pub struct MessageRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

impl MessageRateLimiter {
    /// Allow `per_minute` messages per client, all of them as a burst.
    pub fn new(per_minute: u64) -> Self {
        let per_minute = NonZeroU32::new(u32::try_from(per_minute).unwrap_or(u32::MAX))
            .unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
        }
    }

    /// Take one slot for `ip`. `false` means the client is rate limited.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Drop buckets that have refilled completely.
    pub fn sweep(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        debug!(tracked = self.limiter.len(), "Swept message rate limiter");
    }
}

/// Peer IP of the connection. Requests served without connect info (router
/// tests) share the unspecified address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(Self(ip))
    }
}
