//! Sign-In with Ethereum: challenge nonces, message format, signature
//! recovery and the verifier that ties them together.

pub mod message;
pub mod nonce;
#[cfg(feature = "redis")]
pub mod redis_nonce;
pub mod signature;
pub mod verifier;

pub use message::SiweMessage;
pub use nonce::{ConsumeOutcome, MemoryNonceStore, NonceStore};
#[cfg(feature = "redis")]
pub use redis_nonce::RedisNonceStore;
pub use signature::{Address, normalize_wallet_address};
pub use verifier::{MessageRequest, SiweVerifier, VerifiedIdentity};
