//! HTTP surface: axum router, handlers and wire types.

pub mod handlers;
pub mod ratelimit;
pub mod server;
pub mod types;

pub use ratelimit::{ClientIp, MessageRateLimiter};
pub use server::{AppState, router, start_server};
