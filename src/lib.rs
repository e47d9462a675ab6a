//! walletgate: Sign-In with Ethereum gateway.
//!
//! Issues and verifies EIP-4361 messages, keeps the signed-in wallet in an
//! encrypted cookie, and serves cosine similarity over identity embeddings
//! stored in pgvector.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod session;
pub mod vector;
pub mod web;

pub use config::Config;
pub use error::{Error, Result};
