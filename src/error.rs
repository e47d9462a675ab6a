//! Error types for walletgate.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Nonce store error: {0}")]
    NonceStore(#[from] NonceStoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Schema setup failed: {0}")]
    Schema(String),

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::CreatePoolError),

    #[cfg(feature = "postgres")]
    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

/// Challenge (nonce) store errors. These are infrastructure failures, not
/// authentication outcomes.
#[derive(Debug, thiserror::Error)]
pub enum NonceStoreError {
    #[error("Nonce backend unavailable: {0}")]
    Unavailable(String),

    #[error("Nonce {0} was issued twice")]
    Collision(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[cfg(feature = "redis")]
    #[error("Redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),
}

/// Input validation errors, rejected before any I/O happens.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("address is required")]
    MissingAddress,

    #[error("address must be a 0x-prefixed 40-hex Ethereum address")]
    InvalidAddress,

    #[error("chain id must be a positive integer")]
    InvalidChainId,

    #[error("Host header is required")]
    MissingHost,

    #[error("embedding must not be empty")]
    EmptyEmbedding,

    #[error("embedding must have {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding value at index {index} is not a finite number")]
    NonFiniteValue { index: usize },

    #[error("embedding must have a non-zero magnitude")]
    ZeroMagnitude,

    #[error("limit must be an integer between 1 and {max}")]
    InvalidLimit { max: usize },

    #[error("threshold must be a positive finite number")]
    InvalidThreshold,

    #[error("trust score must be a finite number")]
    InvalidTrustScore,

    #[error("event type must not be empty")]
    MissingEventType,
}

/// Reasons a signed authentication message is rejected.
///
/// These never reach clients verbatim; the HTTP layer collapses them into a
/// single generic failure and only logs the specific reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyFailure {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message domain {actual} does not match expected domain {expected}")]
    DomainMismatch { expected: String, actual: String },

    #[error("message expired")]
    Expired,

    #[error("message is not valid yet")]
    NotYetValid,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("recovered signer does not match claimed address")]
    SignatureMismatch,

    #[error("nonce is unknown")]
    UnknownNonce,

    #[error("nonce already used")]
    NonceReused,

    #[error("nonce expired")]
    NonceExpired,
}

impl VerifyFailure {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_message",
            Self::DomainMismatch { .. } => "domain_mismatch",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::MalformedSignature(_) => "malformed_signature",
            Self::SignatureMismatch => "signature_mismatch",
            Self::UnknownNonce => "unknown_nonce",
            Self::NonceReused => "nonce_reused",
            Self::NonceExpired => "nonce_expired",
        }
    }
}

/// Session sealing errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Session key derivation failed")]
    KeyDerivation,

    #[error("Session encryption failed")]
    Encrypt,

    #[error("Session cookie header is invalid: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
}

/// Metrics registry errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server failed: {0}")]
    Serve(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
