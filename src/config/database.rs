use secrecy::SecretString;

use crate::config::helpers::{normalize_variant, optional_env, parse_optional_env};
use crate::error::ConfigError;

const DEFAULT_POOL_SIZE: usize = 8;
const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
const DEFAULT_SIMILARITY_MAX_LIMIT: usize = 100;

/// Which store backs identity embeddings and trust events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Postgres,
    Memory,
}

impl VectorBackend {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "memory" | "in_memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'postgres' or 'memory', got '{value}'"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<SecretString>,
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let pool_size = parse_optional_env::<usize>("DATABASE_POOL_SIZE")?
            .unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            url: optional_env("DATABASE_URL")?.map(SecretString::from),
            pool_size,
        })
    }
}

/// Similarity helper settings.
#[derive(Debug, Clone)]
pub struct VectorConfig {
    pub backend: VectorBackend,
    /// Every embedding must have exactly this many components.
    pub dimension: usize,
    /// Upper bound for `k` in nearest-neighbour queries.
    pub max_limit: usize,
}

impl VectorConfig {
    pub(crate) fn resolve(database: &DatabaseConfig) -> Result<Self, ConfigError> {
        let backend = match optional_env("VECTOR_BACKEND")? {
            Some(value) => VectorBackend::parse(&value, "VECTOR_BACKEND")?,
            None if database.url.is_some() => VectorBackend::Postgres,
            None => VectorBackend::Memory,
        };
        if backend == VectorBackend::Postgres && database.url.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "DATABASE_URL".to_string(),
                hint: "VECTOR_BACKEND=postgres needs a Postgres URL with the pgvector extension"
                    .to_string(),
            });
        }

        let dimension = parse_optional_env::<usize>("EMBEDDING_DIMENSION")?
            .unwrap_or(DEFAULT_EMBEDDING_DIMENSION);
        // pgvector caps stored vectors at 16000 dimensions.
        if dimension == 0 || dimension > 16_000 {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_DIMENSION".to_string(),
                message: format!("must be between 1 and 16000, got {dimension}"),
            });
        }

        let max_limit = parse_optional_env::<usize>("SIMILARITY_MAX_LIMIT")?
            .unwrap_or(DEFAULT_SIMILARITY_MAX_LIMIT);
        if max_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIMILARITY_MAX_LIMIT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            backend,
            dimension,
            max_limit,
        })
    }
}

/// Where issued nonces live.
#[derive(Debug, Clone)]
pub enum NonceStoreConfig {
    Memory,
    Redis { url: SecretString },
}

impl NonceStoreConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(match optional_env("REDIS_URL")? {
            Some(url) => Self::Redis {
                url: SecretString::from(url),
            },
            None => Self::Memory,
        })
    }
}
