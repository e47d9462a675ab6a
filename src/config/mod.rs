//! Configuration for walletgate.
//!
//! Settings are loaded with priority: env var > default. `./.env` is read via
//! dotenvy early in startup, and CLI flags override the HTTP bind address.

mod database;
pub(crate) mod helpers;

use secrecy::{ExposeSecret, SecretString};

use crate::config::helpers::{
    first_non_empty_env, optional_env, parse_bool_env, parse_optional_env,
};
use crate::error::ConfigError;

pub use self::database::{DatabaseConfig, NonceStoreConfig, VectorBackend, VectorConfig};

/// Minimum length of the cookie sealing password.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_COOKIE_NAME: &str = "walletgate_session";
const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_NONCE_TTL_SECS: u64 = 5 * 60;
const DEFAULT_CHAIN_ID: u64 = 1;
const DEFAULT_MESSAGE_RATE_LIMIT: u64 = 60;
const DEFAULT_STATEMENT: &str = "Sign in with Ethereum to the app.";

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub nonce_store: NonceStoreConfig,
    pub vector: VectorConfig,
}

impl Config {
    /// Resolve the full configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let production = !matches!(
            optional_env("WALLETGATE_ENV")?.as_deref(),
            Some("development" | "dev" | "test")
        );
        let database = DatabaseConfig::resolve()?;
        let vector = VectorConfig::resolve(&database)?;
        Ok(Self {
            http: HttpConfig::resolve()?,
            session: SessionConfig::resolve(production)?,
            auth: AuthConfig::resolve()?,
            database,
            nonce_store: NonceStoreConfig::resolve()?,
            vector,
        })
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Challenge messages allowed per minute across all clients.
    pub message_rate_limit: u64,
}

impl HttpConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let message_rate_limit = parse_optional_env::<u64>("MESSAGE_RATE_LIMIT")?
            .unwrap_or(DEFAULT_MESSAGE_RATE_LIMIT);
        if message_rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MESSAGE_RATE_LIMIT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            host: optional_env("WALLETGATE_HOST")?.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_optional_env::<u16>("WALLETGATE_PORT")?.unwrap_or(DEFAULT_PORT),
            message_rate_limit,
        })
    }
}

/// Sealed cookie session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub password: SecretString,
    pub cookie_name: String,
    pub ttl_secs: u64,
    pub secure: bool,
}

impl SessionConfig {
    fn resolve(production: bool) -> Result<Self, ConfigError> {
        let password = first_non_empty_env(&["SESSION_SECRET", "IRON_SESSION_PASSWORD"])?
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "SESSION_SECRET".to_string(),
                hint: format!(
                    "Set SESSION_SECRET (or IRON_SESSION_PASSWORD) to at least {MIN_SESSION_SECRET_LEN} characters"
                ),
            })?;
        let config = Self {
            password: SecretString::from(password),
            cookie_name: optional_env("SESSION_COOKIE_NAME")?
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            ttl_secs: parse_optional_env::<u64>("SESSION_TTL_SECS")?
                .unwrap_or(DEFAULT_SESSION_TTL_SECS),
            secure: parse_bool_env("SESSION_COOKIE_SECURE")?.unwrap_or(production),
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a config directly, mainly for tests and embedding.
    pub fn new(password: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            password: SecretString::from(password.into()),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
            secure: true,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.password.expose_secret().chars().count() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_SECRET".to_string(),
                message: format!("must be at least {MIN_SESSION_SECRET_LEN} characters"),
            });
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_TTL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_COOKIE_NAME".to_string(),
                message: "must be non-empty and use only [A-Za-z0-9_-]".to_string(),
            });
        }
        Ok(())
    }
}

/// Sign-In with Ethereum message settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// When set, messages are issued for and verified against this domain
    /// instead of the request host.
    pub domain: Option<String>,
    pub statement: Option<String>,
    pub default_chain_id: u64,
    pub nonce_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: None,
            statement: Some(DEFAULT_STATEMENT.to_string()),
            default_chain_id: DEFAULT_CHAIN_ID,
            nonce_ttl_secs: DEFAULT_NONCE_TTL_SECS,
        }
    }
}

impl AuthConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let default_chain_id =
            parse_optional_env::<u64>("SIWE_DEFAULT_CHAIN_ID")?.unwrap_or(DEFAULT_CHAIN_ID);
        if default_chain_id == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIWE_DEFAULT_CHAIN_ID".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }
        let nonce_ttl_secs =
            parse_optional_env::<u64>("NONCE_TTL_SECS")?.unwrap_or(DEFAULT_NONCE_TTL_SECS);
        if nonce_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "NONCE_TTL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let statement = optional_env("SIWE_STATEMENT")?
            .unwrap_or_else(|| DEFAULT_STATEMENT.to_string());
        if statement.contains('\n') {
            return Err(ConfigError::InvalidValue {
                key: "SIWE_STATEMENT".to_string(),
                message: "must be a single line".to_string(),
            });
        }
        Ok(Self {
            domain: optional_env("SIWE_DOMAIN")?,
            statement: Some(statement),
            default_chain_id,
            nonce_ttl_secs,
        })
    }
}
