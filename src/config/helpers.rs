use std::str::FromStr;

use crate::error::ConfigError;

/// Read an env var, treating unset and blank values the same.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

/// First non-empty value among several aliases, in priority order.
pub(crate) fn first_non_empty_env(keys: &[&str]) -> Result<Option<String>, ConfigError> {
    for key in keys {
        if let Some(value) = optional_env(key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Parse an optional env var with `FromStr`, reporting the key on failure.
pub(crate) fn parse_optional_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

pub(crate) fn parse_bool_env(key: &str) -> Result<Option<bool>, ConfigError> {
    match optional_env(key)? {
        None => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{value}'"),
            }),
        },
    }
}

pub(crate) fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}
