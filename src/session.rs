//! Encrypted cookie sessions.
//!
//! The whole session lives in the cookie: JSON sealed with AES-256-GCM under a
//! key derived from the configured password. Cookie format:
//! `base64url(nonce[12] || ciphertext || tag[16])`.

// generic-array::from_slice is deprecated upstream; aes-gcm 0.10 still uses it.
#![allow(deprecated)]

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, SameSite};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::metrics::{Computation, Metrics};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KDF_SALT: &[u8] = b"walletgate.session.v1";
const KDF_INFO: &[u8] = b"aes-256-gcm cookie key";
/// Browsers cap `Max-Age` at 400 days.
const MAX_TTL_SECS: u64 = 400 * 24 * 60 * 60;

/// Session state carried by the cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub address: String,
    pub chain_id: u64,
    pub is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Session {
    /// The unauthenticated shape returned when there is no usable cookie.
    pub fn anonymous(default_chain_id: u64) -> Self {
        Self {
            address: String::new(),
            chain_id: default_chain_id,
            is_authenticated: false,
            nonce: None,
        }
    }

    pub fn authenticated(address: String, chain_id: u64, nonce: Option<String>) -> Self {
        Self {
            address,
            chain_id,
            is_authenticated: true,
            nonce,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SealedPayload {
    session: Session,
    expires_at: DateTime<Utc>,
}

/// Reads and writes sealed session cookies.
pub struct SessionManager {
    cipher: Aes256Gcm,
    config: SessionConfig,
    default_chain_id: u64,
    metrics: Metrics,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie_name", &self.config.cookie_name)
            .field("ttl_secs", &self.config.ttl_secs)
            .field("secure", &self.config.secure)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        default_chain_id: u64,
        metrics: Metrics,
    ) -> Result<Self, SessionError> {
        let key = derive_key(config.password.expose_secret().as_bytes())?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Ok(Self {
            cipher,
            config,
            default_chain_id,
            metrics,
        })
    }

    pub fn default_session(&self) -> Session {
        Session::anonymous(self.default_chain_id)
    }

    /// Session from the request cookie, or the default shape when the cookie
    /// is missing, tampered with, sealed under another key or expired.
    pub fn get_session(&self, headers: &HeaderMap) -> Session {
        let Some(sealed) = extract_cookie(headers, &self.config.cookie_name) else {
            return self.default_session();
        };
        let unsealed = self
            .metrics
            .time(Computation::SessionUnseal, || self.unseal(&sealed, Utc::now()));
        unsealed.unwrap_or_else(|| {
            debug!("Ignoring unusable session cookie");
            self.default_session()
        })
    }

    /// `Set-Cookie` value carrying `session`.
    pub fn save_session(&self, session: &Session) -> Result<HeaderValue, SessionError> {
        let expires_at = Utc::now() + self.ttl();
        let sealed = self
            .metrics
            .time(Computation::SessionSeal, || self.seal(session, expires_at))?;
        let cookie = self
            .cookie(sealed)
            .max_age(cookie::time::Duration::seconds(self.ttl().num_seconds()))
            .build();
        Ok(HeaderValue::from_str(&cookie.to_string())?)
    }

    /// `Set-Cookie` value that clears the session.
    pub fn destroy_session(&self) -> Result<HeaderValue, SessionError> {
        let cookie = self.cookie(String::new()).removal().build();
        Ok(HeaderValue::from_str(&cookie.to_string())?)
    }

    fn cookie(&self, value: String) -> cookie::CookieBuilder<'static> {
        Cookie::build((self.config.cookie_name.clone(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.config.secure)
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.config.ttl_secs.min(MAX_TTL_SECS) as i64)
    }

    fn seal(&self, session: &Session, expires_at: DateTime<Utc>) -> Result<String, SessionError> {
        let plaintext = serde_json::to_vec(&SealedPayload {
            session: session.clone(),
            expires_at,
        })?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|_| SessionError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64_URL_SAFE_NO_PAD.encode(sealed))
    }

    fn unseal(&self, value: &str, now: DateTime<Utc>) -> Option<Session> {
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(value).ok()?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        let payload: SealedPayload = serde_json::from_slice(&plaintext).ok()?;
        (payload.expires_at > now).then_some(payload.session)
    }
}

fn derive_key(password: &[u8]) -> Result<[u8; 32], SessionError> {
    let mut key = [0u8; 32];
    Hkdf::<Sha256>::new(Some(KDF_SALT), password)
        .expand(KDF_INFO, &mut key)
        .map_err(|_| SessionError::KeyDerivation)?;
    Ok(key)
}

/// First non-empty value of cookie `name` across all `Cookie` headers.
/// Quoted values are unquoted.
fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name && !cookie.value_trimmed().is_empty())
        .map(|cookie| cookie.value_trimmed().to_string())
}
