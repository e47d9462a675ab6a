//! Request and response DTOs for the HTTP API. JSON field names are
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::IdentityMatch;
use crate::session::Session;

// --- Auth ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequestBody {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub message: String,
    pub signature: String,
}

/// Public view of a session. The nonce stays inside the cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub address: String,
    pub chain_id: u64,
    pub is_authenticated: bool,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            address: session.address.clone(),
            chain_id: session.chain_id,
            is_authenticated: session.is_authenticated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// --- Similarity ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityRequest {
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub address: String,
    pub distance: f64,
}

impl From<IdentityMatch> for SimilarityResult {
    fn from(m: IdentityMatch) -> Self {
        Self {
            address: m.address,
            distance: m.distance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResponse {
    pub results: Vec<SimilarityResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityUpsertRequest {
    pub address: String,
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustEventRequest {
    pub from_address: String,
    pub to_address: String,
    pub trust_score: f64,
    pub event_type: String,
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustEventResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

// --- Misc ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub nonce_store: String,
    pub vector_backend: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}
