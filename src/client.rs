//! HTTP client for the walletgate API.
//!
//! Keeps the session cookie between calls. Every call resolves to a
//! [`ClientResult`]; transport and HTTP failures never surface as `Err`.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::web::types::{
    ErrorResponse, IdentityUpsertRequest, MessageRequestBody, MessageResponse, SessionInfo,
    SimilarityRequest, SimilarityResponse, SimilarityResult, SuccessResponse, VerifyRequest,
    VerifyResponse,
};

/// Outcome of one API call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ClientResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ClientResult<U> {
        ClientResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
        }
    }
}

pub struct AuthClient {
    base_url: String,
    client: Client,
}

impl AuthClient {
    /// Client for the server at `base_url`, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Ask the server for a message to sign.
    pub async fn request_message(&self, address: &str, chain_id: Option<u64>) -> ClientResult<String> {
        let body = MessageRequestBody {
            address: Some(address.to_string()),
            chain_id,
        };
        self.post::<_, MessageResponse>("/api/auth/message", &body)
            .await
            .map(|r| r.message)
    }

    /// Submit a signed message. On success the session cookie is stored.
    pub async fn verify(&self, message: &str, signature: &str) -> ClientResult<SessionInfo> {
        let body = VerifyRequest {
            message: message.to_string(),
            signature: signature.to_string(),
        };
        let result = self
            .post::<_, VerifyResponse>("/api/auth/verify", &body)
            .await;
        match result.data {
            Some(VerifyResponse {
                session: Some(session),
                ..
            }) => ClientResult::ok(session),
            Some(VerifyResponse { error, .. }) => {
                ClientResult::err(error.unwrap_or_else(|| "verification failed".to_string()))
            }
            None => ClientResult::err(
                result
                    .error
                    .unwrap_or_else(|| "verification failed".to_string()),
            ),
        }
    }

    pub async fn session(&self) -> ClientResult<SessionInfo> {
        self.get("/api/auth/session").await
    }

    pub async fn sign_out(&self) -> ClientResult<()> {
        self.post::<_, SuccessResponse>("/api/auth/signout", &serde_json::json!({}))
            .await
            .map(|_| ())
    }

    pub async fn upsert_identity(&self, address: &str, embedding: Vec<f64>) -> ClientResult<()> {
        let body = IdentityUpsertRequest {
            address: address.to_string(),
            embedding,
        };
        self.post::<_, SuccessResponse>("/api/identities", &body)
            .await
            .map(|_| ())
    }

    pub async fn find_similar(
        &self,
        embedding: Vec<f64>,
        limit: Option<i64>,
        threshold: Option<f64>,
    ) -> ClientResult<Vec<SimilarityResult>> {
        let body = SimilarityRequest {
            embedding,
            limit,
            threshold,
        };
        self.post::<_, SimilarityResponse>("/api/similarity", &body)
            .await
            .map(|r| r.results)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        finish(self.client.get(self.url(path))).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<T> {
        finish(self.client.post(self.url(path)).json(body)).await
    }
}

async fn finish<T: DeserializeOwned>(request: RequestBuilder) -> ClientResult<T> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(error = %e, "walletgate request failed");
            return ClientResult::err(format!("request failed: {e}"));
        }
    };

    let status = response.status();
    if !status.is_success() {
        return match response.json::<ErrorResponse>().await {
            Ok(body) => ClientResult::err(body.error),
            Err(_) => ClientResult::err(format!("HTTP {}", status.as_u16())),
        };
    }

    match response.json::<T>().await {
        Ok(data) => ClientResult::ok(data),
        Err(e) => ClientResult::err(format!("invalid response: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = AuthClient::new("http://127.0.0.1:3000/").expect("client");
        assert_eq!(
            client.url("/api/auth/session"),
            "http://127.0.0.1:3000/api/auth/session"
        );
    }

    #[test]
    fn map_keeps_failure() {
        let failed: ClientResult<MessageResponse> = ClientResult::err("HTTP 429");
        let mapped = failed.map(|r| r.message);
        assert!(!mapped.success);
        assert_eq!(mapped.data, None);
        assert_eq!(mapped.error.as_deref(), Some("HTTP 429"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_failed_result() {
        // Port 9 (discard) on loopback is closed in test environments.
        let client = AuthClient::new("http://127.0.0.1:9").expect("client");
        let result = client.session().await;
        assert!(!result.success);
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("request failed"))
        );
    }
}
