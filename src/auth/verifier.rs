use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::message::SiweMessage;
use super::nonce::{ConsumeOutcome, NonceStore, issue_nonce};
use super::signature::{Address, verify_wallet_signature};
use crate::config::AuthConfig;
use crate::error::{Error, NonceStoreError, ValidationError, VerifyFailure};
use crate::metrics::{Computation, EventContext, Metrics};

/// Input for a new challenge message.
#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub address: String,
    pub chain_id: Option<u64>,
}

/// Identity established by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Lowercase `0x` hex.
    pub address: String,
    pub chain_id: u64,
    pub nonce: String,
}

/// Issues challenge messages and verifies signed ones.
pub struct SiweVerifier {
    config: AuthConfig,
    nonces: Arc<dyn NonceStore>,
    metrics: Metrics,
}

impl SiweVerifier {
    pub fn new(config: AuthConfig, nonces: Arc<dyn NonceStore>, metrics: Metrics) -> Self {
        Self {
            config,
            nonces,
            metrics,
        }
    }

    pub fn nonce_backend(&self) -> &'static str {
        self.nonces.backend_name()
    }

    pub fn pinned_domain(&self) -> Option<&str> {
        self.config.domain.as_deref()
    }

    fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.config.nonce_ttl_secs)
    }

    /// Domain messages are bound to: the pinned one, else the request host.
    pub fn domain_for<'a>(&'a self, request_host: Option<&'a str>) -> Option<&'a str> {
        self.config.domain.as_deref().or(request_host)
    }

    /// Build a fresh message for `request` and register its nonce.
    ///
    /// `origin` becomes the message URI only when it names the bound domain;
    /// otherwise the URI is `https://{domain}`.
    pub async fn issue_message(
        &self,
        request: MessageRequest,
        request_host: Option<&str>,
        origin: Option<&str>,
    ) -> Result<SiweMessage, Error> {
        let raw = request.address.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingAddress.into());
        }
        let address = Address::parse(raw).ok_or(ValidationError::InvalidAddress)?;
        let chain_id = match request.chain_id {
            None => self.config.default_chain_id,
            Some(0) => return Err(ValidationError::InvalidChainId.into()),
            Some(id) => id,
        };

        let domain = self
            .domain_for(request_host)
            .ok_or(ValidationError::MissingHost)?
            .to_string();
        let uri = origin
            .filter(|origin| origin_host(origin) == Some(domain.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://{domain}"));
        let nonce = issue_nonce(self.nonces.as_ref(), self.nonce_ttl()).await?;
        let issued_at = Utc::now();
        let expiration_time = chrono::Duration::from_std(self.nonce_ttl())
            .ok()
            .map(|ttl| issued_at + ttl);

        self.metrics.record_event(EventContext::MessageIssued);
        debug!(address = %address.to_lower_hex(), chain_id, "Issued sign-in message");

        Ok(SiweMessage {
            domain,
            address,
            statement: self.config.statement.clone(),
            uri,
            chain_id,
            nonce,
            issued_at,
            expiration_time,
            not_before: None,
            request_id: None,
            resources: Vec::new(),
        })
    }

    /// Verify a signed message.
    ///
    /// The outer error is an infrastructure failure of the nonce store; the
    /// inner result is the authentication decision. The nonce is consumed
    /// only after the signature checks out.
    pub async fn verify(
        &self,
        message: &str,
        signature: &str,
        request_host: Option<&str>,
    ) -> Result<Result<VerifiedIdentity, VerifyFailure>, NonceStoreError> {
        self.metrics.record_event(EventContext::Verify);
        let outcome = self.verify_inner(message, signature, request_host).await?;
        match &outcome {
            Ok(identity) => {
                self.metrics.record_verification("success");
                debug!(address = %identity.address, chain_id = identity.chain_id, "Sign-in verified");
            }
            Err(failure) => {
                self.metrics.record_verification(failure.reason());
                warn!(reason = failure.reason(), detail = %failure, "Sign-in verification failed");
            }
        }
        Ok(outcome)
    }

    async fn verify_inner(
        &self,
        message: &str,
        signature: &str,
        request_host: Option<&str>,
    ) -> Result<Result<VerifiedIdentity, VerifyFailure>, NonceStoreError> {
        let parsed = match message.parse::<SiweMessage>() {
            Ok(parsed) => parsed,
            Err(failure) => return Ok(Err(failure)),
        };

        if let Some(expected) = self.domain_for(request_host)
            && parsed.domain != expected
        {
            return Ok(Err(VerifyFailure::DomainMismatch {
                expected: expected.to_string(),
                actual: parsed.domain,
            }));
        }

        if let Err(failure) = parsed.check_time(Utc::now()) {
            return Ok(Err(failure));
        }

        let signature_check = self.metrics.time(Computation::SignatureRecovery, || {
            verify_wallet_signature(message, signature, &parsed.address)
        });
        if let Err(failure) = signature_check {
            return Ok(Err(failure));
        }

        let consumed = match self.nonces.consume(&parsed.nonce).await? {
            ConsumeOutcome::Consumed => Ok(()),
            ConsumeOutcome::Unknown => Err(VerifyFailure::UnknownNonce),
            ConsumeOutcome::AlreadyUsed => Err(VerifyFailure::NonceReused),
            ConsumeOutcome::Expired => Err(VerifyFailure::NonceExpired),
        };

        Ok(consumed.map(|()| VerifiedIdentity {
            address: parsed.address.to_lower_hex(),
            chain_id: parsed.chain_id,
            nonce: parsed.nonce,
        }))
    }
}

/// Host part of an `http(s)://host[:port]` origin.
fn origin_host(origin: &str) -> Option<&str> {
    origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
        .map(|host| host.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::nonce::MemoryNonceStore;
    use crate::auth::signature::test_wallet::{DEV_ADDRESS, TestWallet};

    const HOST: &str = "localhost:3000";

    fn verifier() -> (SiweVerifier, Metrics) {
        let metrics = Metrics::new().expect("metrics");
        let verifier = SiweVerifier::new(
            AuthConfig::default(),
            Arc::new(MemoryNonceStore::new()),
            metrics.clone(),
        );
        (verifier, metrics)
    }

    async fn issue(verifier: &SiweVerifier, address: &str) -> String {
        verifier
            .issue_message(
                MessageRequest {
                    address: address.to_string(),
                    chain_id: Some(1),
                },
                Some(HOST),
                None,
            )
            .await
            .expect("issue")
            .to_string()
    }

    #[tokio::test]
    async fn signed_message_verifies_exactly_once() {
        let (verifier, metrics) = verifier();
        let wallet = TestWallet::dev();
        let message = issue(&verifier, &DEV_ADDRESS.to_ascii_uppercase().replace("0X", "0x")).await;
        let signature = wallet.sign(&message);

        let identity = verifier
            .verify(&message, &signature, Some(HOST))
            .await
            .expect("store")
            .expect("first verification succeeds");
        assert_eq!(identity.address, DEV_ADDRESS.to_ascii_lowercase());
        assert_eq!(identity.chain_id, 1);

        let replay = verifier
            .verify(&message, &signature, Some(HOST))
            .await
            .expect("store");
        assert_eq!(replay, Err(VerifyFailure::NonceReused));
        assert_eq!(metrics.verification_count("success"), 1);
        assert_eq!(metrics.verification_count("nonce_reused"), 1);
    }

    #[tokio::test]
    async fn signature_from_other_key_is_rejected_and_nonce_survives() {
        let (verifier, _) = verifier();
        let claimed = TestWallet::dev();
        let attacker = TestWallet::from_hex(
            "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
        );
        let message = issue(&verifier, &claimed.address().to_checksum()).await;

        let forged = verifier
            .verify(&message, &attacker.sign(&message), Some(HOST))
            .await
            .expect("store");
        assert_eq!(forged, Err(VerifyFailure::SignatureMismatch));

        let genuine = verifier
            .verify(&message, &claimed.sign(&message), Some(HOST))
            .await
            .expect("store");
        assert!(genuine.is_ok());
    }

    #[tokio::test]
    async fn unknown_nonce_is_rejected() {
        let (other, _) = verifier();
        let (verifier, _) = verifier();
        let wallet = TestWallet::dev();
        // Issued by a different store, so this verifier never saw the nonce.
        let message = issue(&other, DEV_ADDRESS).await;

        let outcome = verifier
            .verify(&message, &wallet.sign(&message), Some(HOST))
            .await
            .expect("store");
        assert_eq!(outcome, Err(VerifyFailure::UnknownNonce));
    }

    #[tokio::test]
    async fn domain_and_shape_checks_run_before_signatures() {
        let (verifier, _) = verifier();
        let wallet = TestWallet::dev();
        let message = issue(&verifier, DEV_ADDRESS).await;

        let wrong_host = verifier
            .verify(&message, &wallet.sign(&message), Some("evil.example"))
            .await
            .expect("store");
        assert!(matches!(wrong_host, Err(VerifyFailure::DomainMismatch { .. })));

        let garbage = verifier
            .verify("not a sign-in message", "0x00", Some(HOST))
            .await
            .expect("store");
        assert!(matches!(garbage, Err(VerifyFailure::Malformed(_))));

        let bad_signature = verifier
            .verify(&message, "0x1234", Some(HOST))
            .await
            .expect("store");
        assert!(matches!(bad_signature, Err(VerifyFailure::MalformedSignature(_))));

        // None of the failures above consumed the nonce.
        let ok = verifier
            .verify(&message, &wallet.sign(&message), Some(HOST))
            .await
            .expect("store");
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn expired_message_is_rejected() {
        let (verifier, _) = verifier();
        let wallet = TestWallet::dev();
        let mut message: SiweMessage = issue(&verifier, DEV_ADDRESS)
            .await
            .parse()
            .expect("parse");
        message.expiration_time = Some(Utc::now() - chrono::Duration::seconds(1));
        let text = message.to_string();

        let outcome = verifier
            .verify(&text, &wallet.sign(&text), Some(HOST))
            .await
            .expect("store");
        assert_eq!(outcome, Err(VerifyFailure::Expired));
    }

    #[tokio::test]
    async fn issue_validates_input() {
        let (verifier, _) = verifier();
        let missing = verifier
            .issue_message(
                MessageRequest {
                    address: "  ".to_string(),
                    chain_id: None,
                },
                Some(HOST),
                None,
            )
            .await;
        assert!(matches!(
            missing,
            Err(Error::Validation(ValidationError::MissingAddress))
        ));

        let bad = verifier
            .issue_message(
                MessageRequest {
                    address: "0xnothex".to_string(),
                    chain_id: None,
                },
                Some(HOST),
                None,
            )
            .await;
        assert!(matches!(
            bad,
            Err(Error::Validation(ValidationError::InvalidAddress))
        ));

        let zero_chain = verifier
            .issue_message(
                MessageRequest {
                    address: DEV_ADDRESS.to_string(),
                    chain_id: Some(0),
                },
                Some(HOST),
                None,
            )
            .await;
        assert!(matches!(
            zero_chain,
            Err(Error::Validation(ValidationError::InvalidChainId))
        ));
    }

    #[tokio::test]
    async fn pinned_domain_overrides_request_host() {
        let config = AuthConfig {
            domain: Some("app.example.com".to_string()),
            ..AuthConfig::default()
        };
        let verifier = SiweVerifier::new(
            config,
            Arc::new(MemoryNonceStore::new()),
            Metrics::new().expect("metrics"),
        );
        let message = issue(&verifier, DEV_ADDRESS).await;
        assert!(message.starts_with("app.example.com wants you to sign in"));
        assert!(message.contains("URI: https://app.example.com\n"));

        let wallet = TestWallet::dev();
        let outcome = verifier
            .verify(&message, &wallet.sign(&message), Some("other-host:8080"))
            .await
            .expect("store");
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn origin_for_another_host_is_not_used_as_uri() {
        let (verifier, _) = verifier();
        let request = || MessageRequest {
            address: DEV_ADDRESS.to_string(),
            chain_id: None,
        };

        let same = verifier
            .issue_message(request(), Some(HOST), Some("http://localhost:3000"))
            .await
            .expect("issue");
        assert_eq!(same.uri, "http://localhost:3000");

        let foreign = verifier
            .issue_message(request(), Some(HOST), Some("https://evil.example"))
            .await
            .expect("issue");
        assert_eq!(foreign.uri, "https://localhost:3000");

        let no_host = verifier.issue_message(request(), None, None).await;
        assert!(matches!(
            no_host,
            Err(Error::Validation(ValidationError::MissingHost))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_verifications_succeed_once() {
        let (verifier, _) = verifier();
        let verifier = Arc::new(verifier);
        let wallet = TestWallet::dev();
        let message = issue(&verifier, DEV_ADDRESS).await;
        let signature = wallet.sign(&message);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let verifier = Arc::clone(&verifier);
            let message = message.clone();
            let signature = signature.clone();
            handles.push(tokio::spawn(async move {
                verifier.verify(&message, &signature, Some(HOST)).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.expect("join").expect("store").is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
