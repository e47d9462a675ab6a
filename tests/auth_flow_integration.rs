//! End-to-end tests against a real server on a random port, driven by the
//! `AuthClient` SDK:
//! - challenge message, wallet signature, verify, cookie session
//! - replay of a consumed message
//! - sign out
//! - identity similarity over HTTP

use std::net::SocketAddr;
use std::sync::Arc;

use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};

use walletgate::auth::{MemoryNonceStore, SiweVerifier};
use walletgate::client::AuthClient;
use walletgate::config::{AuthConfig, SessionConfig, VectorBackend, VectorConfig};
use walletgate::db::memory::MemoryVectorStore;
use walletgate::metrics::Metrics;
use walletgate::session::SessionManager;
use walletgate::vector::SimilarityService;
use walletgate::web::{AppState, start_server};

/// First Hardhat/Anvil development account.
const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    let text = err.to_string();
    text.contains("Operation not permitted") || text.contains("Permission denied")
}

async fn start_test_server() -> Option<(SocketAddr, Arc<AppState>)> {
    let metrics = Metrics::new().expect("metrics");
    let mut session_config =
        SessionConfig::new("integration-test-secret-0123456789abcdef").expect("session config");
    // Plain HTTP on loopback: the client's cookie jar drops Secure cookies.
    session_config.secure = false;

    let state = Arc::new(AppState::new(
        SiweVerifier::new(
            AuthConfig::default(),
            Arc::new(MemoryNonceStore::new()),
            metrics.clone(),
        ),
        SessionManager::new(session_config, 1, metrics.clone()).expect("session manager"),
        SimilarityService::new(
            Arc::new(MemoryVectorStore::new()),
            &VectorConfig {
                backend: VectorBackend::Memory,
                dimension: 3,
                max_limit: 5,
            },
            metrics.clone(),
        ),
        metrics,
        30,
    ));

    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    match start_server(addr, state.clone()).await {
        Ok(bound_addr) => Some((bound_addr, state)),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start test server: {e:?}"),
    }
}

/// EIP-191 personal_sign with a 27/28 recovery byte.
fn personal_sign(key_hex: &str, message: &str) -> String {
    let key = SigningKey::from_slice(&hex::decode(key_hex).expect("key hex")).expect("key");
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    let digest = hasher.finalize();
    let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).expect("sign");
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    format!("0x{}", hex::encode(bytes))
}

#[tokio::test]
async fn sign_in_session_and_sign_out() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind a local port");
        return;
    };
    let client = AuthClient::new(format!("http://{addr}")).expect("client");

    let anonymous = client.session().await;
    assert!(anonymous.success);
    assert!(!anonymous.data.expect("session").is_authenticated);

    let issued = client.request_message(DEV_ADDRESS, Some(1)).await;
    assert!(issued.success, "message request failed: {:?}", issued.error);
    let message = issued.data.expect("message");
    assert!(message.starts_with(&format!("{addr} wants you to sign in")));
    assert!(message.contains(DEV_ADDRESS));

    let signature = personal_sign(DEV_KEY, &message);
    let verified = client.verify(&message, &signature).await;
    assert!(verified.success, "verify failed: {:?}", verified.error);
    let session = verified.data.expect("session");
    assert_eq!(session.address, DEV_ADDRESS.to_lowercase());
    assert!(session.is_authenticated);

    let current = client.session().await.data.expect("session");
    assert_eq!(current, session);

    let replay = client.verify(&message, &signature).await;
    assert!(!replay.success);
    assert_eq!(replay.error.as_deref(), Some("verification failed"));

    assert!(client.sign_out().await.success);
    let after = client.session().await.data.expect("session");
    assert!(!after.is_authenticated);
    assert_eq!(after.address, "");

    state.shutdown().await;
}

#[tokio::test]
async fn invalid_requests_report_errors() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind a local port");
        return;
    };
    let client = AuthClient::new(format!("http://{addr}")).expect("client");

    let bad = client.request_message("not-an-address", None).await;
    assert!(!bad.success);
    assert_eq!(
        bad.error.as_deref(),
        Some("address must be a 0x-prefixed 40-hex Ethereum address")
    );

    let message = client
        .request_message(DEV_ADDRESS, None)
        .await
        .data
        .expect("message");
    let wrong_key = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    let rejected = client
        .verify(&message, &personal_sign(wrong_key, &message))
        .await;
    assert!(!rejected.success);
    assert_eq!(rejected.error.as_deref(), Some("verification failed"));
    assert!(!client.session().await.data.expect("session").is_authenticated);

    state.shutdown().await;
}

#[tokio::test]
async fn similarity_over_http() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind a local port");
        return;
    };
    let client = AuthClient::new(format!("http://{addr}")).expect("client");

    let a = "0x000000000000000000000000000000000000000a";
    let b = "0x000000000000000000000000000000000000000b";
    let c = "0x000000000000000000000000000000000000000c";
    for (address, embedding) in [
        (a, vec![1.0, 0.0, 0.0]),
        (b, vec![0.8, 0.6, 0.0]),
        (c, vec![0.0, 0.6, 0.8]),
    ] {
        let upserted = client.upsert_identity(address, embedding).await;
        assert!(upserted.success, "upsert failed: {:?}", upserted.error);
    }

    let results = client
        .find_similar(vec![1.0, 0.0, 0.0], Some(5), Some(1.5))
        .await
        .data
        .expect("results");
    let addresses: Vec<&str> = results.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(addresses, [a, b, c]);
    assert!(results[0].distance.abs() < 1e-6);
    assert!((results[1].distance - 0.2).abs() < 1e-6);

    let strict = client
        .find_similar(vec![1.0, 0.0, 0.0], None, Some(0.5))
        .await
        .data
        .expect("results");
    assert_eq!(strict.len(), 2);

    let too_many = client.find_similar(vec![1.0, 0.0, 0.0], Some(6), None).await;
    assert_eq!(
        too_many.error.as_deref(),
        Some("limit must be an integer between 1 and 5")
    );

    state.shutdown().await;
}
