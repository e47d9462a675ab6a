//! Axum HTTP server for walletgate.
//!
//! Routes: sign-in (message, verify, session, signout), identity similarity,
//! trust events, health and Prometheus metrics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method, header},
    response::IntoResponse,
    routing::{get, post},
};
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::SiweVerifier;
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::session::SessionManager;
use crate::vector::SimilarityService;
use crate::web::handlers::ApiResult;
use crate::web::handlers::auth::*;
use crate::web::handlers::similarity::*;
use crate::web::ratelimit::MessageRateLimiter;
use crate::web::types::HealthResponse;

/// How often idle rate limit buckets are dropped.
const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(60);

/// Shared state for all handlers.
pub struct AppState {
    pub verifier: SiweVerifier,
    pub sessions: SessionManager,
    pub similarity: SimilarityService,
    pub metrics: Metrics,
    pub message_rate_limiter: MessageRateLimiter,
    /// Signals the spawned server to stop.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl AppState {
    pub fn new(
        verifier: SiweVerifier,
        sessions: SessionManager,
        similarity: SimilarityService,
        metrics: Metrics,
        message_rate_limit: u64,
    ) -> Self {
        Self {
            verifier,
            sessions,
            similarity,
            metrics,
            message_rate_limiter: MessageRateLimiter::new(message_rate_limit),
            shutdown_tx: tokio::sync::RwLock::new(None),
        }
    }

    /// Stop the server started by [`start_server`]. No-op if none is running.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

/// All routes with body limit and request tracing. CORS is added by
/// [`start_server`] once the bound address is known.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/auth/message", post(message_handler))
        .route("/api/auth/verify", post(verify_handler))
        .route("/api/auth/session", get(session_handler))
        .route("/api/auth/signout", post(signout_handler))
        .route("/api/similarity", post(similarity_handler))
        .route("/api/identities", post(identity_upsert_handler))
        .route("/api/trust-events", post(trust_event_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Origins allowed to make credentialed requests: the bound address,
/// localhost on the same port and the pinned sign-in domain.
fn allowed_origins(addr: SocketAddr, pinned_domain: Option<&str>) -> Vec<HeaderValue> {
    let mut origins = vec![
        format!("http://{}:{}", addr.ip(), addr.port()),
        format!("http://localhost:{}", addr.port()),
    ];
    if let Some(domain) = pinned_domain {
        origins.push(format!("https://{domain}"));
    }
    origins.iter().filter_map(|o| o.parse().ok()).collect()
}

/// Bind `addr`, spawn the server and return the bound address.
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<AppState>,
) -> Result<SocketAddr, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    let bound_addr = listener.local_addr().map_err(|e| ServerError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    tracing::info!("walletgate listening on http://{}", bound_addr);

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(bound_addr, state.verifier.pinned_domain()))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::list([header::CONTENT_TYPE]))
        .allow_credentials(true);
    let app = router(state.clone()).layer(cors);

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(RATE_LIMIT_SWEEP);
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = sweep.tick() => state.message_rate_limiter.sweep(),
                }
            }
            tracing::info!("walletgate shutting down");
        });
        if let Err(e) = server.await {
            tracing::error!("walletgate server error: {}", e);
        }
    });

    Ok(bound_addr)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "walletgate".to_string(),
        nonce_store: state.verifier.nonce_backend().to_string(),
        vector_backend: state.similarity.backend_name().to_string(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
