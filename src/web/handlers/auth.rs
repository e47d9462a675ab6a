//! Sign-in API handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use super::{ApiError, ApiJson, ApiResult, request_host, request_origin};
use crate::auth::MessageRequest;
use crate::metrics::EventContext;
use crate::session::Session;
use crate::web::ratelimit::ClientIp;
use crate::web::server::AppState;
use crate::web::types::*;

pub async fn message_handler(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    ApiJson(body): ApiJson<MessageRequestBody>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.message_rate_limiter.check(ip) {
        state.metrics.record_event(EventContext::RateLimited);
        warn!(%ip, "Sign-in message rate limit reached");
        return Err(ApiError::rate_limited());
    }

    let message = state
        .verifier
        .issue_message(
            MessageRequest {
                address: body.address.unwrap_or_default(),
                chain_id: body.chain_id,
            },
            request_host(&headers),
            request_origin(&headers),
        )
        .await?;

    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<VerifyRequest>,
) -> ApiResult<Response> {
    let outcome = state
        .verifier
        .verify(&body.message, &body.signature, request_host(&headers))
        .await?;
    let Ok(identity) = outcome else {
        return Err(ApiError::verification_failed());
    };

    let session = Session::authenticated(identity.address, identity.chain_id, Some(identity.nonce));
    let cookie = state.sessions.save_session(&session)?;
    info!(address = %session.address, chain_id = session.chain_id, "Wallet signed in");

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(VerifyResponse {
            success: true,
            session: Some(SessionInfo::from(&session)),
            error: None,
        }),
    )
        .into_response())
}

pub async fn session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<SessionInfo> {
    let session = state.sessions.get_session(&headers);
    Json(SessionInfo::from(&session))
}

pub async fn signout_handler(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let cookie = state.sessions.destroy_session()?;
    state.metrics.record_event(EventContext::SignOut);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SuccessResponse { success: true }),
    )
        .into_response())
}
