//! Identity similarity and trust event handlers.

use std::sync::Arc;

use axum::{Json, extract::State};

use super::{ApiJson, ApiResult};
use crate::vector::{SimilarityQuery, TrustEventInput};
use crate::web::server::AppState;
use crate::web::types::*;

pub async fn similarity_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<SimilarityRequest>,
) -> ApiResult<Json<SimilarityResponse>> {
    let matches = state
        .similarity
        .find_similar_identities(SimilarityQuery {
            embedding: body.embedding,
            limit: body.limit,
            threshold: body.threshold,
        })
        .await?;
    Ok(Json(SimilarityResponse {
        results: matches.into_iter().map(SimilarityResult::from).collect(),
    }))
}

pub async fn identity_upsert_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<IdentityUpsertRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    state
        .similarity
        .upsert_identity_embedding(&body.address, &body.embedding)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn trust_event_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<TrustEventRequest>,
) -> ApiResult<Json<TrustEventResponse>> {
    let event = state
        .similarity
        .record_trust_event(TrustEventInput {
            from_address: body.from_address,
            to_address: body.to_address,
            trust_score: body.trust_score,
            event_type: body.event_type,
            embedding: body.embedding,
        })
        .await?;
    Ok(Json(TrustEventResponse {
        id: event.id,
        created_at: event.created_at,
    }))
}
