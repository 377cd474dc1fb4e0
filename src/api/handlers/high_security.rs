//! Entering and leaving high-security mode.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use tracing::error;

use super::{
    factor_error_response,
    principal::require_auth,
    types::{CompleteChallengeRequest, ErrorResponse},
};
use crate::mfa::{elevation::Elevation, FactorsState};

#[utoipa::path(
    post,
    path = "/v1/me/high-security",
    request_body = CompleteChallengeRequest,
    responses(
        (status = 200, description = "Session elevated; resume with the continuation", body = Elevation),
        (status = 400, description = "Proof rejected", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 410, description = "Challenge expired or unknown", body = ErrorResponse),
        (status = 429, description = "Too many step-up attempts", body = ErrorResponse)
    ),
    tag = "high-security"
)]
pub async fn enter(
    headers: HeaderMap,
    state: Extension<FactorsState>,
    Json(request): Json<CompleteChallengeRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, state.sessions.as_ref()).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    match state
        .gate
        .complete_challenge(&principal, request.challenge_id, &request.proof)
        .await
    {
        Ok(elevation) => (StatusCode::OK, Json(elevation)).into_response(),
        Err(err) => factor_error_response(err, principal.account_id),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/me/high-security",
    responses(
        (status = 204, description = "Session left high security"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "high-security"
)]
pub async fn leave(headers: HeaderMap, state: Extension<FactorsState>) -> impl IntoResponse {
    let principal = match require_auth(&headers, state.sessions.as_ref()).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    match state.gate.downgrade(&principal).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!(user_id = %principal.account_id, "Failed to leave high security: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
