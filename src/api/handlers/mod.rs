pub mod factors;
pub mod health;
pub mod high_security;
pub mod principal;
pub mod types;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::{error, warn};

use crate::mfa::{AccountId, FactorError};
use types::ErrorResponse;

/// Map a domain error to its HTTP status and JSON body.
pub(crate) fn factor_error_response(err: FactorError, user_id: AccountId) -> Response {
    let message = err.to_string();
    match err {
        FactorError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", message)),
        )
            .into_response(),
        FactorError::Validation(fields) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("validation", message).with_fields(fields)),
        )
            .into_response(),
        FactorError::RateLimited { .. } => {
            warn!(user_id = %user_id, "Request rate limited");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::new("rate_limited", message)),
            )
                .into_response()
        }
        FactorError::NoProviders => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("no_providers", message)),
        )
            .into_response(),
        FactorError::ProviderRejected { .. } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("provider_rejected", message)),
        )
            .into_response(),
        FactorError::ChallengeAbandoned => (
            StatusCode::GONE,
            Json(ErrorResponse::new("challenge_abandoned", message)),
        )
            .into_response(),
        FactorError::Internal(err) => {
            error!(user_id = %user_id, "Factor operation failed: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
        .to_string()
}
