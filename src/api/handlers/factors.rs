//! Factor listing, enrollment, renaming and deletion for the current user.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use tracing::info;
use uuid::Uuid;

use super::{
    factor_error_response,
    principal::require_auth,
    request_id,
    types::{
        DeleteFactorRequest, ErrorResponse, FactorListResponse, ProviderListResponse,
        RenameFactorRequest,
    },
};
use crate::mfa::{
    mutation::DeleteOutcome,
    workflow::{EnrollmentOutcome, EnrollmentRequest},
    FactorId, FactorSummary, FactorsState,
};

#[utoipa::path(
    get,
    path = "/v1/me/factors",
    responses(
        (status = 200, description = "Enrolled factors, newest first", body = FactorListResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "factors"
)]
pub async fn list_factors(
    headers: HeaderMap,
    state: Extension<FactorsState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, state.sessions.as_ref()).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    match state.mutation.list(principal.account_id).await {
        Ok(factors) => (StatusCode::OK, Json(FactorListResponse { factors })).into_response(),
        Err(err) => factor_error_response(err, principal.account_id),
    }
}

#[utoipa::path(
    get,
    path = "/v1/me/factors/providers",
    responses(
        (status = 200, description = "Providers in display order", body = ProviderListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "No active providers", body = ErrorResponse)
    ),
    tag = "factors"
)]
pub async fn list_providers(
    headers: HeaderMap,
    state: Extension<FactorsState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, state.sessions.as_ref()).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    match state.workflow.provider_menu(&principal).await {
        Ok(providers) => {
            (StatusCode::OK, Json(ProviderListResponse { providers })).into_response()
        }
        Err(err) => factor_error_response(err, principal.account_id),
    }
}

#[utoipa::path(
    post,
    path = "/v1/me/factors/enroll",
    request_body = EnrollmentRequest,
    responses(
        (status = 200, description = "Next enrollment step or the enrolled factor", body = EnrollmentOutcome),
        (status = 400, description = "Provider rejected the submitted values", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Step-up required", body = EnrollmentOutcome),
        (status = 409, description = "Selected provider can no longer be used", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 503, description = "No active providers", body = ErrorResponse)
    ),
    tag = "factors"
)]
/// Advance the caller's enrollment by one step.
///
/// Re-submit `workflow_token` from the previous response to resume.
pub async fn enroll(
    headers: HeaderMap,
    state: Extension<FactorsState>,
    Json(request): Json<EnrollmentRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, state.sessions.as_ref()).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    let request_id = request_id(&headers);

    match state.workflow.begin_or_resume(&principal, request).await {
        Ok(outcome @ EnrollmentOutcome::ChallengeRequired { .. }) => {
            info!(
                user_id = %principal.account_id,
                request_id = %request_id,
                "factor enrollment needs step-up"
            );
            (StatusCode::FORBIDDEN, Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => factor_error_response(err, principal.account_id),
    }
}

#[utoipa::path(
    patch,
    path = "/v1/me/factors/{factor_id}",
    params(("factor_id" = Uuid, Path, description = "Factor id")),
    request_body = RenameFactorRequest,
    responses(
        (status = 200, description = "Factor renamed", body = FactorSummary),
        (status = 400, description = "Invalid name", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "factors"
)]
pub async fn rename_factor(
    headers: HeaderMap,
    state: Extension<FactorsState>,
    Path(factor_id): Path<Uuid>,
    Json(request): Json<RenameFactorRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, state.sessions.as_ref()).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    match state
        .mutation
        .rename(principal.account_id, FactorId(factor_id), &request.name)
        .await
    {
        Ok(config) => (StatusCode::OK, Json(state.mutation.summarize(&config))).into_response(),
        Err(err) => factor_error_response(err, principal.account_id),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/me/factors/{factor_id}",
    params(("factor_id" = Uuid, Path, description = "Factor id")),
    request_body(content = DeleteFactorRequest, description = "Set `confirmed` to delete"),
    responses(
        (status = 200, description = "Confirmation required", body = DeleteOutcome),
        (status = 204, description = "Factor deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Step-up required", body = DeleteOutcome),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "factors"
)]
pub async fn delete_factor(
    headers: HeaderMap,
    state: Extension<FactorsState>,
    Path(factor_id): Path<Uuid>,
    request: Option<Json<DeleteFactorRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, state.sessions.as_ref()).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    let confirmed = request.is_some_and(|Json(request)| request.confirmed);

    match state
        .mutation
        .delete(&principal, FactorId(factor_id), confirmed)
        .await
    {
        Ok(DeleteOutcome::Deleted) => StatusCode::NO_CONTENT.into_response(),
        Ok(outcome @ DeleteOutcome::ChallengeRequired { .. }) => {
            (StatusCode::FORBIDDEN, Json(outcome)).into_response()
        }
        Ok(outcome @ DeleteOutcome::ConfirmationRequired { .. }) => {
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(err) => factor_error_response(err, principal.account_id),
    }
}
