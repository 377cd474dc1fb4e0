//! Request and response bodies for the factor endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::mfa::{
    elevation::StepUpProof, provider::ProviderOption, FactorSummary, FieldErrors,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenameFactorRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeleteFactorRequest {
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompleteChallengeRequest {
    pub challenge_id: Uuid,
    pub proof: StepUpProof,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FactorListResponse {
    pub factors: Vec<FactorSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderListResponse {
    pub providers: Vec<ProviderOption>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            fields: None,
        }
    }

    #[must_use]
    pub fn with_fields(mut self, fields: FieldErrors) -> Self {
        self.fields = Some(fields);
        self
    }
}
