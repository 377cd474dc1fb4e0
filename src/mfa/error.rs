//! Error taxonomy for factor workflows.
//!
//! Each variant maps to one HTTP status in the API layer; `Internal` carries
//! storage and provider failures that should never be shown to clients.

use super::{rate_limit::RateLimitAction, types::FieldErrors, ProviderId};

#[derive(Debug, thiserror::Error)]
pub enum FactorError {
    #[error("factor not found")]
    NotFound,

    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    #[error("too many {action} attempts, try again later")]
    RateLimited { action: RateLimitAction },

    #[error("no MFA providers are available")]
    NoProviders,

    #[error("provider {provider_id} can no longer create factors for this account")]
    ProviderRejected { provider_id: ProviderId },

    #[error("step-up challenge expired or was abandoned")]
    ChallengeAbandoned,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type FactorResult<T> = Result<T, FactorError>;
