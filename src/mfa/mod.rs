//! MFA factor lifecycle: enrollment, renaming and removal.
//!
//! Flow Overview:
//! 1) The caller picks a provider from the [`provider::ProviderCatalog`].
//! 2) The [`elevation::HighSecuritySessionGate`] demands a step-up unless the
//!    session is already elevated.
//! 3) The caller confirms intent, then fills the provider's form; every
//!    creation attempt is charged against the [`rate_limit::RateLimiter`].
//! 4) On success the factor is stored, the attempt refunded, the change
//!    audited and every other session of the account terminated.
//!
//! Security boundary:
//! - Enrollment state is bound to the session that started it.
//! - Deletion passes the same gate; renaming does not.
//! - Storage, audit and rate limiting are injected so every seam can be faked.

pub mod audit;
pub mod elevation;
pub mod error;
pub mod memory;
pub mod mutation;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod sessions;
pub mod storage;
pub mod store;
pub mod sync_token;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

use std::{sync::Arc, time::Duration};

pub use error::{FactorError, FactorResult};
pub use provider::StaticProviderCatalog;
pub use sync_token::SyncTokenStore;
pub use types::{
    hash_session_token, Account, AccountId, EnrollmentForm, FactorConfig, FactorId, FactorInput,
    FactorSummary, FieldErrors, FormField, Principal, ProviderId, SessionRecord, SessionToken,
    SyncToken,
};

use audit::AuditSink;
use elevation::{FactorStepUpVerifier, HighSecuritySessionGate, StepUpVerifier};
use mutation::FactorMutationService;
use provider::ProviderCatalog;
use rate_limit::{RateLimitPolicies, RateLimitPolicy, RateLimiter};
use sessions::{SessionInvalidator, SessionStore};
use store::FactorStore;
use workflow::EnrollmentWorkflow;

const DEFAULT_ELEVATION_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_WORKFLOW_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_SYNC_TOKEN_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_NEW_FACTOR_LIMIT: i64 = 10;
const DEFAULT_NEW_FACTOR_WINDOW_SECONDS: u64 = 60 * 60;
const DEFAULT_TRY_FACTOR_LIMIT: i64 = 10;
const DEFAULT_TRY_FACTOR_WINDOW_SECONDS: u64 = 60 * 60;
const DEFAULT_TOTP_ISSUER: &str = "factorgate";

#[derive(Clone, Debug)]
pub struct FactorsConfig {
    elevation_ttl_seconds: u64,
    challenge_ttl_seconds: u64,
    workflow_ttl_seconds: u64,
    sync_token_ttl_seconds: u64,
    new_factor_limit: i64,
    new_factor_window_seconds: u64,
    try_factor_limit: i64,
    try_factor_window_seconds: u64,
    totp_issuer: String,
}

impl Default for FactorsConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FactorsConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            elevation_ttl_seconds: DEFAULT_ELEVATION_TTL_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            workflow_ttl_seconds: DEFAULT_WORKFLOW_TTL_SECONDS,
            sync_token_ttl_seconds: DEFAULT_SYNC_TOKEN_TTL_SECONDS,
            new_factor_limit: DEFAULT_NEW_FACTOR_LIMIT,
            new_factor_window_seconds: DEFAULT_NEW_FACTOR_WINDOW_SECONDS,
            try_factor_limit: DEFAULT_TRY_FACTOR_LIMIT,
            try_factor_window_seconds: DEFAULT_TRY_FACTOR_WINDOW_SECONDS,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_elevation_ttl_seconds(mut self, seconds: u64) -> Self {
        self.elevation_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: u64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_workflow_ttl_seconds(mut self, seconds: u64) -> Self {
        self.workflow_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_sync_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.sync_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_new_factor_limit(mut self, limit: i64) -> Self {
        self.new_factor_limit = limit;
        self
    }

    #[must_use]
    pub fn with_new_factor_window_seconds(mut self, seconds: u64) -> Self {
        self.new_factor_window_seconds = seconds;
        self
    }

    /// Step-up proofs allowed per account and window.
    #[must_use]
    pub fn with_try_factor_limit(mut self, limit: i64) -> Self {
        self.try_factor_limit = limit;
        self
    }

    #[must_use]
    pub fn with_try_factor_window_seconds(mut self, seconds: u64) -> Self {
        self.try_factor_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn elevation_ttl(&self) -> Duration {
        Duration::from_secs(self.elevation_ttl_seconds)
    }

    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_seconds)
    }

    #[must_use]
    pub fn workflow_ttl(&self) -> Duration {
        Duration::from_secs(self.workflow_ttl_seconds)
    }

    #[must_use]
    pub fn sync_token_ttl(&self) -> Duration {
        Duration::from_secs(self.sync_token_ttl_seconds)
    }

    #[must_use]
    pub fn new_factor_limit(&self) -> i64 {
        self.new_factor_limit
    }

    #[must_use]
    pub fn new_factor_window(&self) -> Duration {
        Duration::from_secs(self.new_factor_window_seconds)
    }

    #[must_use]
    pub fn try_factor_limit(&self) -> i64 {
        self.try_factor_limit
    }

    #[must_use]
    pub fn try_factor_window(&self) -> Duration {
        Duration::from_secs(self.try_factor_window_seconds)
    }

    #[must_use]
    pub fn rate_limit_policies(&self) -> RateLimitPolicies {
        RateLimitPolicies::new(
            RateLimitPolicy::new(self.new_factor_limit, self.new_factor_window()),
            RateLimitPolicy::new(self.try_factor_limit, self.try_factor_window()),
        )
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }
}

/// External collaborators the factor services are built from.
#[derive(Clone)]
pub struct Collaborators {
    pub factors: Arc<dyn FactorStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<dyn AuditSink>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub catalog: Arc<dyn ProviderCatalog>,
    pub sync_tokens: Arc<SyncTokenStore>,
}

/// The wired services shared by the HTTP handlers.
#[derive(Clone)]
pub struct FactorsState {
    pub gate: Arc<HighSecuritySessionGate>,
    pub workflow: Arc<EnrollmentWorkflow>,
    pub mutation: Arc<FactorMutationService>,
    pub invalidator: SessionInvalidator,
    pub sessions: Arc<dyn SessionStore>,
}

impl FactorsState {
    /// Wire the services with the default step-up verifier.
    #[must_use]
    pub fn new(config: &FactorsConfig, collaborators: Collaborators) -> Self {
        let verifier = Arc::new(FactorStepUpVerifier::new(collaborators.catalog.clone()));
        Self::with_verifier(config, collaborators, verifier)
    }

    #[must_use]
    pub fn with_verifier(
        config: &FactorsConfig,
        collaborators: Collaborators,
        verifier: Arc<dyn StepUpVerifier>,
    ) -> Self {
        let Collaborators {
            factors,
            sessions,
            audit,
            rate_limiter,
            catalog,
            sync_tokens,
        } = collaborators;

        let gate = Arc::new(HighSecuritySessionGate::new(
            sessions.clone(),
            factors.clone(),
            verifier,
            audit.clone(),
            rate_limiter.clone(),
            config.elevation_ttl(),
            config.challenge_ttl(),
        ));
        let invalidator = SessionInvalidator::new(sessions.clone());
        let workflow = Arc::new(EnrollmentWorkflow::new(
            catalog.clone(),
            factors.clone(),
            rate_limiter,
            gate.clone(),
            invalidator.clone(),
            sync_tokens,
            audit.clone(),
            config.workflow_ttl(),
        ));
        let mutation = Arc::new(FactorMutationService::new(
            factors,
            catalog,
            gate.clone(),
            audit,
        ));
        Self {
            gate,
            workflow,
            mutation,
            invalidator,
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::rate_limit::RateLimitAction;

    #[test]
    fn config_defaults() {
        let config = FactorsConfig::new();
        assert_eq!(config.elevation_ttl(), Duration::from_secs(900));
        assert_eq!(config.challenge_ttl(), Duration::from_secs(300));
        assert_eq!(config.workflow_ttl(), Duration::from_secs(600));
        assert_eq!(config.sync_token_ttl(), Duration::from_secs(3600));
        assert_eq!(config.new_factor_limit(), 10);
        assert_eq!(config.new_factor_window(), Duration::from_secs(3600));
        assert_eq!(config.try_factor_limit(), 10);
        assert_eq!(config.try_factor_window(), Duration::from_secs(3600));
        assert_eq!(config.totp_issuer(), "factorgate");
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = FactorsConfig::new()
            .with_elevation_ttl_seconds(60)
            .with_challenge_ttl_seconds(30)
            .with_workflow_ttl_seconds(120)
            .with_sync_token_ttl_seconds(90)
            .with_new_factor_limit(3)
            .with_new_factor_window_seconds(600)
            .with_try_factor_limit(4)
            .with_try_factor_window_seconds(120)
            .with_totp_issuer("acme".to_string());
        assert_eq!(config.elevation_ttl(), Duration::from_secs(60));
        assert_eq!(config.challenge_ttl(), Duration::from_secs(30));
        assert_eq!(config.workflow_ttl(), Duration::from_secs(120));
        assert_eq!(config.sync_token_ttl(), Duration::from_secs(90));
        let policies = config.rate_limit_policies();
        assert_eq!(policies.for_action(RateLimitAction::NewFactor).limit(), 3);
        assert_eq!(
            policies.for_action(RateLimitAction::NewFactor).window(),
            Duration::from_secs(600)
        );
        assert_eq!(policies.for_action(RateLimitAction::TryFactor).limit(), 4);
        assert_eq!(
            policies.for_action(RateLimitAction::TryFactor).window(),
            Duration::from_secs(120)
        );
        assert_eq!(config.totp_issuer(), "acme");
    }
}
