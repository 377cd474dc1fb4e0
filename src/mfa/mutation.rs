//! Listing, renaming and deleting enrolled factors.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{
    audit::{AuditAction, AuditSink},
    elevation::{Continuation, GateDecision, HighSecuritySessionGate, StepUpChallenge},
    provider::ProviderCatalog,
    store::{refresh_mfa_enrollment, FactorStore},
    AccountId, FactorConfig, FactorError, FactorId, FactorResult, FactorSummary, FieldErrors,
    Principal,
};

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    ChallengeRequired { challenge: StepUpChallenge },
    ConfirmationRequired { factor: FactorSummary },
}

pub struct FactorMutationService {
    factors: Arc<dyn FactorStore>,
    catalog: Arc<dyn ProviderCatalog>,
    gate: Arc<HighSecuritySessionGate>,
    audit: Arc<dyn AuditSink>,
}

impl FactorMutationService {
    #[must_use]
    pub fn new(
        factors: Arc<dyn FactorStore>,
        catalog: Arc<dyn ProviderCatalog>,
        gate: Arc<HighSecuritySessionGate>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            factors,
            catalog,
            gate,
            audit,
        }
    }

    /// Public summary of `config`, with the provider name when still known.
    #[must_use]
    pub fn summarize(&self, config: &FactorConfig) -> FactorSummary {
        let provider = self.catalog.get(&config.provider_id);
        FactorSummary::new(config, provider.as_ref().map(|p| p.display_name()))
    }

    /// The account's factors, newest first.
    ///
    /// # Errors
    /// Returns `Internal` if the factor store fails.
    pub async fn list(&self, account: AccountId) -> FactorResult<Vec<FactorSummary>> {
        let factors = self.factors.list_factors(account).await?;
        Ok(factors.iter().map(|config| self.summarize(config)).collect())
    }

    /// Rename a factor owned by `account`. Not gated.
    ///
    /// # Errors
    /// `NotFound` when the factor does not exist or belongs to someone else,
    /// `Validation` when the trimmed name is empty.
    pub async fn rename(
        &self,
        account: AccountId,
        factor_id: FactorId,
        new_name: &str,
    ) -> FactorResult<FactorConfig> {
        let Some(mut config) = self.factors.load_factor(account, factor_id).await? else {
            return Err(FactorError::NotFound);
        };
        let name = new_name.trim();
        if name.is_empty() {
            return Err(FactorError::Validation(FieldErrors::single(
                "name", "Required",
            )));
        }
        config.name = name.to_string();
        self.factors.save(&config).await?;
        refresh_mfa_enrollment(self.factors.as_ref(), account).await?;
        info!(user_id = %account, %factor_id, "Renamed factor");
        Ok(config)
    }

    /// Delete a factor after the gate and an explicit confirmation.
    ///
    /// Other sessions are left alone; only enrollment terminates them.
    ///
    /// # Errors
    /// `NotFound` when the factor does not exist or belongs to someone else.
    pub async fn delete(
        &self,
        principal: &Principal,
        factor_id: FactorId,
        confirmed: bool,
    ) -> FactorResult<DeleteOutcome> {
        let decision = self
            .gate
            .require_elevated(principal, Continuation::DeleteFactor(factor_id))
            .await?;
        if let GateDecision::ChallengeRequired(challenge) = decision {
            return Ok(DeleteOutcome::ChallengeRequired { challenge });
        }

        let account = principal.account_id;
        let Some(config) = self.factors.load_factor(account, factor_id).await? else {
            return Err(FactorError::NotFound);
        };
        if !confirmed {
            return Ok(DeleteOutcome::ConfirmationRequired {
                factor: self.summarize(&config),
            });
        }

        self.factors.delete(&config).await?;
        self.audit.record(account, AuditAction::FactorRemoved).await?;
        let enrolled = refresh_mfa_enrollment(self.factors.as_ref(), account).await?;
        info!(user_id = %account, %factor_id, enrolled, "Deleted factor");
        Ok(DeleteOutcome::Deleted)
    }
}
