//! Resumable factor enrollment.
//!
//! One enrollment spans several requests: select a provider, pass the
//! high-security gate, confirm intent, fill the provider's form, commit.
//! Progress lives in an [`EnrollmentState`] keyed by a short-lived workflow
//! token. The token is bound to the account and to the session that started
//! it, so a token handed to a victim from another session starts over.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    audit::{AuditAction, AuditSink},
    elevation::{Continuation, GateDecision, HighSecuritySessionGate, StepUpChallenge},
    provider::{provider_options, CreateOutcome, FactorProvider, ProviderCatalog, ProviderOption},
    rate_limit::{ensure_allowed, RateLimitAction, RateLimiter},
    sessions::SessionInvalidator,
    store::{load_account, refresh_mfa_enrollment, FactorStore},
    sync_token::SyncTokenStore,
    Account, AccountId, EnrollmentForm, FactorConfig, FactorError, FactorInput, FactorResult,
    FactorSummary, Principal, ProviderId,
};

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct EnrollmentRequest {
    #[serde(default)]
    pub workflow_token: Option<Uuid>,
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub input: Option<FactorInput>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum EnrollmentOutcome {
    SelectProvider {
        options: Vec<ProviderOption>,
    },
    ChallengeRequired {
        workflow_token: Uuid,
        challenge: StepUpChallenge,
    },
    ConfirmationRequired {
        workflow_token: Uuid,
        provider: ProviderOption,
        description: String,
        button_text: String,
    },
    InputRequired {
        workflow_token: Uuid,
        provider_id: ProviderId,
        form: EnrollmentForm,
    },
    Enrolled {
        factor: FactorSummary,
    },
}

#[derive(Clone, Debug)]
struct EnrollmentState {
    account_id: AccountId,
    session_hash: Vec<u8>,
    provider_id: ProviderId,
    confirmed: bool,
    pending_challenge: Option<Uuid>,
    touched_at: Instant,
}

impl EnrollmentState {
    fn new(account_id: AccountId, session_hash: Vec<u8>, provider_id: ProviderId) -> Self {
        Self {
            account_id,
            session_hash,
            provider_id,
            confirmed: false,
            pending_challenge: None,
            touched_at: Instant::now(),
        }
    }
}

/// In-flight enrollments, expiring `ttl` after their last step.
struct WorkflowStore {
    ttl: Duration,
    states: Mutex<HashMap<Uuid, EnrollmentState>>,
}

impl WorkflowStore {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    async fn load(
        &self,
        token: Uuid,
        account_id: AccountId,
        session_hash: &[u8],
    ) -> Option<EnrollmentState> {
        let mut states = self.states.lock().await;
        states.retain(|_, state| state.touched_at.elapsed() < self.ttl);
        states
            .get(&token)
            .filter(|state| state.account_id == account_id && state.session_hash == session_hash)
            .cloned()
    }

    async fn save(&self, token: Uuid, mut state: EnrollmentState) {
        state.touched_at = Instant::now();
        self.states.lock().await.insert(token, state);
    }

    async fn discard(&self, token: Uuid) {
        self.states.lock().await.remove(&token);
    }
}

pub struct EnrollmentWorkflow {
    catalog: Arc<dyn ProviderCatalog>,
    factors: Arc<dyn FactorStore>,
    rate_limiter: Arc<dyn RateLimiter>,
    gate: Arc<HighSecuritySessionGate>,
    invalidator: SessionInvalidator,
    sync_tokens: Arc<SyncTokenStore>,
    audit: Arc<dyn AuditSink>,
    states: WorkflowStore,
}

impl EnrollmentWorkflow {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn ProviderCatalog>,
        factors: Arc<dyn FactorStore>,
        rate_limiter: Arc<dyn RateLimiter>,
        gate: Arc<HighSecuritySessionGate>,
        invalidator: SessionInvalidator,
        sync_tokens: Arc<SyncTokenStore>,
        audit: Arc<dyn AuditSink>,
        workflow_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            factors,
            rate_limiter,
            gate,
            invalidator,
            sync_tokens,
            audit,
            states: WorkflowStore::new(workflow_ttl),
        }
    }

    /// The provider selection menu for the caller.
    ///
    /// # Errors
    /// `NoProviders` when nothing is active, `Internal` on collaborator failure.
    pub async fn provider_menu(&self, principal: &Principal) -> FactorResult<Vec<ProviderOption>> {
        let account = load_account(self.factors.as_ref(), principal).await?;
        let providers = self.catalog.list_active(&account);
        if providers.is_empty() {
            return Err(FactorError::NoProviders);
        }
        Ok(provider_options(&providers, &account).await?)
    }

    /// Advance the caller's enrollment by one step.
    ///
    /// # Errors
    /// `NoProviders`, `ProviderRejected`, `RateLimited`, `Validation` or
    /// `Internal`; see [`FactorError`].
    pub async fn begin_or_resume(
        &self,
        principal: &Principal,
        request: EnrollmentRequest,
    ) -> FactorResult<EnrollmentOutcome> {
        let account = load_account(self.factors.as_ref(), principal).await?;
        let providers = self.catalog.list_active(&account);
        if providers.is_empty() {
            warn!(user_id = %account.id, "Enrollment requested with no active providers");
            return Err(FactorError::NoProviders);
        }

        let session_hash = principal.session_token.hash();
        let mut carried = match request.workflow_token {
            Some(token) => self
                .states
                .load(token, account.id, &session_hash)
                .await
                .map(|state| (token, state)),
            None => None,
        };

        if let Some((token, state)) = &carried {
            if let Some(challenge_id) = state.pending_challenge {
                let abandoned = !self.gate.challenge_pending(challenge_id).await
                    && !self.gate.is_elevated(principal).await?;
                if abandoned {
                    info!(user_id = %account.id, "Step-up abandoned, restarting enrollment");
                    self.states.discard(*token).await;
                    return self.select_provider(&providers, &account).await;
                }
            }
        }

        let (provider_id, from_state) = match (request.provider_id, &carried) {
            (Some(id), Some((_, state))) if id == state.provider_id => (id, true),
            (Some(id), _) => (id, false),
            (None, Some((_, state))) => (state.provider_id.clone(), true),
            (None, None) => return self.select_provider(&providers, &account).await,
        };

        let Some(provider) = self
            .usable_provider(&providers, &provider_id, &account)
            .await?
        else {
            if from_state {
                if let Some((token, _)) = carried.take() {
                    self.states.discard(token).await;
                }
                warn!(user_id = %account.id, %provider_id, "Carried provider is no longer usable");
                return Err(FactorError::ProviderRejected { provider_id });
            }
            return self.select_provider(&providers, &account).await;
        };

        let (token, mut state) = match carried {
            Some((token, state)) if from_state => (token, state),
            Some((token, _)) => (
                token,
                EnrollmentState::new(account.id, session_hash, provider_id),
            ),
            None => (
                Uuid::new_v4(),
                EnrollmentState::new(account.id, session_hash, provider_id),
            ),
        };

        match self
            .gate
            .require_elevated(principal, Continuation::Enrollment(token))
            .await?
        {
            GateDecision::ChallengeRequired(challenge) => {
                state.pending_challenge = Some(challenge.challenge_id);
                self.states.save(token, state).await;
                return Ok(EnrollmentOutcome::ChallengeRequired {
                    workflow_token: token,
                    challenge,
                });
            }
            GateDecision::Elevated(_) => state.pending_challenge = None,
        }

        if request.confirmed {
            state.confirmed = true;
        }
        if !state.confirmed {
            self.states.save(token, state).await;
            return Ok(EnrollmentOutcome::ConfirmationRequired {
                workflow_token: token,
                provider: ProviderOption::new(provider.as_ref(), &account, true),
                description: provider.enroll_description(&account),
                button_text: provider.enroll_button_text(),
            });
        }

        let Some(input) = request.input else {
            let probe = self
                .rate_limiter
                .will_take_action(account.id, RateLimitAction::NewFactor, 0)
                .await?;
            if let Err(err) = ensure_allowed(probe, RateLimitAction::NewFactor) {
                self.states.discard(token).await;
                return Err(err);
            }
            let form = provider.enrollment_form(&account).await?;
            self.states.save(token, state).await;
            return Ok(EnrollmentOutcome::InputRequired {
                workflow_token: token,
                provider_id: provider.id().clone(),
                form,
            });
        };

        let consume = self
            .rate_limiter
            .will_take_action(account.id, RateLimitAction::NewFactor, 1)
            .await?;
        if let Err(err) = ensure_allowed(consume, RateLimitAction::NewFactor) {
            warn!(user_id = %account.id, "Factor enrollment rate limited");
            self.states.discard(token).await;
            return Err(err);
        }

        let draft = match provider.create_configuration(&account, &input).await? {
            CreateOutcome::Created(draft) => draft,
            CreateOutcome::Rejected(errors) => {
                self.states.save(token, state).await;
                return Err(FactorError::Validation(errors));
            }
        };

        let config = draft.into_config(account.id, provider.id().clone());
        self.factors.insert(&config).await?;
        self.states.discard(token).await;
        self.after_commit(&config).await;

        let terminated = self
            .invalidator
            .terminate_others(account.id, &principal.session_token)
            .await?;
        info!(
            user_id = %account.id,
            factor_id = %config.id,
            provider_id = %config.provider_id,
            terminated,
            "Enrolled new factor"
        );
        Ok(EnrollmentOutcome::Enrolled {
            factor: FactorSummary::new(&config, Some(provider.display_name())),
        })
    }

    async fn select_provider(
        &self,
        providers: &[Arc<dyn FactorProvider>],
        account: &Account,
    ) -> FactorResult<EnrollmentOutcome> {
        Ok(EnrollmentOutcome::SelectProvider {
            options: provider_options(providers, account).await?,
        })
    }

    async fn usable_provider(
        &self,
        providers: &[Arc<dyn FactorProvider>],
        provider_id: &ProviderId,
        account: &Account,
    ) -> Result<Option<Arc<dyn FactorProvider>>> {
        let Some(provider) = providers.iter().find(|p| p.id() == provider_id) else {
            return Ok(None);
        };
        if provider.can_create_new_configuration(account).await? {
            Ok(Some(provider.clone()))
        } else {
            Ok(None)
        }
    }

    /// Bookkeeping for a stored factor. Failures are logged and skipped so
    /// that other sessions are always terminated once the factor exists.
    async fn after_commit(&self, config: &FactorConfig) {
        let account = config.account_id;
        if let Err(err) = self
            .rate_limiter
            .will_take_action(account, RateLimitAction::NewFactor, -1)
            .await
        {
            error!(user_id = %account, "Failed to refund enrollment attempt: {err:#}");
        }
        if let Some(sync_token) = config.sync_token {
            self.sync_tokens.revoke(sync_token).await;
        }
        if let Err(err) = self.audit.record(account, AuditAction::FactorAdded).await {
            error!(user_id = %account, factor_id = %config.id, "Failed to audit new factor: {err:#}");
        }
        if let Err(err) = refresh_mfa_enrollment(self.factors.as_ref(), account).await {
            error!(user_id = %account, "Failed to refresh MFA enrollment flag: {err:#}");
        }
    }
}
