//! High-security (step-up) gate for sensitive factor mutations.
//!
//! A session is elevated while its `high_security_until` deadline is in the
//! future. Otherwise the gate issues a challenge bound to the session that
//! triggered it; completing the challenge with a valid proof elevates that
//! session and hands back the continuation so the caller can resume.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    audit::{AuditAction, AuditSink},
    provider::ProviderCatalog,
    rate_limit::{ensure_allowed, RateLimitAction, RateLimiter},
    sessions::SessionStore,
    store::{load_account, FactorStore},
    types::unix_now,
    Account, AccountId, FactorError, FactorId, FactorResult, FieldErrors, Principal,
};

/// The operation a step-up challenge was raised for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Continuation {
    Enrollment(Uuid),
    DeleteFactor(FactorId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct StepUpChallenge {
    pub challenge_id: Uuid,
    pub expires_at_unix: i64,
    pub continuation: Continuation,
}

/// Proof that the session is elevated. Only the gate can mint one.
#[derive(Clone, Copy, Debug)]
pub struct ElevatedToken {
    account_id: AccountId,
    until_unix: i64,
}

impl ElevatedToken {
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }

    #[must_use]
    pub const fn until_unix(&self) -> i64 {
        self.until_unix
    }
}

#[derive(Clone, Debug)]
pub enum GateDecision {
    Elevated(ElevatedToken),
    ChallengeRequired(StepUpChallenge),
}

/// What the user submits to complete a challenge.
#[derive(Clone, Debug, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepUpProof {
    /// Accepted only for accounts without any enrolled factor.
    Acknowledge,
    FactorResponse { factor_id: FactorId, response: String },
}

#[async_trait]
pub trait StepUpVerifier: Send + Sync {
    async fn verify(&self, account: &Account, proof: &StepUpProof) -> Result<bool>;
}

/// Verifies step-up proofs against the account's own factors.
pub struct FactorStepUpVerifier {
    catalog: Arc<dyn ProviderCatalog>,
}

impl FactorStepUpVerifier {
    #[must_use]
    pub fn new(catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl StepUpVerifier for FactorStepUpVerifier {
    async fn verify(&self, account: &Account, proof: &StepUpProof) -> Result<bool> {
        match proof {
            StepUpProof::Acknowledge => Ok(account.factors.is_empty()),
            StepUpProof::FactorResponse {
                factor_id,
                response,
            } => {
                let Some(config) = account.factors.iter().find(|f| f.id == *factor_id) else {
                    return Ok(false);
                };
                let Some(provider) = self.catalog.get(&config.provider_id) else {
                    warn!(
                        user_id = %account.id,
                        provider_id = %config.provider_id,
                        "Step-up factor references an unknown provider"
                    );
                    return Ok(false);
                };
                provider
                    .verify_challenge_response(account, config, response)
                    .await
            }
        }
    }
}

struct PendingChallenge {
    account_id: AccountId,
    session_hash: Vec<u8>,
    continuation: Continuation,
    issued_at: Instant,
}

/// Result of a completed challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Elevation {
    pub continuation: Continuation,
    pub high_security_until_unix: i64,
}

pub struct HighSecuritySessionGate {
    sessions: Arc<dyn SessionStore>,
    factors: Arc<dyn FactorStore>,
    verifier: Arc<dyn StepUpVerifier>,
    audit: Arc<dyn AuditSink>,
    rate_limiter: Arc<dyn RateLimiter>,
    elevation_ttl: Duration,
    challenge_ttl: Duration,
    challenges: Mutex<HashMap<Uuid, PendingChallenge>>,
}

impl HighSecuritySessionGate {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        factors: Arc<dyn FactorStore>,
        verifier: Arc<dyn StepUpVerifier>,
        audit: Arc<dyn AuditSink>,
        rate_limiter: Arc<dyn RateLimiter>,
        elevation_ttl: Duration,
        challenge_ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            factors,
            verifier,
            audit,
            rate_limiter,
            elevation_ttl,
            challenge_ttl,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    async fn elevated_until(&self, principal: &Principal) -> Result<Option<i64>> {
        let session = self.sessions.lookup(&principal.session_token.hash()).await?;
        let now = unix_now();
        Ok(session
            .filter(|record| record.account_id == principal.account_id)
            .filter(|record| record.is_high_security(now))
            .and_then(|record| record.high_security_until_unix))
    }

    /// Whether the caller's session is currently elevated.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn is_elevated(&self, principal: &Principal) -> Result<bool> {
        Ok(self.elevated_until(principal).await?.is_some())
    }

    /// Pass when elevated, otherwise issue a challenge for `continuation`.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn require_elevated(
        &self,
        principal: &Principal,
        continuation: Continuation,
    ) -> Result<GateDecision> {
        if let Some(until_unix) = self.elevated_until(principal).await? {
            return Ok(GateDecision::Elevated(ElevatedToken {
                account_id: principal.account_id,
                until_unix,
            }));
        }

        let challenge_id = Uuid::new_v4();
        let ttl = self.challenge_ttl;
        let expires_at_unix =
            unix_now().saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        let mut challenges = self.challenges.lock().await;
        challenges.retain(|_, pending| pending.issued_at.elapsed() < ttl);
        challenges.insert(
            challenge_id,
            PendingChallenge {
                account_id: principal.account_id,
                session_hash: principal.session_token.hash(),
                continuation,
                issued_at: Instant::now(),
            },
        );
        info!(user_id = %principal.account_id, %challenge_id, "Issued step-up challenge");
        Ok(GateDecision::ChallengeRequired(StepUpChallenge {
            challenge_id,
            expires_at_unix,
            continuation,
        }))
    }

    /// Whether a challenge is still open (issued and not expired).
    pub async fn challenge_pending(&self, challenge_id: Uuid) -> bool {
        self.challenges
            .lock()
            .await
            .get(&challenge_id)
            .is_some_and(|pending| pending.issued_at.elapsed() < self.challenge_ttl)
    }

    /// Verify `proof` for an open challenge and elevate the caller's session.
    ///
    /// Every proof is charged against the account's `TryFactor` budget and
    /// refunded when it verifies.
    ///
    /// # Errors
    /// `ChallengeAbandoned` for unknown, expired or foreign challenges,
    /// `RateLimited` once the attempt budget is spent,
    /// `Validation` for a rejected proof (the challenge stays open).
    pub async fn complete_challenge(
        &self,
        principal: &Principal,
        challenge_id: Uuid,
        proof: &StepUpProof,
    ) -> FactorResult<Elevation> {
        let session_hash = principal.session_token.hash();
        let continuation = {
            let mut challenges = self.challenges.lock().await;
            let Some(pending) = challenges.get(&challenge_id) else {
                return Err(FactorError::ChallengeAbandoned);
            };
            let expired = pending.issued_at.elapsed() >= self.challenge_ttl;
            let foreign =
                pending.account_id != principal.account_id || pending.session_hash != session_hash;
            let continuation = pending.continuation;
            if expired {
                challenges.remove(&challenge_id);
                return Err(FactorError::ChallengeAbandoned);
            }
            if foreign {
                warn!(
                    user_id = %principal.account_id,
                    %challenge_id,
                    "Challenge presented by another session"
                );
                return Err(FactorError::ChallengeAbandoned);
            }
            continuation
        };

        let attempt = self
            .rate_limiter
            .will_take_action(principal.account_id, RateLimitAction::TryFactor, 1)
            .await?;
        if let Err(err) = ensure_allowed(attempt, RateLimitAction::TryFactor) {
            warn!(user_id = %principal.account_id, %challenge_id, "Step-up attempts rate limited");
            return Err(err);
        }

        let account = load_account(self.factors.as_ref(), principal).await?;
        if !self.verifier.verify(&account, proof).await? {
            warn!(user_id = %principal.account_id, "Step-up proof rejected");
            return Err(FactorError::Validation(FieldErrors::single(
                "response",
                "Invalid response",
            )));
        }
        if self.challenges.lock().await.remove(&challenge_id).is_none() {
            return Err(FactorError::ChallengeAbandoned);
        }
        if let Err(err) = self
            .rate_limiter
            .will_take_action(principal.account_id, RateLimitAction::TryFactor, -1)
            .await
        {
            warn!(user_id = %principal.account_id, "Failed to refund step-up attempt: {err:#}");
        }

        if self.sessions.lookup(&session_hash).await?.is_none() {
            return Err(anyhow!("session is no longer active").into());
        }
        let until = unix_now()
            .saturating_add(i64::try_from(self.elevation_ttl.as_secs()).unwrap_or(i64::MAX));
        self.sessions
            .set_high_security_until(&session_hash, Some(until))
            .await?;
        self.audit
            .record(principal.account_id, AuditAction::EnterHighSecurity)
            .await?;
        info!(user_id = %principal.account_id, until, "Session entered high security");
        Ok(Elevation {
            continuation,
            high_security_until_unix: until,
        })
    }

    /// Drop elevation from the caller's session.
    ///
    /// # Errors
    /// Returns an error if the session store or audit sink fails.
    pub async fn downgrade(&self, principal: &Principal) -> Result<()> {
        if !self.is_elevated(principal).await? {
            return Ok(());
        }
        self.sessions
            .set_high_security_until(&principal.session_token.hash(), None)
            .await?;
        self.audit
            .record(principal.account_id, AuditAction::ExitHighSecurity)
            .await?;
        info!(user_id = %principal.account_id, "Session left high security");
        Ok(())
    }
}
