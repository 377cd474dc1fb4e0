//! Fakes and a wired-up harness shared by the unit tests.

#![allow(clippy::unwrap_used)]

use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    audit::{AuditAction, AuditSink},
    elevation::{Continuation, GateDecision, StepUpChallenge, StepUpProof},
    memory::{MemoryFactorStore, MemorySessionStore},
    provider::{CreateOutcome, FactorDraft, FactorProvider, ProviderStatus, SortVector},
    rate_limit::{InMemoryRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter},
    sessions::SessionStore,
    store::FactorStore,
    types::unix_now,
    Account, AccountId, Collaborators, EnrollmentForm, FactorConfig, FactorInput, FactorsConfig,
    FactorsState, FieldErrors, FormField, Principal, ProviderId, SessionRecord, SessionToken,
    StaticProviderCatalog, SyncTokenStore,
};

pub const VALID_CODE: &str = "424242";

pub fn test_account() -> Account {
    Account {
        id: AccountId(Uuid::new_v4()),
        username: "alice".to_string(),
        factors: Vec::new(),
    }
}

pub fn principal_for(account_id: AccountId, username: &str, token: SessionToken) -> Principal {
    Principal {
        account_id,
        username: username.to_string(),
        session_token: token,
    }
}

/// Provider whose "math" is comparing against [`VALID_CODE`].
pub struct StubProvider {
    id: ProviderId,
    name: String,
    priority: i32,
    status: ProviderStatus,
    eligible: AtomicBool,
    create_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(id: &str) -> Self {
        let mut name = id.to_string();
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        Self {
            id: ProviderId::parse(id).unwrap(),
            name,
            priority: 0,
            status: ProviderStatus::Active,
            eligible: AtomicBool::new(true),
            create_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: ProviderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_eligible(self, eligible: bool) -> Self {
        self.set_eligible(eligible);
        self
    }

    pub fn set_eligible(&self, eligible: bool) {
        self.eligible.store(eligible, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FactorProvider for StubProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn display_description(&self) -> &str {
        "Stub factor for tests"
    }

    fn status(&self) -> ProviderStatus {
        self.status
    }

    fn sort_vector(&self) -> SortVector {
        SortVector {
            priority: self.priority,
            name: self.name.clone(),
        }
    }

    async fn can_create_new_configuration(&self, _account: &Account) -> Result<bool> {
        Ok(self.eligible.load(Ordering::SeqCst))
    }

    fn enroll_description(&self, account: &Account) -> String {
        format!("Add a stub factor to {}", account.username)
    }

    async fn enrollment_form(&self, _account: &Account) -> Result<EnrollmentForm> {
        Ok(EnrollmentForm {
            title: "Stub".to_string(),
            instructions: "Enter the code".to_string(),
            fields: vec![FormField {
                name: "code".to_string(),
                label: "Code".to_string(),
                value: None,
            }],
            sync_token: None,
            data: BTreeMap::new(),
        })
    }

    async fn create_configuration(
        &self,
        _account: &Account,
        input: &FactorInput,
    ) -> Result<CreateOutcome> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if input.field("code") != Some(VALID_CODE) {
            return Ok(CreateOutcome::Rejected(FieldErrors::single(
                "code",
                "Invalid code",
            )));
        }
        Ok(CreateOutcome::Created(FactorDraft {
            name: input.field("name").unwrap_or(&self.name).to_string(),
            properties: serde_json::json!({}),
            sync_token: None,
        }))
    }

    async fn verify_challenge_response(
        &self,
        _account: &Account,
        _config: &FactorConfig,
        response: &str,
    ) -> Result<bool> {
        Ok(response == VALID_CODE)
    }
}

/// Limiter that records every cost it was asked about.
pub struct RecordingRateLimiter {
    inner: InMemoryRateLimiter,
    calls: Mutex<Vec<(RateLimitAction, i64)>>,
}

impl RecordingRateLimiter {
    /// Costs asked for `NewFactor`, in order.
    pub async fn calls(&self) -> Vec<i64> {
        self.calls_for(RateLimitAction::NewFactor).await
    }

    pub async fn calls_for(&self, action: RateLimitAction) -> Vec<i64> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(called, _)| *called == action)
            .map(|(_, cost)| *cost)
            .collect()
    }

    pub async fn usage(&self, account: AccountId) -> i64 {
        self.inner.usage(account, RateLimitAction::NewFactor).await
    }

    pub async fn usage_of(&self, account: AccountId, action: RateLimitAction) -> i64 {
        self.inner.usage(account, action).await
    }
}

#[async_trait]
impl RateLimiter for RecordingRateLimiter {
    async fn will_take_action(
        &self,
        account: AccountId,
        action: RateLimitAction,
        cost: i64,
    ) -> Result<RateLimitDecision> {
        self.calls.lock().await.push((action, cost));
        self.inner.will_take_action(account, action, cost).await
    }
}

/// Session store that counts lookups, to prove the gate was not consulted.
#[derive(Default)]
pub struct CountingSessionStore {
    inner: MemorySessionStore,
    lookups: AtomicUsize,
}

impl CountingSessionStore {
    pub async fn open_session(&self, account: AccountId, username: &str) -> Result<SessionToken> {
        self.inner.open_session(account, username).await
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for CountingSessionStore {
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(token_hash).await
    }

    async fn set_high_security_until(
        &self,
        token_hash: &[u8],
        until_unix: Option<i64>,
    ) -> Result<()> {
        self.inner.set_high_security_until(token_hash, until_unix).await
    }

    async fn terminate_others(&self, account: AccountId, except_hash: &[u8]) -> Result<u64> {
        self.inner.terminate_others(account, except_hash).await
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<(AccountId, AuditAction)>>,
    failing: Mutex<Option<AuditAction>>,
}

impl MemoryAuditSink {
    pub async fn events(&self) -> Vec<(AccountId, AuditAction)> {
        self.events.lock().await.clone()
    }

    /// Make every later `record` of `action` fail.
    pub async fn fail_on(&self, action: AuditAction) {
        *self.failing.lock().await = Some(action);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, account: AccountId, action: AuditAction) -> Result<()> {
        if *self.failing.lock().await == Some(action) {
            anyhow::bail!("audit log unavailable");
        }
        self.events.lock().await.push((account, action));
        Ok(())
    }
}

/// Every component wired over in-memory fakes.
pub struct Harness {
    pub state: FactorsState,
    pub factors: Arc<MemoryFactorStore>,
    pub sessions: Arc<CountingSessionStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub limiter: Arc<RecordingRateLimiter>,
    pub stub: Arc<StubProvider>,
}

impl std::ops::Deref for Harness {
    type Target = FactorsState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(vec![StubProvider::new("stub")], 10)
    }

    pub fn with_providers(providers: Vec<StubProvider>) -> Self {
        Self::build(providers, 10)
    }

    pub fn with_limit(limit: i64) -> Self {
        Self::build(vec![StubProvider::new("stub")], limit)
    }

    fn build(providers: Vec<StubProvider>, limit: i64) -> Self {
        let config = FactorsConfig::new().with_new_factor_limit(limit);
        let providers: Vec<Arc<StubProvider>> = providers.into_iter().map(Arc::new).collect();
        let stub = providers
            .iter()
            .find(|provider| provider.id.as_str() == "stub")
            .cloned()
            .unwrap_or_else(|| Arc::new(StubProvider::new("stub")));
        let catalog = StaticProviderCatalog::new(
            providers
                .into_iter()
                .map(|provider| provider as Arc<dyn FactorProvider>)
                .collect(),
        );

        let factors = Arc::new(MemoryFactorStore::default());
        let sessions = Arc::new(CountingSessionStore::default());
        let audit = Arc::new(MemoryAuditSink::default());
        let limiter = Arc::new(RecordingRateLimiter {
            inner: InMemoryRateLimiter::new(config.rate_limit_policies()),
            calls: Mutex::new(Vec::new()),
        });
        let collaborators = Collaborators {
            factors: factors.clone(),
            sessions: sessions.clone(),
            audit: audit.clone(),
            rate_limiter: limiter.clone(),
            catalog: Arc::new(catalog),
            sync_tokens: Arc::new(SyncTokenStore::new(config.sync_token_ttl())),
        };
        let state = FactorsState::new(&config, collaborators);
        Self {
            state,
            factors,
            sessions,
            audit,
            limiter,
            stub,
        }
    }

    pub async fn sign_in(&self, username: &str) -> Result<Principal> {
        let account = AccountId(Uuid::new_v4());
        let token = self.sessions.open_session(account, username).await?;
        Ok(principal_for(account, username, token))
    }

    pub async fn is_signed_in(&self, principal: &Principal) -> Result<bool> {
        Ok(self
            .sessions
            .inner
            .lookup(&principal.session_token.hash())
            .await?
            .is_some())
    }

    /// Elevate the session directly in the store.
    pub async fn elevate(&self, principal: &Principal) -> Result<()> {
        let until = unix_now() + 900;
        self.sessions
            .inner
            .set_high_security_until(&principal.session_token.hash(), Some(until))
            .await
    }

    pub async fn challenge(
        &self,
        principal: &Principal,
        continuation: Continuation,
    ) -> Result<StepUpChallenge> {
        match self.gate.require_elevated(principal, continuation).await? {
            GateDecision::ChallengeRequired(challenge) => Ok(challenge),
            GateDecision::Elevated(_) => anyhow::bail!("session is already elevated"),
        }
    }

    /// Complete a challenge the way a factor-less account would.
    pub async fn complete(&self, principal: &Principal, challenge: &StepUpChallenge) -> Result<()> {
        self.gate
            .complete_challenge(principal, challenge.challenge_id, &StepUpProof::Acknowledge)
            .await?;
        Ok(())
    }

    pub async fn seed_factor(
        &self,
        account: AccountId,
        provider_id: &str,
        name: &str,
    ) -> Result<FactorConfig> {
        let config = FactorDraft {
            name: name.to_string(),
            properties: serde_json::json!({}),
            sync_token: None,
        }
        .into_config(account, ProviderId::parse(provider_id).unwrap());
        self.factors.insert(&config).await?;
        Ok(config)
    }
}
