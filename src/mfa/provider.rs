//! Factor providers and the catalog that orders them.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::{
    types::unix_now, Account, AccountId, EnrollmentForm, FactorConfig, FactorId, FactorInput,
    FieldErrors, ProviderId, SyncToken,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Active,
    Disabled,
}

/// Ordering key: explicit priority first, display name as tie-breaker.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortVector {
    pub priority: i32,
    pub name: String,
}

/// What a provider produced from validated input, before it is stored.
#[derive(Clone, Debug)]
pub struct FactorDraft {
    pub name: String,
    pub properties: serde_json::Value,
    pub sync_token: Option<SyncToken>,
}

impl FactorDraft {
    #[must_use]
    pub fn into_config(self, account_id: AccountId, provider_id: ProviderId) -> FactorConfig {
        FactorConfig {
            id: FactorId::generate(),
            account_id,
            provider_id,
            name: self.name,
            created_at_unix: unix_now(),
            properties: self.properties,
            sync_token: self.sync_token,
        }
    }
}

#[derive(Clone, Debug)]
pub enum CreateOutcome {
    Created(FactorDraft),
    Rejected(FieldErrors),
}

#[async_trait]
pub trait FactorProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn display_name(&self) -> &str;

    fn display_description(&self) -> &str;

    fn status(&self) -> ProviderStatus;

    fn is_active(&self) -> bool {
        self.status() == ProviderStatus::Active
    }

    fn sort_vector(&self) -> SortVector {
        SortVector {
            priority: 0,
            name: self.display_name().to_string(),
        }
    }

    /// Whether this account may enroll another factor of this kind.
    async fn can_create_new_configuration(&self, account: &Account) -> Result<bool>;

    /// Optional note shown next to the provider in the selection menu.
    fn create_description(&self, _account: &Account) -> Option<String> {
        None
    }

    /// Text shown before the user confirms they want to enroll.
    fn enroll_description(&self, account: &Account) -> String;

    fn enroll_button_text(&self) -> String {
        "Continue".to_string()
    }

    /// The form to present before creation; may start a sync exchange.
    async fn enrollment_form(&self, account: &Account) -> Result<EnrollmentForm>;

    /// Validate submitted input and produce a factor draft.
    async fn create_configuration(
        &self,
        account: &Account,
        input: &FactorInput,
    ) -> Result<CreateOutcome>;

    /// Check a step-up response against an enrolled factor of this provider.
    async fn verify_challenge_response(
        &self,
        account: &Account,
        config: &FactorConfig,
        response: &str,
    ) -> Result<bool>;
}

/// One entry in the provider selection menu.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProviderOption {
    pub id: ProviderId,
    pub name: String,
    pub description: String,
    pub create_description: Option<String>,
    pub eligible: bool,
}

impl ProviderOption {
    #[must_use]
    pub fn new(provider: &dyn FactorProvider, account: &Account, eligible: bool) -> Self {
        Self {
            id: provider.id().clone(),
            name: provider.display_name().to_string(),
            description: provider.display_description().to_string(),
            create_description: provider.create_description(account),
            eligible,
        }
    }
}

pub trait ProviderCatalog: Send + Sync {
    /// Active providers visible to `viewer`, in sort-vector order.
    fn list_active(&self, viewer: &Account) -> Vec<Arc<dyn FactorProvider>>;

    /// Look up a provider by id regardless of status.
    fn get(&self, id: &ProviderId) -> Option<Arc<dyn FactorProvider>>;
}

/// Catalog over a fixed set of providers registered at startup.
#[derive(Clone, Default)]
pub struct StaticProviderCatalog {
    providers: Vec<Arc<dyn FactorProvider>>,
}

impl StaticProviderCatalog {
    #[must_use]
    pub fn new(mut providers: Vec<Arc<dyn FactorProvider>>) -> Self {
        providers.sort_by_cached_key(|provider| provider.sort_vector());
        Self { providers }
    }
}

impl ProviderCatalog for StaticProviderCatalog {
    fn list_active(&self, _viewer: &Account) -> Vec<Arc<dyn FactorProvider>> {
        self.providers
            .iter()
            .filter(|provider| provider.is_active())
            .cloned()
            .collect()
    }

    fn get(&self, id: &ProviderId) -> Option<Arc<dyn FactorProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.id() == id)
            .cloned()
    }
}

/// Build the selection menu for `account` from ordered providers.
///
/// # Errors
/// Returns an error if a provider's eligibility check fails.
pub async fn provider_options(
    providers: &[Arc<dyn FactorProvider>],
    account: &Account,
) -> Result<Vec<ProviderOption>> {
    let mut options = Vec::with_capacity(providers.len());
    for provider in providers {
        let eligible = provider.can_create_new_configuration(account).await?;
        options.push(ProviderOption::new(provider.as_ref(), account, eligible));
    }
    Ok(options)
}
