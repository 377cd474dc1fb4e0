//! Persistence seam for factor configurations.

use anyhow::Result;
use async_trait::async_trait;

use super::{Account, AccountId, FactorConfig, FactorId, Principal};

#[async_trait]
pub trait FactorStore: Send + Sync {
    /// Load a factor only if `account` owns it.
    async fn load_factor(&self, account: AccountId, factor_id: FactorId)
        -> Result<Option<FactorConfig>>;

    /// Factors owned by `account`, newest first.
    async fn list_factors(&self, account: AccountId) -> Result<Vec<FactorConfig>>;

    async fn insert(&self, config: &FactorConfig) -> Result<()>;

    /// Persist the mutable fields (the display name) of a loaded factor.
    async fn save(&self, config: &FactorConfig) -> Result<()>;

    async fn delete(&self, config: &FactorConfig) -> Result<()>;

    async fn set_mfa_enrolled(&self, account: AccountId, enrolled: bool) -> Result<()>;
}

/// Load the caller's account view with its current factors.
pub(crate) async fn load_account(store: &dyn FactorStore, principal: &Principal) -> Result<Account> {
    let factors = store.list_factors(principal.account_id).await?;
    Ok(Account {
        id: principal.account_id,
        username: principal.username.clone(),
        factors,
    })
}

/// Recompute the enrolled flag from the factors actually present.
pub(crate) async fn refresh_mfa_enrollment(store: &dyn FactorStore, account: AccountId) -> Result<bool> {
    let enrolled = !store.list_factors(account).await?.is_empty();
    store.set_mfa_enrolled(account, enrolled).await?;
    Ok(enrolled)
}
