//! In-process collaborators for development mode and tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{
    sessions::SessionStore, store::FactorStore, types::unix_now, AccountId, FactorConfig,
    FactorId, SessionRecord, SessionToken,
};

/// Factors kept in insertion order; listing returns them newest first.
#[derive(Default)]
pub struct MemoryFactorStore {
    factors: Mutex<Vec<FactorConfig>>,
    enrolled: Mutex<HashMap<AccountId, bool>>,
}

impl MemoryFactorStore {
    pub async fn mfa_enrolled(&self, account: AccountId) -> bool {
        self.enrolled
            .lock()
            .await
            .get(&account)
            .copied()
            .unwrap_or(false)
    }
}

#[async_trait]
impl FactorStore for MemoryFactorStore {
    async fn load_factor(
        &self,
        account: AccountId,
        factor_id: FactorId,
    ) -> Result<Option<FactorConfig>> {
        Ok(self
            .factors
            .lock()
            .await
            .iter()
            .find(|config| config.id == factor_id && config.account_id == account)
            .cloned())
    }

    async fn list_factors(&self, account: AccountId) -> Result<Vec<FactorConfig>> {
        Ok(self
            .factors
            .lock()
            .await
            .iter()
            .rev()
            .filter(|config| config.account_id == account)
            .cloned()
            .collect())
    }

    async fn insert(&self, config: &FactorConfig) -> Result<()> {
        let mut stored = config.clone();
        stored.sync_token = None;
        self.factors.lock().await.push(stored);
        Ok(())
    }

    async fn save(&self, config: &FactorConfig) -> Result<()> {
        let mut factors = self.factors.lock().await;
        if let Some(stored) = factors
            .iter_mut()
            .find(|stored| stored.id == config.id && stored.account_id == config.account_id)
        {
            stored.name.clone_from(&config.name);
        }
        Ok(())
    }

    async fn delete(&self, config: &FactorConfig) -> Result<()> {
        self.factors
            .lock()
            .await
            .retain(|stored| !(stored.id == config.id && stored.account_id == config.account_id));
        Ok(())
    }

    async fn set_mfa_enrolled(&self, account: AccountId, enrolled: bool) -> Result<()> {
        self.enrolled.lock().await.insert(account, enrolled);
        Ok(())
    }
}

/// Sessions keyed by token hash. They never expire on their own.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemorySessionStore {
    /// Create a session and return its raw token.
    ///
    /// # Errors
    /// Returns an error if token generation fails.
    pub async fn open_session(&self, account: AccountId, username: &str) -> Result<SessionToken> {
        let token = SessionToken::generate()?;
        let record = SessionRecord {
            account_id: account,
            username: username.to_string(),
            token_hash: token.hash(),
            created_at_unix: unix_now(),
            high_security_until_unix: None,
        };
        self.sessions.lock().await.insert(token.hash(), record);
        Ok(token)
    }

    pub async fn session_count(&self, account: AccountId) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|record| record.account_id == account)
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().await.get(token_hash).cloned())
    }

    async fn set_high_security_until(
        &self,
        token_hash: &[u8],
        until_unix: Option<i64>,
    ) -> Result<()> {
        if let Some(record) = self.sessions.lock().await.get_mut(token_hash) {
            record.high_security_until_unix = until_unix;
        }
        Ok(())
    }

    async fn terminate_others(&self, account: AccountId, except_hash: &[u8]) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|hash, record| record.account_id != account || hash == except_hash);
        Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
    }
}
