//! Session storage and invalidation of sibling sessions.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{AccountId, SessionRecord, SessionToken};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve an active, unexpired session by token hash.
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Set or clear the high-security deadline on a session.
    async fn set_high_security_until(&self, token_hash: &[u8], until_unix: Option<i64>)
        -> Result<()>;

    /// Delete every session of `account` except the one hashed as `except_hash`.
    async fn terminate_others(&self, account: AccountId, except_hash: &[u8]) -> Result<u64>;
}

/// Ends an account's other sessions after a credential change.
#[derive(Clone)]
pub struct SessionInvalidator {
    sessions: Arc<dyn SessionStore>,
}

impl SessionInvalidator {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Terminate all sessions of `account` other than `current`.
    ///
    /// Idempotent: a second call finds nothing left to terminate.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn terminate_others(&self, account: AccountId, current: &SessionToken) -> Result<u64> {
        let terminated = self
            .sessions
            .terminate_others(account, &current.hash())
            .await?;
        if terminated > 0 {
            info!(user_id = %account, terminated, "Terminated other sessions");
        }
        Ok(terminated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mfa::memory::MemorySessionStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn terminate_others_keeps_current_and_is_idempotent() -> Result<()> {
        let store = Arc::new(MemorySessionStore::default());
        let account = AccountId(Uuid::new_v4());
        let other_account = AccountId(Uuid::new_v4());
        let current = store.open_session(account, "alice").await?;
        store.open_session(account, "alice").await?;
        store.open_session(account, "alice").await?;
        let bystander = store.open_session(other_account, "bob").await?;

        let invalidator = SessionInvalidator::new(store.clone());
        assert_eq!(invalidator.terminate_others(account, &current).await?, 2);
        assert_eq!(invalidator.terminate_others(account, &current).await?, 0);

        assert!(store.lookup(&current.hash()).await?.is_some());
        assert!(store.lookup(&bystander.hash()).await?.is_some());
        assert_eq!(store.session_count(account).await, 1);
        Ok(())
    }
}
