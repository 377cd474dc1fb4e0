//! Short-lived handles that correlate a provider's multi-step creation.
//!
//! A provider issues a token when it renders its enrollment form (stashing
//! whatever it generated, e.g. a TOTP secret) and reads it back when the
//! filled form arrives. The workflow revokes the token once the factor is
//! committed.

use secrecy::SecretString;
use std::{collections::HashMap, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

use super::{AccountId, SyncToken};

struct PendingSync {
    account: AccountId,
    payload: SecretString,
    created_at: Instant,
}

pub struct SyncTokenStore {
    ttl: Duration,
    tokens: Mutex<HashMap<Uuid, PendingSync>>,
}

impl SyncTokenStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, account: AccountId, payload: SecretString) -> SyncToken {
        let token = Uuid::new_v4();
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, pending| pending.created_at.elapsed() < self.ttl);
        tokens.insert(
            token,
            PendingSync {
                account,
                payload,
                created_at: Instant::now(),
            },
        );
        SyncToken(token)
    }

    /// Read a token's payload without consuming it.
    ///
    /// Expired tokens and tokens issued to another account yield `None`.
    pub async fn load(&self, account: AccountId, token: SyncToken) -> Option<SecretString> {
        let mut tokens = self.tokens.lock().await;
        let expired = tokens
            .get(&token.0)
            .is_some_and(|pending| pending.created_at.elapsed() >= self.ttl);
        if expired {
            tokens.remove(&token.0);
            return None;
        }
        tokens
            .get(&token.0)
            .filter(|pending| pending.account == account)
            .map(|pending| pending.payload.clone())
    }

    pub async fn revoke(&self, token: SyncToken) -> bool {
        self.tokens.lock().await.remove(&token.0).is_some()
    }
}
