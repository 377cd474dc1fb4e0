//! Account audit trail for factor changes and elevation.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::AccountId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    FactorAdded,
    FactorRemoved,
    EnterHighSecurity,
    ExitHighSecurity,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FactorAdded => "multi-add",
            Self::FactorRemoved => "multi-remove",
            Self::EnterHighSecurity => "enter-high-security",
            Self::ExitHighSecurity => "exit-high-security",
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, account: AccountId, action: AuditAction) -> Result<()>;
}

/// Emits audit events as structured log lines.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, account: AccountId, action: AuditAction) -> Result<()> {
        info!(user_id = %account, action = action.as_str(), "Account audit event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn action_names() {
        assert_eq!(AuditAction::FactorAdded.as_str(), "multi-add");
        assert_eq!(AuditAction::FactorRemoved.as_str(), "multi-remove");
        assert_eq!(AuditAction::EnterHighSecurity.as_str(), "enter-high-security");
        assert_eq!(AuditAction::ExitHighSecurity.as_str(), "exit-high-security");
    }

    #[tokio::test]
    async fn tracing_sink_accepts_events() -> Result<()> {
        TracingAuditSink
            .record(AccountId(Uuid::new_v4()), AuditAction::FactorAdded)
            .await
    }
}
