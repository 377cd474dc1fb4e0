//! Postgres-backed collaborators.
//!
//! Schema lives in `db/sql/factorgate.sql`. All queries are runtime-checked
//! (no `query!` macros) so the crate builds without a database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::{
    audit::{AuditAction, AuditSink},
    rate_limit::{
        floored_sum, recorded_cost, window_seconds, RateLimitAction, RateLimitDecision,
        RateLimitPolicies, RateLimiter,
    },
    sessions::SessionStore,
    store::FactorStore,
    AccountId, FactorConfig, FactorId, ProviderId, SessionRecord,
};

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn factor_from_row(row: &sqlx::postgres::PgRow) -> Result<FactorConfig> {
    let provider_id: String = row.get("provider_id");
    Ok(FactorConfig {
        id: FactorId(row.get("id")),
        account_id: AccountId(row.get("user_id")),
        provider_id: ProviderId::parse(&provider_id).map_err(anyhow::Error::msg)?,
        name: row.get("name"),
        created_at_unix: row.get("created_at_unix"),
        properties: row.get("properties"),
        sync_token: None,
    })
}

#[derive(Clone)]
pub struct PgFactorStore {
    pool: PgPool,
}

impl PgFactorStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactorStore for PgFactorStore {
    async fn load_factor(
        &self,
        account: AccountId,
        factor_id: FactorId,
    ) -> Result<Option<FactorConfig>> {
        let query = r"
            SELECT id, user_id, provider_id, name, properties,
                   EXTRACT(EPOCH FROM created_at)::bigint AS created_at_unix
            FROM mfa_factor_configs
            WHERE id = $1 AND user_id = $2
        ";
        let row = sqlx::query(query)
            .bind(factor_id.0)
            .bind(account.0)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load factor")?;
        row.as_ref().map(factor_from_row).transpose()
    }

    async fn list_factors(&self, account: AccountId) -> Result<Vec<FactorConfig>> {
        let query = r"
            SELECT id, user_id, provider_id, name, properties,
                   EXTRACT(EPOCH FROM created_at)::bigint AS created_at_unix
            FROM mfa_factor_configs
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
        ";
        let rows = sqlx::query(query)
            .bind(account.0)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list factors")?;
        rows.iter().map(factor_from_row).collect()
    }

    async fn insert(&self, config: &FactorConfig) -> Result<()> {
        let query = r"
            INSERT INTO mfa_factor_configs (id, user_id, provider_id, name, properties, created_at)
            VALUES ($1, $2, $3, $4, $5, to_timestamp($6::bigint))
        ";
        sqlx::query(query)
            .bind(config.id.0)
            .bind(config.account_id.0)
            .bind(config.provider_id.as_str())
            .bind(&config.name)
            .bind(&config.properties)
            .bind(config.created_at_unix)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert factor")?;
        Ok(())
    }

    async fn save(&self, config: &FactorConfig) -> Result<()> {
        let query = r"
            UPDATE mfa_factor_configs
            SET name = $3, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
        ";
        sqlx::query(query)
            .bind(config.id.0)
            .bind(config.account_id.0)
            .bind(&config.name)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to save factor")?;
        Ok(())
    }

    async fn delete(&self, config: &FactorConfig) -> Result<()> {
        let query = "DELETE FROM mfa_factor_configs WHERE id = $1 AND user_id = $2";
        sqlx::query(query)
            .bind(config.id.0)
            .bind(config.account_id.0)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete factor")?;
        Ok(())
    }

    async fn set_mfa_enrolled(&self, account: AccountId, enrolled: bool) -> Result<()> {
        let query = "UPDATE users SET mfa_enrolled = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(account.0)
            .bind(enrolled)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update MFA enrollment flag")?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT s.user_id, u.username,
                   EXTRACT(EPOCH FROM s.created_at)::bigint AS created_at_unix,
                   EXTRACT(EPOCH FROM s.high_security_until)::bigint AS high_security_until_unix
            FROM user_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.session_hash = $1
              AND s.expires_at > NOW()
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup session")?;
        Ok(row.map(|row| SessionRecord {
            account_id: AccountId(row.get("user_id")),
            username: row.get("username"),
            token_hash: token_hash.to_vec(),
            created_at_unix: row.get("created_at_unix"),
            high_security_until_unix: row.get("high_security_until_unix"),
        }))
    }

    async fn set_high_security_until(
        &self,
        token_hash: &[u8],
        until_unix: Option<i64>,
    ) -> Result<()> {
        let query = r"
            UPDATE user_sessions
            SET high_security_until = to_timestamp($2::bigint)
            WHERE session_hash = $1
        ";
        sqlx::query(query)
            .bind(token_hash)
            .bind(until_unix)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update session elevation")?;
        Ok(())
    }

    async fn terminate_others(&self, account: AccountId, except_hash: &[u8]) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE user_id = $1 AND session_hash <> $2";
        let result = sqlx::query(query)
            .bind(account.0)
            .bind(except_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to terminate sessions")?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, account: AccountId, action: AuditAction) -> Result<()> {
        let query = "INSERT INTO user_audit_log (user_id, action) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(account.0)
            .bind(action.as_str())
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to record audit event")?;
        tracing::info!(user_id = %account, action = action.as_str(), "Account audit event");
        Ok(())
    }
}

/// Rolling-window limiter over `factor_action_log`.
///
/// Each decision runs in one transaction holding an advisory lock on the
/// (account, action) pair, so concurrent requests cannot both pass the check.
/// Rows that left the window are deleted in the same transaction.
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
    policies: RateLimitPolicies,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, policies: impl Into<RateLimitPolicies>) -> Self {
        Self {
            pool,
            policies: policies.into(),
        }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn will_take_action(
        &self,
        account: AccountId,
        action: RateLimitAction,
        cost: i64,
    ) -> Result<RateLimitDecision> {
        let policy = self.policies.for_action(action);
        let window = window_seconds(policy.window())?;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin rate limit transaction")?;

        let lock = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";
        sqlx::query(lock)
            .bind(format!("{account}:{action}"))
            .execute(&mut *tx)
            .instrument(db_span("SELECT", lock))
            .await
            .context("failed to acquire rate limit lock")?;

        let prune = r"
            DELETE FROM factor_action_log
            WHERE user_id = $1
              AND action = $2
              AND created_at <= NOW() - ($3::bigint * INTERVAL '1 second')
        ";
        sqlx::query(prune)
            .bind(account.0)
            .bind(action.as_str())
            .bind(window)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", prune))
            .await
            .context("failed to prune rate limit scores")?;

        let scores = r"
            SELECT score
            FROM factor_action_log
            WHERE user_id = $1
              AND action = $2
            ORDER BY created_at, id
        ";
        let rows = sqlx::query(scores)
            .bind(account.0)
            .bind(action.as_str())
            .fetch_all(&mut *tx)
            .instrument(db_span("SELECT", scores))
            .await
            .context("failed to load rate limit scores")?;
        let used = floored_sum(rows.iter().map(|row| row.get::<i64, _>("score")));

        let decision = policy.decide(used, cost);
        if decision == RateLimitDecision::Allowed {
            if let Some(score) = recorded_cost(used, cost) {
                let insert =
                    "INSERT INTO factor_action_log (user_id, action, score) VALUES ($1, $2, $3)";
                sqlx::query(insert)
                    .bind(account.0)
                    .bind(action.as_str())
                    .bind(score)
                    .execute(&mut *tx)
                    .instrument(db_span("INSERT", insert))
                    .await
                    .context("failed to log rate limited action")?;
            }
        }

        tx.commit().await.context("commit rate limit transaction")?;
        Ok(decision)
    }
}
