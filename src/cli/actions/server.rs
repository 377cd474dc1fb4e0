use crate::{
    api::{self, Database},
    cli::telemetry,
    mfa::{
        audit::{AuditSink, TracingAuditSink},
        memory::{MemoryFactorStore, MemorySessionStore},
        provider::{FactorProvider, ProviderCatalog},
        providers::TotpProvider,
        rate_limit::{InMemoryRateLimiter, RateLimiter},
        sessions::SessionStore,
        storage::{PgAuditSink, PgFactorStore, PgRateLimiter, PgSessionStore},
        store::FactorStore,
        AccountId, Collaborators, FactorsConfig, FactorsState, StaticProviderCatalog,
        SyncTokenStore,
    },
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub frontend_base_url: String,
    pub dev_username: String,
    pub factors: FactorsConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let sync_tokens = Arc::new(SyncTokenStore::new(args.factors.sync_token_ttl()));
    let totp = TotpProvider::new(args.factors.totp_issuer(), sync_tokens.clone())?;
    let providers: Vec<Arc<dyn FactorProvider>> = vec![Arc::new(totp)];
    let catalog: Arc<dyn ProviderCatalog> = Arc::new(StaticProviderCatalog::new(providers));

    let (collaborators, database) = match &args.dsn {
        Some(dsn) => postgres_collaborators(dsn, &args.factors, catalog, sync_tokens).await?,
        None => memory_collaborators(&args, catalog, sync_tokens).await?,
    };

    let state = FactorsState::new(&args.factors, collaborators);
    let result = api::new(args.port, state, database, &args.frontend_base_url).await;

    telemetry::shutdown_tracer();
    result
}

async fn postgres_collaborators(
    dsn: &SecretString,
    config: &FactorsConfig,
    catalog: Arc<dyn ProviderCatalog>,
    sync_tokens: Arc<SyncTokenStore>,
) -> Result<(Collaborators, Database)> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    info!("Connected to database");

    let collaborators = Collaborators {
        factors: Arc::new(PgFactorStore::new(pool.clone())),
        sessions: Arc::new(PgSessionStore::new(pool.clone())),
        audit: Arc::new(PgAuditSink::new(pool.clone())),
        rate_limiter: Arc::new(PgRateLimiter::new(pool.clone(), config.rate_limit_policies())),
        catalog,
        sync_tokens,
    };
    Ok((collaborators, Database(Some(pool))))
}

async fn memory_collaborators(
    args: &Args,
    catalog: Arc<dyn ProviderCatalog>,
    sync_tokens: Arc<SyncTokenStore>,
) -> Result<(Collaborators, Database)> {
    let sessions = Arc::new(MemorySessionStore::default());
    let account = AccountId(Uuid::new_v4());
    let token = sessions
        .open_session(account, &args.dev_username)
        .await
        .context("Failed to open development session")?;

    warn!(
        user_id = %account,
        username = %args.dev_username,
        "No DSN configured, state is kept in memory and lost on restart"
    );
    warn!("Development session token: {}", token.expose());

    let factors: Arc<dyn FactorStore> = Arc::new(MemoryFactorStore::default());
    let sessions: Arc<dyn SessionStore> = sessions;
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let rate_limiter: Arc<dyn RateLimiter> =
        Arc::new(InMemoryRateLimiter::new(args.factors.rate_limit_policies()));

    let collaborators = Collaborators {
        factors,
        sessions,
        audit,
        rate_limiter,
        catalog,
        sync_tokens,
    };
    Ok((collaborators, Database::default()))
}

fn log_startup_args(args: &Args) {
    let mode = if args.dsn.is_some() {
        "postgres"
    } else {
        "memory"
    };
    info!(
        port = args.port,
        mode,
        frontend_base_url = %args.frontend_base_url,
        elevation_ttl_seconds = args.factors.elevation_ttl().as_secs(),
        new_factor_limit = args.factors.new_factor_limit(),
        new_factor_window_seconds = args.factors.new_factor_window().as_secs(),
        try_factor_limit = args.factors.try_factor_limit(),
        try_factor_window_seconds = args.factors.try_factor_window().as_secs(),
        "Starting factorgate"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mfa::SessionToken;

    fn args() -> Args {
        Args {
            port: 0,
            dsn: None,
            frontend_base_url: "https://factorgate.dev".to_string(),
            dev_username: "dev".to_string(),
            factors: FactorsConfig::new(),
        }
    }

    #[tokio::test]
    async fn memory_mode_wires_in_memory_stores() -> Result<()> {
        let args = args();
        let sync_tokens = Arc::new(SyncTokenStore::new(args.factors.sync_token_ttl()));
        let totp = TotpProvider::new(args.factors.totp_issuer(), sync_tokens.clone())?;
        let providers: Vec<Arc<dyn FactorProvider>> = vec![Arc::new(totp)];
        let catalog: Arc<dyn ProviderCatalog> = Arc::new(StaticProviderCatalog::new(providers));

        let (collaborators, database) = memory_collaborators(&args, catalog, sync_tokens).await?;
        assert!(database.0.is_none());
        assert!(collaborators
            .sessions
            .lookup(&SessionToken::generate()?.hash())
            .await?
            .is_none());
        Ok(())
    }

    #[test]
    fn debug_output_hides_dsn() {
        let mut args = args();
        args.dsn = Some(SecretString::from("postgres://user:hunter2@db/factorgate"));
        let rendered = format!("{args:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
