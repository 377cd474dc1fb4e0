//! Factor lifecycle tuning: step-up lifetimes, the new-factor and step-up
//! attempt budgets, and the TOTP issuer label.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

use crate::mfa::FactorsConfig;

pub const ARG_ELEVATION_TTL: &str = "elevation-ttl-seconds";
pub const ARG_CHALLENGE_TTL: &str = "challenge-ttl-seconds";
pub const ARG_WORKFLOW_TTL: &str = "workflow-ttl-seconds";
pub const ARG_SYNC_TOKEN_TTL: &str = "sync-token-ttl-seconds";
pub const ARG_NEW_FACTOR_LIMIT: &str = "new-factor-limit";
pub const ARG_NEW_FACTOR_WINDOW: &str = "new-factor-window-seconds";
pub const ARG_TRY_FACTOR_LIMIT: &str = "try-factor-limit";
pub const ARG_TRY_FACTOR_WINDOW: &str = "try-factor-window-seconds";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ELEVATION_TTL)
                .long(ARG_ELEVATION_TTL)
                .help("How long a session stays in high security after a step-up")
                .env("FACTORGATE_ELEVATION_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_TTL)
                .long(ARG_CHALLENGE_TTL)
                .help("Lifetime of an unanswered step-up challenge")
                .env("FACTORGATE_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_WORKFLOW_TTL)
                .long(ARG_WORKFLOW_TTL)
                .help("Idle lifetime of an enrollment dialog")
                .env("FACTORGATE_WORKFLOW_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SYNC_TOKEN_TTL)
                .long(ARG_SYNC_TOKEN_TTL)
                .help("Lifetime of provider secrets issued with an enrollment form")
                .env("FACTORGATE_SYNC_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_NEW_FACTOR_LIMIT)
                .long(ARG_NEW_FACTOR_LIMIT)
                .help("Failed enrollment attempts allowed per account and window")
                .env("FACTORGATE_NEW_FACTOR_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_NEW_FACTOR_WINDOW)
                .long(ARG_NEW_FACTOR_WINDOW)
                .help("Sliding window for the new-factor limit")
                .env("FACTORGATE_NEW_FACTOR_WINDOW_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRY_FACTOR_LIMIT)
                .long(ARG_TRY_FACTOR_LIMIT)
                .help("Failed step-up proofs allowed per account and window")
                .env("FACTORGATE_TRY_FACTOR_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRY_FACTOR_WINDOW)
                .long(ARG_TRY_FACTOR_WINDOW)
                .help("Sliding window for the step-up proof limit")
                .env("FACTORGATE_TRY_FACTOR_WINDOW_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown by authenticator apps")
                .env("FACTORGATE_TOTP_ISSUER")
                .default_value("factorgate"),
        )
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, name: &str) -> Result<T> {
    matches
        .get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

/// Build the domain configuration from parsed arguments.
///
/// # Errors
/// Returns an error if an argument is missing.
pub fn parse(matches: &ArgMatches) -> Result<FactorsConfig> {
    Ok(FactorsConfig::new()
        .with_elevation_ttl_seconds(required(matches, ARG_ELEVATION_TTL)?)
        .with_challenge_ttl_seconds(required(matches, ARG_CHALLENGE_TTL)?)
        .with_workflow_ttl_seconds(required(matches, ARG_WORKFLOW_TTL)?)
        .with_sync_token_ttl_seconds(required(matches, ARG_SYNC_TOKEN_TTL)?)
        .with_new_factor_limit(required(matches, ARG_NEW_FACTOR_LIMIT)?)
        .with_new_factor_window_seconds(required(matches, ARG_NEW_FACTOR_WINDOW)?)
        .with_try_factor_limit(required(matches, ARG_TRY_FACTOR_LIMIT)?)
        .with_try_factor_window_seconds(required(matches, ARG_TRY_FACTOR_WINDOW)?)
        .with_totp_issuer(required(matches, ARG_TOTP_ISSUER)?))
}
