//! Maps parsed arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{factors, ARG_DEV_USERNAME, ARG_DSN, ARG_FRONTEND_BASE_URL, ARG_PORT};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| SecretString::from(dsn.clone()));
    let frontend_base_url = matches
        .get_one::<String>(ARG_FRONTEND_BASE_URL)
        .cloned()
        .context("missing required argument: --frontend-base-url")?;
    let dev_username = matches
        .get_one::<String>(ARG_DEV_USERNAME)
        .cloned()
        .unwrap_or_else(|| "dev".to_string());

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url,
        dev_username,
        factors: factors::parse(matches)?,
    }))
}
