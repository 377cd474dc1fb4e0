//! # Factorgate (MFA Factor Lifecycle)
//!
//! `factorgate` manages the multi-factor authentication factors attached to a
//! user account: enrolling new factors, renaming them and removing them.
//!
//! ## Enrollment
//!
//! Enrollment is a resumable, multi-step dialog driven by
//! [`mfa::workflow::EnrollmentWorkflow`]. The client picks a provider, passes a
//! high-security step-up, confirms, and submits provider specific input. Each
//! response carries a `workflow_token` so the dialog can continue across
//! requests.
//!
//! ## High Security
//!
//! Sensitive changes (adding or removing a factor) require the session to be in
//! a time-limited high-security state. Without it, the caller receives a
//! step-up challenge instead of the result and retries after completing it.
//!
//! ## Rate Limiting & Sessions
//!
//! New factors are budgeted per account. Attempts are charged up front and
//! refunded on success, so only failed attempts count. A successful enrollment
//! terminates every other session of the account.
//!
//! ## Storage
//!
//! Every collaborator sits behind a trait. Postgres (`sqlx`) implementations
//! live in [`mfa::storage`], in-memory ones in [`mfa::memory`].

pub mod api;
pub mod cli;
pub mod mfa;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
