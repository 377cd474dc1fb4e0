//! Built-in factor providers.

pub mod totp;

pub use totp::TotpProvider;
