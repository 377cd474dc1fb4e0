//! Identifiers and records shared by the factor workflows.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt};
use utoipa::ToSchema;
use uuid::Uuid;

/// Stable identifier of an account under MFA management.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of an enrolled factor. UUIDv7, so ids sort by creation time.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct FactorId(pub Uuid);

impl FactorId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for FactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a factor provider: lowercase `[a-z0-9-]`, at most 64 chars.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String)]
pub struct ProviderId(String);

impl ProviderId {
    /// Validate and wrap a provider identifier.
    ///
    /// # Errors
    /// Returns an error message when the identifier is empty or contains
    /// characters outside `[a-z0-9-]`.
    pub fn parse(value: &str) -> Result<Self, String> {
        let valid = Regex::new(r"^[a-z0-9][a-z0-9-]{0,63}$").is_ok_and(|re| re.is_match(value));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(format!("invalid provider id: {value:?}"))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProviderId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transient handle correlating a provider's in-flight creation exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct SyncToken(pub Uuid);

/// Opaque session credential as presented by the client.
///
/// The raw value never leaves this type except to set a cookie; storage only
/// ever sees [`SessionToken::hash`].
#[derive(Clone, Debug)]
pub struct SessionToken(SecretString);

impl SessionToken {
    #[must_use]
    pub fn new(raw: String) -> Self {
        Self(SecretString::from(raw))
    }

    /// Create a fresh random session token.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate session token")?;
        Ok(Self::new(Base64UrlUnpadded::encode_string(&bytes)))
    }

    #[must_use]
    pub fn hash(&self) -> Vec<u8> {
        hash_session_token(self.0.expose_secret())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Hash a session token so raw values never touch storage.
#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Server-side view of a session.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub account_id: AccountId,
    pub username: String,
    pub token_hash: Vec<u8>,
    pub created_at_unix: i64,
    pub high_security_until_unix: Option<i64>,
}

impl SessionRecord {
    #[must_use]
    pub fn is_high_security(&self, now_unix: i64) -> bool {
        self.high_security_until_unix
            .is_some_and(|until| until > now_unix)
    }
}

/// The authenticated caller: an account acting through one session.
#[derive(Clone, Debug)]
pub struct Principal {
    pub account_id: AccountId,
    pub username: String,
    pub session_token: SessionToken,
}

/// Account under management together with its currently enrolled factors.
#[derive(Clone, Debug)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub factors: Vec<FactorConfig>,
}

impl Account {
    #[must_use]
    pub fn factors_from(&self, provider_id: &ProviderId) -> usize {
        self.factors
            .iter()
            .filter(|factor| &factor.provider_id == provider_id)
            .count()
    }
}

/// A concrete enrolled factor.
#[derive(Clone)]
pub struct FactorConfig {
    pub id: FactorId,
    pub account_id: AccountId,
    pub provider_id: ProviderId,
    pub name: String,
    pub created_at_unix: i64,
    /// Provider-private data (e.g. a TOTP secret). Never exposed over the API.
    pub properties: serde_json::Value,
    /// Only set between provider creation and commit; never persisted.
    pub sync_token: Option<SyncToken>,
}

impl fmt::Debug for FactorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorConfig")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("provider_id", &self.provider_id)
            .field("name", &self.name)
            .field("created_at_unix", &self.created_at_unix)
            .field("properties", &"***")
            .field("sync_token", &self.sync_token)
            .finish()
    }
}

/// Public summary of an enrolled factor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct FactorSummary {
    pub id: FactorId,
    pub name: String,
    pub provider_id: ProviderId,
    pub provider_name: Option<String>,
    pub created_at_unix: i64,
}

impl FactorSummary {
    #[must_use]
    pub fn new(config: &FactorConfig, provider_name: Option<&str>) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            provider_id: config.provider_id.clone(),
            provider_name: provider_name.map(str::to_string),
            created_at_unix: config.created_at_unix,
        }
    }
}

/// Field-level validation messages, keyed by form field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    #[must_use]
    pub fn single(field: &str, message: &str) -> Self {
        let mut errors = Self::default();
        errors.insert(field, message);
        errors
    }

    pub fn insert(&mut self, field: &str, message: &str) {
        self.0.insert(field.to_string(), message.to_string());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Provider-specific values submitted by the client.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct FactorInput {
    #[serde(default)]
    pub sync_token: Option<SyncToken>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl FactorInput {
    /// Trimmed value of a field, `None` when missing or blank.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub value: Option<String>,
}

/// A provider-specific form presented before creation.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct EnrollmentForm {
    pub title: String,
    pub instructions: String,
    pub fields: Vec<FormField>,
    pub sync_token: Option<SyncToken>,
    /// Display-only values, e.g. a provisioning URL to render as a QR code.
    pub data: BTreeMap<String, String>,
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_accepts_slugs() {
        assert!(ProviderId::parse("totp").is_ok());
        assert!(ProviderId::parse("sms-2").is_ok());
    }

    #[test]
    fn provider_id_rejects_invalid_values() {
        assert!(ProviderId::parse("").is_err());
        assert!(ProviderId::parse("TOTP").is_err());
        assert!(ProviderId::parse("-totp").is_err());
        assert!(ProviderId::parse("totp provider").is_err());
    }

    #[test]
    fn provider_id_deserialization_is_validated() {
        let ok: Result<ProviderId, _> = serde_json::from_str("\"totp\"");
        assert!(ok.is_ok());
        let bad: Result<ProviderId, _> = serde_json::from_str("\"Not Valid\"");
        assert!(bad.is_err());
    }

    #[test]
    fn session_token_hash_is_stable_and_not_raw() -> Result<()> {
        let token = SessionToken::generate()?;
        assert_eq!(token.hash(), hash_session_token(token.expose()));
        assert_eq!(token.hash().len(), 32);
        assert_ne!(token.hash(), token.expose().as_bytes());
        Ok(())
    }

    #[test]
    fn generated_session_tokens_differ() -> Result<()> {
        let first = SessionToken::generate()?;
        let second = SessionToken::generate()?;
        assert_ne!(first.expose(), second.expose());
        Ok(())
    }

    #[test]
    fn session_record_high_security_window() {
        let record = SessionRecord {
            account_id: AccountId(Uuid::new_v4()),
            username: "alice".to_string(),
            token_hash: vec![1, 2, 3],
            created_at_unix: 100,
            high_security_until_unix: Some(200),
        };
        assert!(record.is_high_security(199));
        assert!(!record.is_high_security(200));
        let plain = SessionRecord {
            high_security_until_unix: None,
            ..record
        };
        assert!(!plain.is_high_security(0));
    }

    #[test]
    fn factor_input_field_trims_and_skips_blank() {
        let mut input = FactorInput::default();
        input.fields.insert("code".to_string(), " 123456 ".to_string());
        input.fields.insert("name".to_string(), "   ".to_string());
        assert_eq!(input.field("code"), Some("123456"));
        assert_eq!(input.field("name"), None);
        assert_eq!(input.field("missing"), None);
    }

    #[test]
    fn factor_config_debug_redacts_properties() {
        let config = FactorConfig {
            id: FactorId::generate(),
            account_id: AccountId(Uuid::new_v4()),
            provider_id: ProviderId("totp".to_string()),
            name: "Phone".to_string(),
            created_at_unix: 1,
            properties: serde_json::json!({ "secret": "JBSWY3DPEHPK3PXP" }),
            sync_token: None,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("JBSWY3DPEHPK3PXP"));
        assert!(debug.contains("Phone"));
    }

    #[test]
    fn field_errors_display_joins_fields() {
        let mut errors = FieldErrors::single("name", "Required");
        errors.insert("code", "Invalid");
        assert_eq!(errors.to_string(), "code: Invalid; name: Required");
        assert_eq!(errors.get("name"), Some("Required"));
    }
}
