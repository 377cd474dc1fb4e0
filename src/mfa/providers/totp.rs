//! Time-based one-time password factors (RFC 6238, via `totp-rs`).
//!
//! Enrollment is a two-step exchange: the form carries a freshly generated
//! secret (parked in the sync-token store) and the user proves they loaded it
//! by submitting a current code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::{collections::BTreeMap, sync::Arc};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::mfa::{
    provider::{CreateOutcome, FactorDraft, FactorProvider, ProviderStatus, SortVector},
    Account, EnrollmentForm, FactorConfig, FactorInput, FieldErrors, FormField, ProviderId,
    SyncTokenStore,
};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;
const MAX_FACTORS_PER_ACCOUNT: usize = 5;

pub struct TotpProvider {
    id: ProviderId,
    issuer: String,
    status: ProviderStatus,
    sync_tokens: Arc<SyncTokenStore>,
}

impl TotpProvider {
    /// # Errors
    /// Returns an error if the built-in provider id fails validation.
    pub fn new(issuer: &str, sync_tokens: Arc<SyncTokenStore>) -> Result<Self> {
        Ok(Self {
            id: ProviderId::parse("totp").map_err(|e| anyhow!(e))?,
            issuer: issuer.to_string(),
            status: ProviderStatus::Active,
            sync_tokens,
        })
    }

    #[must_use]
    pub fn with_status(mut self, status: ProviderStatus) -> Self {
        self.status = status;
        self
    }

    fn totp(&self, secret_base32: &str, account_name: &str) -> Result<TOTP> {
        let secret = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("TOTP secret decode error: {e:?}"))?;
        // otpauth labels use ':' as the issuer separator
        let account_name = account_name.replace(':', "_");
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret,
            Some(self.issuer.clone()),
            account_name,
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    fn check(&self, secret_base32: &str, code: &str) -> Result<bool> {
        let totp = self.totp(secret_base32, "user")?;
        Ok(totp.check_current(code).unwrap_or(false))
    }
}

#[async_trait]
impl FactorProvider for TotpProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Mobile Phone App (TOTP)"
    }

    fn display_description(&self) -> &str {
        "Attach a mobile authenticator application (like Authy or Google Authenticator) to your account."
    }

    fn status(&self) -> ProviderStatus {
        self.status
    }

    fn sort_vector(&self) -> SortVector {
        SortVector {
            priority: 1000,
            name: self.display_name().to_string(),
        }
    }

    async fn can_create_new_configuration(&self, account: &Account) -> Result<bool> {
        Ok(account.factors_from(&self.id) < MAX_FACTORS_PER_ACCOUNT)
    }

    fn create_description(&self, account: &Account) -> Option<String> {
        (account.factors_from(&self.id) >= MAX_FACTORS_PER_ACCOUNT).then(|| {
            format!("You already have {MAX_FACTORS_PER_ACCOUNT} authenticator apps attached.")
        })
    }

    fn enroll_description(&self, account: &Account) -> String {
        format!(
            "To add a TOTP factor to {}, download an authenticator application on your phone. \
             You will scan a code and then enter a code it generates.",
            account.username
        )
    }

    fn enroll_button_text(&self) -> String {
        "Continue".to_string()
    }

    async fn enrollment_form(&self, account: &Account) -> Result<EnrollmentForm> {
        let secret = Secret::generate_secret().to_encoded();
        let Secret::Encoded(secret_base32) = secret else {
            return Err(anyhow!("TOTP secret encode error"));
        };
        let url = self.totp(&secret_base32, &account.username)?.get_url();
        let sync_token = self
            .sync_tokens
            .issue(account.id, SecretString::from(secret_base32.clone()))
            .await;

        let mut data = BTreeMap::new();
        data.insert("secret".to_string(), secret_base32);
        data.insert("otpauth_url".to_string(), url);
        Ok(EnrollmentForm {
            title: "Add authenticator app".to_string(),
            instructions: "Scan the code (or enter the secret) in your authenticator app, then enter the code it shows.".to_string(),
            fields: vec![
                FormField {
                    name: "name".to_string(),
                    label: "Name".to_string(),
                    value: None,
                },
                FormField {
                    name: "code".to_string(),
                    label: "App code".to_string(),
                    value: None,
                },
            ],
            sync_token: Some(sync_token),
            data,
        })
    }

    async fn create_configuration(
        &self,
        account: &Account,
        input: &FactorInput,
    ) -> Result<CreateOutcome> {
        let Some(sync_token) = input.sync_token else {
            return Ok(CreateOutcome::Rejected(FieldErrors::single(
                "code",
                "Enrollment expired, reload the form",
            )));
        };
        let Some(secret) = self.sync_tokens.load(account.id, sync_token).await else {
            return Ok(CreateOutcome::Rejected(FieldErrors::single(
                "code",
                "Enrollment expired, reload the form",
            )));
        };
        let Some(code) = input.field("code") else {
            return Ok(CreateOutcome::Rejected(FieldErrors::single(
                "code", "Required",
            )));
        };
        if !self.check(secret.expose_secret(), code)? {
            return Ok(CreateOutcome::Rejected(FieldErrors::single(
                "code",
                "Invalid code",
            )));
        }

        Ok(CreateOutcome::Created(FactorDraft {
            name: input
                .field("name")
                .unwrap_or(self.display_name())
                .to_string(),
            properties: serde_json::json!({ "secret": secret.expose_secret() }),
            sync_token: Some(sync_token),
        }))
    }

    async fn verify_challenge_response(
        &self,
        _account: &Account,
        config: &FactorConfig,
        response: &str,
    ) -> Result<bool> {
        let Some(secret) = config.properties.get("secret").and_then(|v| v.as_str()) else {
            return Err(anyhow!("TOTP factor {} has no secret", config.id));
        };
        self.check(secret, response.trim())
    }
}
