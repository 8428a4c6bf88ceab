//! Random password / registration key resource.
//!
//! The secret holds the plaintext. For passwords, state only keeps the
//! URL-safe base64 of its SHA-512 digest; registration keys are kept as is.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha512};
use tracing::info;
use zeroize::Zeroizing;

use super::{split_import_id, with_location_attributes, Resource, SecretLocation};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::secrets::SecretStore;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Kind of generated string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomStringType {
    /// 6 to 30 characters, state holds its hash.
    Password,
    /// 6 to 10 characters, state holds the plaintext.
    RegistrationKey,
}

impl RandomStringType {
    /// Parse the `type` attribute.
    pub fn parse(value: &str) -> Result<Self, ProviderError> {
        match value {
            "password" => Ok(Self::Password),
            "registration_key" => Ok(Self::RegistrationKey),
            other => Err(ProviderError::Validation(format!(
                "Invalid type attribute: {}",
                other
            ))),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::RegistrationKey => "registration key",
        }
    }

    /// Check `length` against the bounds for this type.
    pub fn validate_length(self, length: i64) -> Result<(), ProviderError> {
        let (name, max) = match self {
            Self::Password => ("Password", 30),
            Self::RegistrationKey => ("Registration key", 10),
        };
        if length < 6 {
            Err(ProviderError::Validation(format!(
                "{} length must be greater than or equal to 6",
                name
            )))
        } else if length > max {
            Err(ProviderError::Validation(format!(
                "{} length cannot be greater than {}",
                name, max
            )))
        } else {
            Ok(())
        }
    }

    /// The `value` attribute derived from the stored plaintext.
    pub fn state_value(self, plaintext: &str) -> String {
        match self {
            Self::Password => hash_password(plaintext),
            Self::RegistrationKey => plaintext.to_string(),
        }
    }
}

/// `length` characters drawn uniformly from `[0-9A-Za-z]`.
pub fn generate_random_string(length: usize) -> Zeroizing<String> {
    let mut rng = rand::rng();
    Zeroizing::new(
        (0..length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect(),
    )
}

/// URL-safe, padded base64 of the SHA-512 digest.
pub fn hash_password(password: &str) -> String {
    let digest = Sha512::digest(password.as_bytes());
    general_purpose::URL_SAFE.encode(digest)
}

#[derive(Debug, Serialize, Deserialize)]
struct RandomStringState {
    #[serde(flatten)]
    location: SecretLocation,
    #[serde(rename = "type")]
    string_type: String,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    secret_id: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

impl RandomStringState {
    fn from_value(value: Value) -> Result<Self, ProviderError> {
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Validation(format!("Invalid random string state: {}", e)))
    }

    fn string_type(&self) -> Result<RandomStringType, ProviderError> {
        RandomStringType::parse(&self.string_type)
    }

    /// Validated length for the configured type.
    fn checked_length(&self) -> Result<(RandomStringType, usize), ProviderError> {
        let string_type = self.string_type()?;
        let length = self
            .length
            .ok_or_else(|| ProviderError::Validation("length is required".to_string()))?;
        string_type
            .validate_length(length)
            .map_err(|e| e.context(format!("Invalid {} length", string_type.label())))?;
        Ok((string_type, length as usize))
    }
}

/// `clearblade-google_random_string`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomString;

impl RandomString {
    /// Validate, generate and write a new version. Returns the state `value`.
    async fn write_new_value(
        &self,
        store: &dyn SecretStore,
        state: &RandomStringState,
    ) -> Result<String, ProviderError> {
        let (string_type, length) = state.checked_length()?;
        let plaintext = generate_random_string(length);
        state
            .location
            .write(store, plaintext.as_bytes())
            .await
            .map_err(|e| e.context(format!("Failed to add {} to secret", string_type.label())))?;
        info!(secret_id = %state.location.secret_id(), kind = string_type.label(), "stored random string");
        Ok(string_type.state_value(&plaintext))
    }
}

#[async_trait]
impl Resource for RandomString {
    fn name(&self) -> &'static str {
        "random_string"
    }

    fn display_name(&self) -> &'static str {
        "random string"
    }

    fn schema(&self) -> Schema {
        with_location_attributes(
            Schema::v0().with_description("ClearBlade random password or registration key"),
            "GCP project Id for storing the random string",
        )
        .with_attribute(
            "type",
            Attribute::required_string().with_description("Either `password` or `registration_key`"),
        )
        .with_attribute(
            "length",
            Attribute::required_int64().with_description("Number of characters to generate"),
        )
        .with_attribute(
            "value",
            Attribute::computed_string()
                .sensitive()
                .with_description("Password hash, or the registration key itself"),
        )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let Some(type_value) = config.get("type").and_then(Value::as_str) else {
            return Vec::new();
        };
        let string_type = match RandomStringType::parse(type_value) {
            Ok(t) => t,
            Err(_) => {
                return vec![Diagnostic::error("Invalid type attribute")
                    .with_detail(type_value)
                    .with_attribute("type")]
            },
        };
        match config.get("length").and_then(Value::as_i64) {
            Some(length) => match string_type.validate_length(length) {
                Ok(()) => Vec::new(),
                Err(e) => vec![Diagnostic::error(format!(
                    "Invalid {} length",
                    string_type.label()
                ))
                .with_detail(e.message())
                .with_attribute("length")],
            },
            None => Vec::new(),
        }
    }

    async fn create(&self, store: &dyn SecretStore, planned: Value) -> Result<Value, ProviderError> {
        let mut state = RandomStringState::from_value(planned)?;
        let string_type = state.string_type()?;

        let created: Result<String, ProviderError> = async {
            state.checked_length()?;
            state.location.create(store).await?;
            self.write_new_value(store, &state).await
        }
        .await;
        let value = created.map_err(|e| e.context(format!("Failed to create {}", string_type.label())))?;

        state.secret_id = Some(state.location.secret_id());
        state.value = Some(value);
        Ok(serde_json::to_value(state)?)
    }

    async fn read(&self, store: &dyn SecretStore, current: Value) -> Result<Value, ProviderError> {
        let mut state = RandomStringState::from_value(current)?;
        let string_type = state.string_type()?;
        let payload = Zeroizing::new(
            state
                .location
                .read(store)
                .await
                .map_err(|e| e.context("Failed to get random string secret"))?,
        );
        let plaintext = std::str::from_utf8(&payload)
            .map_err(|e| ProviderError::Sdk(format!("Random string payload is not UTF-8: {}", e)))?;

        // Imported state has no length yet.
        if state.length.is_none() {
            state.length = Some(plaintext.chars().count() as i64);
        }
        state.secret_id = Some(state.location.secret_id());
        state.value = Some(string_type.state_value(plaintext));
        Ok(serde_json::to_value(state)?)
    }

    async fn update(
        &self,
        store: &dyn SecretStore,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let mut state = RandomStringState::from_value(planned)?;
        let string_type = state.string_type()?;
        let value = self
            .write_new_value(store, &state)
            .await
            .map_err(|e| e.context(format!("Failed to update {}", string_type.label())))?;
        state.secret_id = Some(state.location.secret_id());
        state.value = Some(value);
        Ok(serde_json::to_value(state)?)
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let parts = split_import_id(id, &["type"])?;
        RandomStringType::parse(parts[3])?;
        Ok(serde_json::json!({
            "project_id": parts[0],
            "namespace": parts[1],
            "suffix": parts[2],
            "type": parts[3],
        }))
    }
}
