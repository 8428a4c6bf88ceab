//! Master encryption key resource.
//!
//! The payload is an AES-256-GCM keyset in Tink's cleartext JSON keyset
//! format, so ClearBlade can load it with any Tink implementation. State
//! only records the keyset info (ids, type url, status), never key material.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{with_location_attributes, Resource, SecretLocation};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::secrets::SecretStore;

const AES_GCM_TYPE_URL: &str = "type.googleapis.com/google.crypto.tink.AesGcmKey";
const AES_256_KEY_SIZE: usize = 32;

/// Field 3 (`key_value`), wire type 2, followed by the 32-byte length.
const AES_GCM_KEY_PREFIX: [u8; 2] = [0x1a, AES_256_KEY_SIZE as u8];

/// Cleartext Tink keyset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyset {
    /// Id of the key used for encryption.
    pub primary_key_id: u32,
    /// Keys in the set.
    pub key: Vec<KeysetKey>,
}

/// One key of a [`Keyset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysetKey {
    /// Key material and type.
    pub key_data: KeyData,
    /// `ENABLED`, `DISABLED` or `DESTROYED`.
    pub status: String,
    /// Key id, unique within the keyset.
    pub key_id: u32,
    /// Ciphertext prefix scheme, `TINK` for new keys.
    pub output_prefix_type: String,
}

/// Serialized key of a [`KeysetKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyData {
    /// Protobuf type URL of the key.
    pub type_url: String,
    /// Base64 of the serialized key proto.
    pub value: String,
    /// `SYMMETRIC` for AEAD keys.
    pub key_material_type: String,
}

impl Keyset {
    /// Generate a keyset holding one fresh AES-256-GCM key.
    pub fn generate_aes256_gcm() -> Self {
        let mut rng = rand::rng();
        let key_id: u32 = rng.random_range(1..=u32::MAX);

        let mut key_proto = Zeroizing::new(Vec::with_capacity(AES_GCM_KEY_PREFIX.len() + AES_256_KEY_SIZE));
        key_proto.extend_from_slice(&AES_GCM_KEY_PREFIX);
        key_proto.resize(AES_GCM_KEY_PREFIX.len() + AES_256_KEY_SIZE, 0);
        rng.fill(&mut key_proto[AES_GCM_KEY_PREFIX.len()..]);

        Self {
            primary_key_id: key_id,
            key: vec![KeysetKey {
                key_data: KeyData {
                    type_url: AES_GCM_TYPE_URL.to_string(),
                    value: general_purpose::STANDARD.encode(key_proto.as_slice()),
                    key_material_type: "SYMMETRIC".to_string(),
                },
                status: "ENABLED".to_string(),
                key_id,
                output_prefix_type: "TINK".to_string(),
            }],
        }
    }

    /// Parse and check a cleartext JSON keyset.
    pub fn parse(payload: &[u8]) -> Result<Self, ProviderError> {
        let keyset: Keyset = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::Validation(format!("invalid keyset JSON: {}", e)))?;

        if keyset.key.is_empty() {
            return Err(ProviderError::Validation("empty keyset".to_string()));
        }
        if !keyset.key.iter().any(|k| k.key_id == keyset.primary_key_id) {
            return Err(ProviderError::Validation(format!(
                "keyset does not contain a key with primary key id {}",
                keyset.primary_key_id
            )));
        }
        for key in &keyset.key {
            if key.key_data.type_url == AES_GCM_TYPE_URL {
                let proto = Zeroizing::new(
                    general_purpose::STANDARD
                        .decode(&key.key_data.value)
                        .map_err(|e| ProviderError::Validation(format!("invalid key data: {}", e)))?,
                );
                if proto.len() != AES_GCM_KEY_PREFIX.len() + AES_256_KEY_SIZE
                    || !proto.starts_with(&AES_GCM_KEY_PREFIX)
                {
                    return Err(ProviderError::Validation(format!(
                        "key {} is not a 256-bit AES-GCM key",
                        key.key_id
                    )));
                }
            }
        }
        Ok(keyset)
    }

    /// Serialize to the JSON payload stored in Secret Manager.
    pub fn to_json(&self) -> Result<Zeroizing<Vec<u8>>, ProviderError> {
        Ok(Zeroizing::new(serde_json::to_vec(self)?))
    }

    /// Keyset info in protobuf text format, without key material.
    ///
    /// ```
    /// use clearblade_google_provider::resources::Keyset;
    ///
    /// let keyset = Keyset::generate_aes256_gcm();
    /// let info = keyset.info();
    /// assert!(info.starts_with(&format!("primary_key_id:{}", keyset.primary_key_id)));
    /// assert!(!info.contains(&keyset.key[0].key_data.value));
    /// ```
    pub fn info(&self) -> String {
        let mut info = format!("primary_key_id:{}", self.primary_key_id);
        for key in &self.key {
            info.push_str(&format!(
                " key_info:{{type_url:\"{}\" status:{} key_id:{} output_prefix_type:{}}}",
                key.key_data.type_url, key.status, key.key_id, key.output_prefix_type
            ));
        }
        info
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MekState {
    #[serde(flatten)]
    location: SecretLocation,
    #[serde(default)]
    secret_id: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

impl MekState {
    fn from_value(value: Value) -> Result<Self, ProviderError> {
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Validation(format!("Invalid MEK state: {}", e)))
    }

    fn into_value(self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// `clearblade-google_mek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mek;

impl Mek {
    async fn write_new_keyset(
        &self,
        store: &dyn SecretStore,
        location: &SecretLocation,
    ) -> Result<String, ProviderError> {
        let keyset = Keyset::generate_aes256_gcm();
        let payload = keyset
            .to_json()
            .map_err(|e| e.context("Failed to create new MEK"))?;
        location
            .write(store, &payload)
            .await
            .map_err(|e| e.context("Failed to write MEK to GCP Secrets"))?;
        info!(secret_id = %location.secret_id(), "created and stored MEK to GCP secrets");
        Ok(keyset.info())
    }
}

#[async_trait]
impl Resource for Mek {
    fn name(&self) -> &'static str {
        "mek"
    }

    fn display_name(&self) -> &'static str {
        "MEK"
    }

    fn schema(&self) -> Schema {
        with_location_attributes(
            Schema::v0().with_description("ClearBlade Master Encryption Key"),
            "GCP project Id for storing MEK",
        )
        .with_attribute(
            "key",
            Attribute::computed_string().with_description("Keyset info (no key material)"),
        )
    }

    async fn create(&self, store: &dyn SecretStore, planned: Value) -> Result<Value, ProviderError> {
        let mut state = MekState::from_value(planned)?;
        state.location.create(store).await?;
        state.secret_id = Some(state.location.secret_id());
        state.key = Some(self.write_new_keyset(store, &state.location).await?);
        state.into_value()
    }

    async fn read(&self, store: &dyn SecretStore, current: Value) -> Result<Value, ProviderError> {
        let mut state = MekState::from_value(current)?;
        let payload = Zeroizing::new(
            state
                .location
                .read(store)
                .await
                .map_err(|e| e.context("Failed to get MEK secret"))?,
        );
        let keyset = Keyset::parse(&payload).map_err(|e| e.context("Failed to read MEK"))?;
        debug!(primary_key_id = keyset.primary_key_id, "read MEK keyset");

        state.key = Some(keyset.info());
        state.secret_id = Some(state.location.secret_id());
        state.into_value()
    }

    async fn update(
        &self,
        store: &dyn SecretStore,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let mut state = MekState::from_value(planned)?;
        state.key = Some(self.write_new_keyset(store, &state.location).await?);
        state.secret_id = Some(state.location.secret_id());
        state.into_value()
    }
}
