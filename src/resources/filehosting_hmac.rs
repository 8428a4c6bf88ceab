//! HMAC signing key for the file-hosting service.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use zeroize::Zeroizing;

use super::{with_location_attributes, Resource, SecretLocation};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::secrets::SecretStore;

const GENERATED_KEY_BYTES: usize = 32;

/// 32 random bytes as 64 lowercase hex characters.
pub fn generate_hmac_key() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; GENERATED_KEY_BYTES]);
    rand::rng().fill(&mut bytes[..]);

    Zeroizing::new(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

#[derive(Debug, Serialize, Deserialize)]
struct HmacState {
    #[serde(flatten)]
    location: SecretLocation,
    #[serde(default)]
    hmac_key: Option<String>,
    #[serde(default)]
    secret_id: Option<String>,
}

impl HmacState {
    fn from_value(value: Value) -> Result<Self, ProviderError> {
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Validation(format!("Invalid HMAC secret state: {}", e)))
    }

    /// The configured key, or a freshly generated one recorded in state.
    fn resolve_key(&mut self) -> Zeroizing<String> {
        match self.hmac_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Zeroizing::new(key.to_string()),
            None => {
                let key = generate_hmac_key();
                self.hmac_key = Some(key.to_string());
                key
            },
        }
    }
}

/// `clearblade-google_filehosting_hmac_secret`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilehostingHmacSecret;

#[async_trait]
impl Resource for FilehostingHmacSecret {
    fn name(&self) -> &'static str {
        "filehosting_hmac_secret"
    }

    fn display_name(&self) -> &'static str {
        "HMAC secret"
    }

    fn schema(&self) -> Schema {
        with_location_attributes(
            Schema::v0().with_description("File hosting HMAC key stored in GCP Secrets"),
            "GCP project Id for storing the HMAC key",
        )
        .with_attribute(
            "hmac_key",
            Attribute::optional_computed_string()
                .sensitive()
                .with_description("Hex encoded HMAC key, generated when unset"),
        )
    }

    async fn create(&self, store: &dyn SecretStore, planned: Value) -> Result<Value, ProviderError> {
        let mut state = HmacState::from_value(planned)?;
        state.location.create(store).await?;
        state.secret_id = Some(state.location.secret_id());

        let key = state.resolve_key();
        state
            .location
            .write(store, key.as_bytes())
            .await
            .map_err(|e| e.context("Failed to create HMAC secret"))?;
        info!(secret_id = %state.location.secret_id(), "stored file hosting HMAC key");
        Ok(serde_json::to_value(state)?)
    }

    async fn read(&self, store: &dyn SecretStore, current: Value) -> Result<Value, ProviderError> {
        let mut state = HmacState::from_value(current)?;
        let payload = Zeroizing::new(
            state
                .location
                .read(store)
                .await
                .map_err(|e| e.context("Failed to get HMAC secret"))?,
        );
        if payload.is_empty() {
            return Err(ProviderError::Sdk(
                "Failed to get HMAC secret data: Empty payload".to_string(),
            ));
        }
        let stored = String::from_utf8(payload.to_vec())
            .map_err(|_| ProviderError::Sdk("Failed to read HMAC secret: not UTF-8".to_string()))?;
        state.hmac_key = Some(stored);
        state.secret_id = Some(state.location.secret_id());
        Ok(serde_json::to_value(state)?)
    }

    async fn update(
        &self,
        store: &dyn SecretStore,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let mut state = HmacState::from_value(planned)?;
        let key = state.resolve_key();
        state
            .location
            .write(store, key.as_bytes())
            .await
            .map_err(|e| e.context("Failed to update HMAC secret"))?;
        state.secret_id = Some(state.location.secret_id());
        Ok(serde_json::to_value(state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretStore;
    use serde_json::json;

    fn planned(key: Value) -> Value {
        json!({
            "project_id": "p", "namespace": "acme", "suffix": "-hmac",
            "hmac_key": key, "secret_id": null
        })
    }

    #[test]
    fn test_generated_key_is_lowercase_hex() {
        let key = generate_hmac_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_ne!(*key, *generate_hmac_key());
    }

    #[test]
    fn test_hmac_key_is_optional_computed() {
        let schema = FilehostingHmacSecret.schema();
        let attr = schema.attribute("hmac_key").unwrap();
        assert!(attr.flags.optional && attr.flags.computed && attr.flags.sensitive);
    }

    #[tokio::test]
    async fn test_create_generates_key() {
        let store = InMemorySecretStore::new();
        let created = FilehostingHmacSecret.create(&store, planned(Value::Null)).await.unwrap();

        let key = created["hmac_key"].as_str().unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(created["secret_id"], "acme-hmac");
        assert_eq!(store.access_latest("p", "acme-hmac").await.unwrap(), key.as_bytes());
    }

    #[tokio::test]
    async fn test_create_with_configured_key() {
        let store = InMemorySecretStore::new();
        let created = FilehostingHmacSecret
            .create(&store, planned(json!("deadbeef")))
            .await
            .unwrap();
        assert_eq!(created["hmac_key"], "deadbeef");
        assert_eq!(store.access_latest("p", "acme-hmac").await.unwrap(), b"deadbeef");
    }

    #[tokio::test]
    async fn test_empty_key_is_generated() {
        let store = InMemorySecretStore::new();
        let created = FilehostingHmacSecret.create(&store, planned(json!(""))).await.unwrap();
        assert_eq!(created["hmac_key"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_import_reads_key() {
        let store = InMemorySecretStore::new();
        FilehostingHmacSecret.create(&store, planned(json!("cafe"))).await.unwrap();

        let imported = FilehostingHmacSecret.import_state("p/acme/-hmac").unwrap();
        let state = FilehostingHmacSecret.read(&store, imported).await.unwrap();
        assert_eq!(state["hmac_key"], "cafe");
        assert_eq!(state["secret_id"], "acme-hmac");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemorySecretStore::new();
        let created = FilehostingHmacSecret.create(&store, planned(json!("aa"))).await.unwrap();
        FilehostingHmacSecret
            .update(&store, created.clone(), planned(json!("bb")))
            .await
            .unwrap();
        assert_eq!(store.access_latest("p", "acme-hmac").await.unwrap(), b"bb");

        FilehostingHmacSecret.delete(&store, created).await.unwrap();
        assert!(!store.contains("p", "acme-hmac").await);
    }
}
