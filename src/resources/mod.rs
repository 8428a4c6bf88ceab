//! Resources backed by Secret Manager secrets.
//!
//! Every resource stores its payload in the secret named
//! `{namespace}{suffix}` inside `project_id`. The [`Resource`] trait is the
//! per-type CRUD surface; planning, schema validation and not-found
//! handling are shared by the provider.

mod filehosting_hmac;
mod mek;
mod random_string;
mod tls_certificate;

pub use filehosting_hmac::FilehostingHmacSecret;
pub use mek::{Keyset, Mek};
pub use random_string::{RandomString, RandomStringType};
pub use tls_certificate::TlsCertificate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::secrets::{secret_id, SecretStore};

/// CRUD operations of one resource type.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name without the provider prefix, e.g. `mek`.
    fn name(&self) -> &'static str;

    /// Human-readable name used in error summaries, e.g. `MEK`.
    fn display_name(&self) -> &'static str;

    /// Resource schema.
    fn schema(&self) -> Schema;

    /// Computed attributes that keep their value across in-place updates.
    fn stable_computed(&self) -> &'static [&'static str] {
        &["secret_id"]
    }

    /// Checks beyond schema validation.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create the secret and write the first version.
    async fn create(&self, store: &dyn SecretStore, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh state from the latest version.
    async fn read(&self, store: &dyn SecretStore, current: Value) -> Result<Value, ProviderError>;

    /// Write a new version to the existing secret.
    async fn update(
        &self,
        store: &dyn SecretStore,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the secret and all of its versions.
    async fn delete(&self, store: &dyn SecretStore, current: Value) -> Result<(), ProviderError> {
        let location = SecretLocation::from_state(&current)?;
        location
            .delete(store)
            .await
            .map_err(|e| e.context(format!("Failed to delete {}", self.display_name())))
    }

    /// Partial state reconstructed from an import id; read fills in the rest.
    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let parts = split_import_id(id, &[])?;
        Ok(serde_json::json!({
            "project_id": parts[0],
            "namespace": parts[1],
            "suffix": parts[2],
        }))
    }
}

/// All resources served by the provider.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(Mek),
        Box::new(RandomString),
        Box::new(TlsCertificate),
        Box::new(FilehostingHmacSecret),
    ]
}

/// The attributes that locate a resource's secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretLocation {
    /// GCP project holding the secret.
    pub project_id: String,
    /// ClearBlade instance namespace.
    pub namespace: String,
    /// Appended to the namespace to form the secret id.
    pub suffix: String,
}

impl SecretLocation {
    /// Extract the location from a state or plan value.
    pub fn from_state(state: &Value) -> Result<Self, ProviderError> {
        SecretLocation::deserialize(state).map_err(|e| {
            ProviderError::Validation(format!("Invalid resource state: {}", e))
        })
    }

    /// `namespace + suffix`.
    pub fn secret_id(&self) -> String {
        secret_id(&self.namespace, &self.suffix)
    }

    /// Create the secret container.
    pub async fn create(&self, store: &dyn SecretStore) -> Result<(), ProviderError> {
        store
            .create_secret(&self.project_id, &self.secret_id())
            .await
            .map_err(|e| e.context("Failed to create secret"))
    }

    /// Append a version.
    pub async fn write(&self, store: &dyn SecretStore, payload: &[u8]) -> Result<String, ProviderError> {
        store
            .add_secret_version(&self.project_id, &self.secret_id(), payload)
            .await
    }

    /// Read the latest version.
    pub async fn read(&self, store: &dyn SecretStore) -> Result<Vec<u8>, ProviderError> {
        store.access_latest(&self.project_id, &self.secret_id()).await
    }

    /// Delete the secret.
    pub async fn delete(&self, store: &dyn SecretStore) -> Result<(), ProviderError> {
        store.delete_secret(&self.project_id, &self.secret_id()).await
    }
}

/// Add `project_id`, `namespace`, `suffix` and `secret_id` to a resource schema.
pub fn with_location_attributes(schema: Schema, project_description: &str) -> Schema {
    schema
        .with_attribute(
            "project_id",
            Attribute::required_string()
                .with_description(project_description)
                .with_force_new(),
        )
        .with_attribute(
            "namespace",
            Attribute::required_string()
                .with_description("Instance namespace")
                .with_force_new(),
        )
        .with_attribute(
            "suffix",
            Attribute::required_string()
                .with_description("Secret Id suffix")
                .with_force_new(),
        )
        .with_attribute(
            "secret_id",
            Attribute::computed_string().with_description("Secret Manager secret id"),
        )
}

/// Split an import id of the form `project_id/namespace/suffix[/extra...]`.
pub(crate) fn split_import_id<'a>(
    id: &'a str,
    extra: &[&str],
) -> Result<Vec<&'a str>, ProviderError> {
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() != 3 + extra.len() || parts.iter().any(|p| p.is_empty()) {
        let mut expected = String::from("project_id/namespace/suffix");
        for name in extra {
            expected.push('/');
            expected.push_str(name);
        }
        return Err(ProviderError::Validation(format!(
            "Invalid import id \"{}\": expected {}",
            id, expected
        )));
    }
    Ok(parts)
}
