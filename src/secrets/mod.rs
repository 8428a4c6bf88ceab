//! Google Secret Manager access.
//!
//! Every resource goes through the [`SecretStore`] trait, so the provider
//! holds exactly one client: [`SecretManagerRest`] in production and
//! [`InMemorySecretStore`] in tests.

mod gcp;
mod memory;

pub use gcp::{AccessTokenSource, SecretManagerRest, DEFAULT_SECRET_MANAGER_ENDPOINT};
pub use memory::InMemorySecretStore;

use async_trait::async_trait;

use crate::error::ProviderError;

/// Operations the resources need from Secret Manager.
#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Create an empty secret container with automatic replication.
    async fn create_secret(&self, project_id: &str, secret_id: &str) -> Result<(), ProviderError>;

    /// Append a version holding `payload`, returning the version resource name.
    async fn add_secret_version(
        &self,
        project_id: &str,
        secret_id: &str,
        payload: &[u8],
    ) -> Result<String, ProviderError>;

    /// Read the payload of the latest enabled version.
    async fn access_latest(&self, project_id: &str, secret_id: &str)
        -> Result<Vec<u8>, ProviderError>;

    /// Delete the secret and all of its versions.
    async fn delete_secret(&self, project_id: &str, secret_id: &str) -> Result<(), ProviderError>;
}

/// Secret identifier for an instance: the namespace followed by the suffix.
///
/// ```
/// use clearblade_google_provider::secrets::secret_id;
///
/// assert_eq!(secret_id("acme", "-mek"), "acme-mek");
/// ```
pub fn secret_id(namespace: &str, suffix: &str) -> String {
    format!("{}{}", namespace, suffix)
}

/// Full resource name, `projects/{project}/secrets/{secret}`.
pub fn secret_resource_name(project_id: &str, secret_id: &str) -> String {
    format!("projects/{}/secrets/{}", project_id, secret_id)
}

/// Resource name of the latest version of a secret.
pub fn latest_version_name(project_id: &str, secret_id: &str) -> String {
    format!("{}/versions/latest", secret_resource_name(project_id, secret_id))
}
