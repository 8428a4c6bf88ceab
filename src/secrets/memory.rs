//! In-memory secret store.
//!
//! Behaves like Secret Manager for the operations the provider uses:
//! versions are numbered from 1, creating an existing secret fails with
//! `AlreadyExists`, and anything missing is `NotFound`. Nothing persists
//! across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{secret_resource_name, SecretStore};
use crate::error::ProviderError;

#[derive(Debug, Default)]
struct SecretEntry {
    /// Payloads, oldest first. Version `n` lives at index `n - 1`.
    versions: Vec<Vec<u8>>,
}

/// Versioned secret store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<String, SecretEntry>>>,
}

impl InMemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the secret container exists.
    pub async fn contains(&self, project_id: &str, secret_id: &str) -> bool {
        self.secrets
            .read()
            .await
            .contains_key(&secret_resource_name(project_id, secret_id))
    }

    /// Number of versions written to a secret, if it exists.
    pub async fn version_count(&self, project_id: &str, secret_id: &str) -> Option<usize> {
        self.secrets
            .read()
            .await
            .get(&secret_resource_name(project_id, secret_id))
            .map(|entry| entry.versions.len())
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn create_secret(&self, project_id: &str, secret_id: &str) -> Result<(), ProviderError> {
        let name = secret_resource_name(project_id, secret_id);
        let mut secrets = self.secrets.write().await;
        if secrets.contains_key(&name) {
            return Err(ProviderError::AlreadyExists(format!(
                "Secret [{}] already exists.",
                name
            )));
        }
        debug!(secret = %name, "creating in-memory secret");
        secrets.insert(name, SecretEntry::default());
        Ok(())
    }

    async fn add_secret_version(
        &self,
        project_id: &str,
        secret_id: &str,
        payload: &[u8],
    ) -> Result<String, ProviderError> {
        let name = secret_resource_name(project_id, secret_id);
        let mut secrets = self.secrets.write().await;
        let entry = secrets
            .get_mut(&name)
            .ok_or_else(|| ProviderError::NotFound(format!("Secret [{}] not found.", name)))?;
        entry.versions.push(payload.to_vec());
        Ok(format!("{}/versions/{}", name, entry.versions.len()))
    }

    async fn access_latest(
        &self,
        project_id: &str,
        secret_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let name = secret_resource_name(project_id, secret_id);
        let secrets = self.secrets.read().await;
        secrets
            .get(&name)
            .and_then(|entry| entry.versions.last())
            .cloned()
            .ok_or_else(|| {
                ProviderError::NotFound(format!("Secret Version [{}/versions/latest] not found.", name))
            })
    }

    async fn delete_secret(&self, project_id: &str, secret_id: &str) -> Result<(), ProviderError> {
        let name = secret_resource_name(project_id, secret_id);
        match self.secrets.write().await.remove(&name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(format!("Secret [{}] not found.", name))),
        }
    }
}
