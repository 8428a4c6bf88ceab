//! Secret Manager REST v1 client.
//!
//! Talks to `secretmanager.googleapis.com` (or an emulator) with a bearer
//! token. Payload bytes travel base64-encoded in JSON, as the API requires.
//!
//! Reference: <https://cloud.google.com/secret-manager/docs/reference/rest>

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{secret_resource_name, SecretStore};
use crate::error::ProviderError;

/// Public Secret Manager endpoint.
pub const DEFAULT_SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Cached metadata tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where the client gets its OAuth2 access token from.
#[derive(Clone)]
pub enum AccessTokenSource {
    /// A fixed token supplied by configuration or the environment.
    Static(Zeroizing<String>),
    /// The GCE/GKE metadata server token endpoint.
    Metadata {
        /// Token endpoint URL.
        url: String,
    },
}

impl AccessTokenSource {
    /// A fixed token.
    pub fn token(token: impl Into<String>) -> Self {
        Self::Static(Zeroizing::new(token.into()))
    }

    /// The default metadata server endpoint.
    pub fn metadata_server() -> Self {
        Self::Metadata {
            url: METADATA_TOKEN_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for AccessTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(<redacted>)"),
            Self::Metadata { url } => f.debug_struct("Metadata").field("url", url).finish(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Replication {
    automatic: AutomaticReplication,
}

#[derive(Debug, Serialize)]
struct AutomaticReplication {}

#[derive(Debug, Serialize)]
struct CreateSecretRequest {
    replication: Replication,
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretPayload {
    /// Base64 of the raw payload bytes.
    data: String,
}

#[derive(Debug, Serialize)]
struct AddVersionRequest {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretVersionResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct GcpErrorResponse {
    error: GcpError,
}

#[derive(Debug, Deserialize)]
struct GcpError {
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    token: Zeroizing<String>,
    expires_at: Instant,
}

/// Secret Manager client over the REST API.
pub struct SecretManagerRest {
    http_client: Client,
    base_url: String,
    quota_project: Option<String>,
    tokens: AccessTokenSource,
    cached_token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for SecretManagerRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManagerRest")
            .field("base_url", &self.base_url)
            .field("quota_project", &self.quota_project)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl SecretManagerRest {
    /// Build a client for `base_url`, e.g. [`DEFAULT_SECRET_MANAGER_ENDPOINT`].
    ///
    /// `quota_project` is sent as `x-goog-user-project` on every call.
    pub fn new(
        base_url: impl Into<String>,
        quota_project: Option<String>,
        tokens: AccessTokenSource,
    ) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(endpoint = %base_url, "Secret Manager client initialized");

        Ok(Self {
            http_client,
            base_url,
            quota_project,
            tokens,
            cached_token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<Zeroizing<String>, ProviderError> {
        let url = match &self.tokens {
            AccessTokenSource::Static(token) => return Ok(token.clone()),
            AccessTokenSource::Metadata { url } => url,
        };

        let mut cached = self.cached_token.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        debug!("fetching access token from metadata server");
        let response = self
            .http_client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                ProviderError::Configuration(format!(
                    "Failed to get access token from metadata server: {}",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Configuration(format!(
                "Metadata server returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let token_value = Zeroizing::new(token.access_token);
        *cached = Some(CachedToken {
            token: token_value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        info!(expires_in = token.expires_in, "Retrieved access token from metadata server");
        Ok(token_value)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/{}", self.base_url, path);
        let token = self.access_token().await?;

        let mut request = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(token.as_str());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(project) = &self.quota_project {
            request = request.header("x-goog-user-project", project);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, path, "Secret Manager request");
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<GcpErrorResponse>(&body) {
        Ok(parsed) if parsed.error.status.is_empty() => parsed.error.message,
        Ok(parsed) => format!("{} ({})", parsed.error.message, parsed.error.status),
        Err(_) => body,
    };
    warn!(status, "Secret Manager request failed");
    ProviderError::from_http_status(status, message)
}

#[async_trait]
impl SecretStore for SecretManagerRest {
    async fn create_secret(&self, project_id: &str, secret_id: &str) -> Result<(), ProviderError> {
        let body = CreateSecretRequest {
            replication: Replication {
                automatic: AutomaticReplication {},
            },
        };
        self.send(
            Method::POST,
            &format!("projects/{}/secrets", project_id),
            &[("secretId", secret_id)],
            Some(&body),
        )
        .await?;
        info!(project_id, secret_id, "Created secret");
        Ok(())
    }

    async fn add_secret_version(
        &self,
        project_id: &str,
        secret_id: &str,
        payload: &[u8],
    ) -> Result<String, ProviderError> {
        let body = AddVersionRequest {
            payload: SecretPayload {
                data: general_purpose::STANDARD.encode(payload),
            },
        };
        let response = self
            .send(
                Method::POST,
                &format!("{}:addVersion", secret_resource_name(project_id, secret_id)),
                &[],
                Some(&body),
            )
            .await?;
        let version: SecretVersionResponse = response.json().await?;
        info!(version = %version.name, "Added secret version");
        Ok(version.name)
    }

    async fn access_latest(
        &self,
        project_id: &str,
        secret_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .send::<()>(
                Method::GET,
                &format!(
                    "{}/versions/latest:access",
                    secret_resource_name(project_id, secret_id)
                ),
                &[],
                None,
            )
            .await?;
        let access: AccessSecretVersionResponse = response.json().await?;
        general_purpose::STANDARD
            .decode(access.payload.data.as_bytes())
            .map_err(|e| ProviderError::Sdk(format!("Invalid secret payload encoding: {}", e)))
    }

    async fn delete_secret(&self, project_id: &str, secret_id: &str) -> Result<(), ProviderError> {
        self.send::<()>(
            Method::DELETE,
            &secret_resource_name(project_id, secret_id),
            &[],
            None,
        )
        .await?;
        info!(project_id, secret_id, "Deleted secret");
        Ok(())
    }
}
