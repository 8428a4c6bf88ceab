//! Provider configuration.
//!
//! The host sends the provider block as JSON in `configure`. Unset values
//! fall back to the environment:
//!
//! - `GOOGLE_OAUTH_ACCESS_TOKEN`: access token when `access_token` is empty
//! - `CLEARBLADE_SECRET_MANAGER_ENDPOINT`: Secret Manager base URL override
//!
//! With neither token set, the client asks the metadata server.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::secrets::{AccessTokenSource, DEFAULT_SECRET_MANAGER_ENDPOINT};

/// Environment variable holding an OAuth2 access token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Environment variable overriding the Secret Manager endpoint.
pub const ENDPOINT_ENV: &str = "CLEARBLADE_SECRET_MANAGER_ENDPOINT";

/// The `clearblade-google` provider block.
#[derive(Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// GCP project used for quota and billing.
    pub project: String,
    /// OAuth2 access token.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Secret Manager base URL, for emulators and tests.
    #[serde(default)]
    pub secret_manager_endpoint: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("project", &self.project)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("secret_manager_endpoint", &self.secret_manager_endpoint)
            .finish()
    }
}

impl ProviderConfig {
    /// Parse the provider block sent by the host.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        ProviderConfig::deserialize(value)
            .map_err(|e| ProviderError::Configuration(format!("Invalid provider configuration: {}", e)))
    }

    /// Secret Manager base URL.
    pub fn endpoint(&self) -> String {
        self.endpoint_with(|key| std::env::var(key).ok())
    }

    /// Where the client gets its access token.
    pub fn token_source(&self) -> AccessTokenSource {
        self.token_source_with(|key| std::env::var(key).ok())
    }

    fn endpoint_with(&self, env: impl Fn(&str) -> Option<String>) -> String {
        non_empty(self.secret_manager_endpoint.clone())
            .or_else(|| non_empty(env(ENDPOINT_ENV)))
            .unwrap_or_else(|| DEFAULT_SECRET_MANAGER_ENDPOINT.to_string())
    }

    fn token_source_with(&self, env: impl Fn(&str) -> Option<String>) -> AccessTokenSource {
        match non_empty(self.access_token.clone()).or_else(|| non_empty(env(ACCESS_TOKEN_ENV))) {
            Some(token) => AccessTokenSource::token(token),
            None => AccessTokenSource::metadata_server(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_minimal() {
        let config = ProviderConfig::from_value(&json!({"project": "my-project"})).unwrap();
        assert_eq!(config.project, "my-project");
        assert!(config.access_token.is_none());
        assert_eq!(config.endpoint_with(no_env), DEFAULT_SECRET_MANAGER_ENDPOINT);
    }

    #[test]
    fn test_parse_rejects_missing_project() {
        let err = ProviderConfig::from_value(&json!({"access_token": "t"})).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_token_precedence() {
        let env = |key: &str| (key == ACCESS_TOKEN_ENV).then(|| "from-env".to_string());

        let config = ProviderConfig {
            project: "p".into(),
            access_token: Some("from-config".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.token_source_with(env),
            AccessTokenSource::Static(t) if t.as_str() == "from-config"
        ));

        let config = ProviderConfig {
            project: "p".into(),
            access_token: Some("".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.token_source_with(env),
            AccessTokenSource::Static(t) if t.as_str() == "from-env"
        ));
        assert!(matches!(
            config.token_source_with(no_env),
            AccessTokenSource::Metadata { .. }
        ));
    }

    #[test]
    fn test_endpoint_override() {
        let env = |key: &str| (key == ENDPOINT_ENV).then(|| "http://localhost:9000".to_string());
        let config = ProviderConfig {
            project: "p".into(),
            ..Default::default()
        };
        assert_eq!(config.endpoint_with(env), "http://localhost:9000");

        let config = ProviderConfig {
            project: "p".into(),
            secret_manager_endpoint: Some("http://emulator:8080".into()),
            ..Default::default()
        };
        assert_eq!(config.endpoint_with(env), "http://emulator:8080");
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ProviderConfig {
            project: "p".into(),
            access_token: Some("ya29.secret".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("ya29"));
    }
}
