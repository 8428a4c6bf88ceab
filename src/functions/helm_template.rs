//! `get_helm_yaml_template`: fetch the default GKE values of a chart release.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use super::ProviderFunction;
use crate::error::ProviderError;
use crate::schema::{FunctionParameter, FunctionSchema};

/// Raw file host for tagged releases of the ClearBlade chart repository.
pub const HELM_CHARTS_RAW_BASE_URL: &str =
    "https://raw.githubusercontent.com/ClearBlade/helm-charts/refs/tags";

const TEMPLATE_FILE: &str = "gke-default-values.yaml";
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Index of the release tag in a chart URL split on `/`.
const RELEASE_SEGMENT: usize = 7;
const MIN_SEGMENTS: usize = 9;

/// Extract the release tag from a chart release URL such as
/// `https://github.com/ClearBlade/helm-charts/releases/download/<release>/<chart>.tgz`.
///
/// ```
/// use clearblade_google_provider::functions::release_from_chart_url;
///
/// let url = "https://github.com/ClearBlade/helm-charts/releases/download/\
///            clearblade-iot-enterprise-3.0.4/clearblade-iot-enterprise-3.0.4.tgz";
/// assert_eq!(release_from_chart_url(url).unwrap(), "clearblade-iot-enterprise-3.0.4");
/// assert!(release_from_chart_url("https://github.com/ClearBlade").is_err());
/// ```
pub fn release_from_chart_url(url: &str) -> Result<&str, ProviderError> {
    let segments: Vec<&str> = url.split('/').collect();
    if segments.len() < MIN_SEGMENTS {
        return Err(ProviderError::Validation(format!(
            "Invalid helm chart url: {}",
            url
        )));
    }
    Ok(segments[RELEASE_SEGMENT])
}

/// Fetches `gke-default-values.yaml` for the release named by a chart URL.
#[derive(Debug, Clone)]
pub struct HelmYamlTemplate {
    base_url: String,
}

impl Default for HelmYamlTemplate {
    fn default() -> Self {
        Self::with_base_url(HELM_CHARTS_RAW_BASE_URL)
    }
}

impl HelmYamlTemplate {
    /// Fetch templates from another host, e.g. a local mirror.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of the values template for `release`.
    pub fn template_url(&self, release: &str) -> String {
        format!("{}/{}/{}", self.base_url, release, TEMPLATE_FILE)
    }

    /// Download the template for the release named by `chart_url`.
    pub async fn fetch(&self, chart_url: &str) -> Result<String, ProviderError> {
        let release = release_from_chart_url(chart_url)?;
        let url = self.template_url(release);

        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::from(e).context("Failed to build HTTP client"))?;

        debug!(%url, "fetching helm values template");
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::from(e).context("GET failed"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_http_status(
                status.as_u16(),
                format!("GET {} returned HTTP {}", url, status.as_u16()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from(e).context("Failed to read HTTP response"))?;
        info!(release, bytes = body.len(), "fetched helm values template");
        Ok(body)
    }
}

#[async_trait]
impl ProviderFunction for HelmYamlTemplate {
    fn name(&self) -> &'static str {
        "get_helm_yaml_template"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::returning_string("Function to get a Helm YAML template file")
            .with_description("Gets a Helm YAML template from a GitHub release")
            .with_parameter(
                FunctionParameter::string("helm_chart")
                    .with_description("Location of the Helm chart on Github"),
            )
    }

    async fn call(&self, arguments: Vec<Value>) -> Result<Value, ProviderError> {
        let chart_url = arguments
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::InvalidRequest("helm_chart must be a string".to_string()))?;
        Ok(Value::String(self.fetch(chart_url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    const CHART_URL: &str = "https://github.com/ClearBlade/helm-charts/releases/download/\
                             clearblade-iot-enterprise-3.0.4/clearblade-iot-enterprise-3.0.4.tgz";

    async fn values_file(Path(release): Path<String>) -> (StatusCode, String) {
        if release == "clearblade-iot-enterprise-3.0.4" {
            (StatusCode::OK, "global:\n  namespace: REPLACE\n".to_string())
        } else {
            (StatusCode::NOT_FOUND, "404: Not Found".to_string())
        }
    }

    async fn start_fake() -> String {
        let app = Router::new().route("/tags/{release}/gke-default-values.yaml", get(values_file));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/tags", addr)
    }

    #[test]
    fn test_release_segment() {
        assert_eq!(
            release_from_chart_url("a/b/c/d/e/f/g/release/h").unwrap(),
            "release"
        );
        let err = release_from_chart_url("a/b/c/d/e/f/g/h").unwrap_err();
        assert_eq!(err.message(), "Invalid helm chart url: a/b/c/d/e/f/g/h");
    }

    #[test]
    fn test_default_template_url() {
        assert_eq!(
            HelmYamlTemplate::default().template_url("v1"),
            "https://raw.githubusercontent.com/ClearBlade/helm-charts/refs/tags/v1/gke-default-values.yaml"
        );
    }

    #[tokio::test]
    async fn test_fetch_template() {
        let function = HelmYamlTemplate::with_base_url(start_fake().await);
        let result = function.call(vec![json!(CHART_URL)]).await.unwrap();
        assert_eq!(result, json!("global:\n  namespace: REPLACE\n"));
    }

    #[tokio::test]
    async fn test_fetch_unknown_release() {
        let function = HelmYamlTemplate::with_base_url(start_fake().await);
        let url = CHART_URL.replace("3.0.4/", "9.9.9/");
        let err = function.fetch(&url).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.message().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let function = HelmYamlTemplate::with_base_url("http://127.0.0.1:1");
        let err = function.fetch(CHART_URL).await.unwrap_err();
        assert!(err.message().starts_with("GET failed"));
    }
}
