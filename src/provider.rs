//! The `clearblade-google` provider.
//!
//! Routes host requests to the registered resources, data sources and
//! functions. The only state is the Secret Manager client built by
//! `configure`.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::data_sources::{self, DataSource};
use crate::error::ProviderError;
use crate::functions::{self, check_arguments, ProviderFunction};
use crate::plan::plan_resource;
use crate::resources::{self, Resource};
use crate::schema::{has_errors, Attribute, Diagnostic, ProviderSchema, Schema};
use crate::secrets::{SecretManagerRest, SecretStore};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ServerCapabilities};
use crate::validation::validate;

/// Provider name, used in configuration blocks.
pub const PROVIDER_NAME: &str = "clearblade-google";

/// Prefix of every resource and data source type name.
pub const TYPE_PREFIX: &str = "clearblade-google_";

/// The provider served by the plugin binary.
pub struct ClearBladeGoogleProvider {
    resources: Vec<Box<dyn Resource>>,
    data_sources: Vec<Box<dyn DataSource>>,
    functions: Vec<Box<dyn ProviderFunction>>,
    store: RwLock<Option<Arc<dyn SecretStore>>>,
}

impl Default for ClearBladeGoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClearBladeGoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClearBladeGoogleProvider")
            .field("resources", &self.resources.iter().map(|r| r.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ClearBladeGoogleProvider {
    /// An unconfigured provider with every resource, data source and function.
    pub fn new() -> Self {
        Self {
            resources: resources::all(),
            data_sources: data_sources::all(),
            functions: functions::all(),
            store: RwLock::new(None),
        }
    }

    /// A provider that is already configured with `store`.
    pub fn with_store(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store: RwLock::new(Some(store)),
            ..Self::new()
        }
    }

    /// Replace the registered functions.
    pub fn with_functions(mut self, functions: Vec<Box<dyn ProviderFunction>>) -> Self {
        self.functions = functions;
        self
    }

    /// Schema of the provider block.
    pub fn config_schema() -> Schema {
        Schema::v0()
            .with_description("ClearBlade resources on Google Cloud")
            .with_attribute(
                "project",
                Attribute::required_string().with_description("GCP project used for quota and billing"),
            )
            .with_attribute(
                "access_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("OAuth2 access token. Defaults to ambient credentials"),
            )
            .with_attribute(
                "secret_manager_endpoint",
                Attribute::optional_string().with_description("Secret Manager base URL override"),
            )
    }

    fn resource(&self, type_name: &str) -> Result<&dyn Resource, ProviderError> {
        type_name
            .strip_prefix(TYPE_PREFIX)
            .and_then(|name| self.resources.iter().find(|r| r.name() == name))
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(format!("Unknown resource type: {}", type_name)))
    }

    fn data_source(&self, type_name: &str) -> Result<&dyn DataSource, ProviderError> {
        type_name
            .strip_prefix(TYPE_PREFIX)
            .and_then(|name| self.data_sources.iter().find(|d| d.name() == name))
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(format!("Unknown data source type: {}", type_name)))
    }

    fn function(&self, name: &str) -> Result<&dyn ProviderFunction, ProviderError> {
        self.functions
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(format!("Unknown function: {}", name)))
    }

    async fn store(&self) -> Result<Arc<dyn SecretStore>, ProviderError> {
        self.store
            .read()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Configuration("provider not configured".to_string()))
    }
}

#[async_trait::async_trait]
impl ProviderService for ClearBladeGoogleProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(Self::config_schema());
        for resource in &self.resources {
            schema = schema.with_resource(format!("{}{}", TYPE_PREFIX, resource.name()), resource.schema());
        }
        for data_source in &self.data_sources {
            schema = schema.with_data_source(
                format!("{}{}", TYPE_PREFIX, data_source.name()),
                data_source.schema(),
            );
        }
        for function in &self.functions {
            schema = schema.with_function(function.name(), function.schema());
        }
        schema
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities { plan_destroy: true }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&Self::config_schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&Self::config_schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let config = ProviderConfig::from_value(&config)?;
        debug!(?config, "configuring provider");
        let client = match SecretManagerRest::new(
            config.endpoint(),
            Some(config.project.clone()),
            config.token_source(),
        ) {
            Ok(client) => client,
            Err(e) => {
                return Ok(vec![
                    Diagnostic::error("Failed to create secret mgr client").with_detail(e.message())
                ]);
            }
        };

        *self.store.write().await = Some(Arc::new(client));
        info!(project = %config.project, "provider configured");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("provider stopping");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let mut diagnostics = validate(&resource.schema(), &config);
        if !has_errors(&diagnostics) {
            diagnostics.extend(resource.validate(&config));
        }
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let current = self.resource(resource_type)?.schema().version;
        if version > current {
            return Err(ProviderError::FailedPrecondition(format!(
                "state version {} is newer than schema version {}",
                version, current
            )));
        }
        Ok(state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        Ok(plan_resource(
            &resource.schema(),
            resource.stable_computed(),
            prior_state.as_ref(),
            &proposed_state,
        ))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let store = self.store().await?;
        resource.create(store.as_ref(), planned_state).await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let store = self.store().await?;
        match resource.read(store.as_ref(), current_state).await {
            Err(e) if e.is_not_found() => {
                warn!(resource_type, error = %e, "secret is gone, removing from state");
                Ok(Value::Null)
            }
            other => other,
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let store = self.store().await?;
        resource.update(store.as_ref(), prior_state, planned_state).await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let store = self.store().await?;
        resource.delete(store.as_ref(), current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let store = self.store().await?;
        let partial = resource.import_state(id)?;
        let state = resource.read(store.as_ref(), partial).await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        let mut diagnostics = validate(&data_source.schema(), &config);
        if !has_errors(&diagnostics) {
            diagnostics.extend(data_source.validate(&config));
        }
        Ok(diagnostics)
    }

    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        self.data_source(data_source_type)?.read(config).await
    }

    async fn call_function(&self, name: &str, arguments: Vec<Value>) -> Result<Value, ProviderError> {
        let function = self.function(name)?;
        check_arguments(&function.schema(), &arguments)?;
        function.call(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::tests::sample_options;
    use crate::secrets::InMemorySecretStore;
    use serde_json::json;

    fn configured() -> (ClearBladeGoogleProvider, InMemorySecretStore) {
        let store = InMemorySecretStore::new();
        (ClearBladeGoogleProvider::with_store(Arc::new(store.clone())), store)
    }

    fn mek_config() -> Value {
        json!({"project_id": "p", "namespace": "acme", "suffix": "-mek"})
    }

    #[test]
    fn test_schema_registers_everything() {
        let schema = ClearBladeGoogleProvider::new().schema();
        for name in ["mek", "random_string", "tls_certificate", "filehosting_hmac_secret"] {
            assert!(schema.resources.contains_key(&format!("clearblade-google_{}", name)));
        }
        assert!(schema.data_sources.contains_key("clearblade-google_helm_values"));
        assert!(schema.functions.contains_key("get_helm_yaml_template"));
        assert!(schema.provider.attribute("project").is_some_and(|a| a.flags.required));
    }

    #[test]
    fn test_metadata_lists_sorted_names() {
        let metadata = ClearBladeGoogleProvider::new().metadata();
        assert_eq!(
            metadata.resources,
            vec![
                "clearblade-google_filehosting_hmac_secret",
                "clearblade-google_mek",
                "clearblade-google_random_string",
                "clearblade-google_tls_certificate",
            ]
        );
        assert_eq!(metadata.functions, vec!["get_helm_yaml_template"]);
        assert!(metadata.capabilities.plan_destroy);
    }

    #[tokio::test]
    async fn test_plan_destroy() {
        let (provider, _) = configured();
        let prior = json!({
            "project_id": "p", "namespace": "acme", "suffix": "-mek",
            "secret_id": "acme-mek", "key": "{}"
        });
        let plan = provider
            .plan("clearblade-google_mek", Some(prior), Value::Null, Value::Null)
            .await
            .unwrap();
        assert!(plan.planned_state.is_null());
        assert!(!plan.is_no_op());
        assert!(!plan.requires_replace);
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let provider = ClearBladeGoogleProvider::new();
        let err = provider.create("clearblade-google_mek", mek_config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert_eq!(err.message(), "provider not configured");
    }

    #[tokio::test]
    async fn test_configure() {
        let provider = ClearBladeGoogleProvider::new();
        let diagnostics = provider.configure(json!({})).await.unwrap();
        assert!(has_errors(&diagnostics));

        let diagnostics = provider
            .configure(json!({
                "project": "p",
                "access_token": "token",
                "secret_manager_endpoint": "http://127.0.0.1:1"
            }))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
        assert!(provider.store().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_types() {
        let (provider, _) = configured();
        let err = provider.read("clearblade-google_nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider.read("mek", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider.call_function("nope", vec![]).await.unwrap_err();
        assert_eq!(err.message(), "Unknown function: nope");
    }

    #[tokio::test]
    async fn test_mek_lifecycle() {
        let (provider, store) = configured();
        let mek = "clearblade-google_mek";

        let plan = provider.plan(mek, None, mek_config(), mek_config()).await.unwrap();
        assert!(plan.planned_state["key"].is_null());

        let created = provider.create(mek, plan.planned_state).await.unwrap();
        assert_eq!(created["secret_id"], "acme-mek");
        assert!(store.contains("p", "acme-mek").await);

        let read = provider.read(mek, created.clone()).await.unwrap();
        assert_eq!(read["key"], created["key"]);

        let plan = provider.plan(mek, Some(read.clone()), mek_config(), mek_config()).await.unwrap();
        assert!(plan.is_no_op());

        provider.delete(mek, read.clone()).await.unwrap();
        assert!(!store.contains("p", "acme-mek").await);

        // Deleted out of band: read drops it from state.
        assert!(provider.read(mek, read).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn test_validate_random_string() {
        let provider = ClearBladeGoogleProvider::new();
        let rs = "clearblade-google_random_string";
        let base = json!({"project_id": "p", "namespace": "acme", "suffix": "-pw"});

        let mut config = base.clone();
        config["type"] = json!("password");
        config["length"] = json!(12);
        assert!(provider.validate_resource_config(rs, config).await.unwrap().is_empty());

        let mut config = base.clone();
        config["type"] = json!("pin");
        config["length"] = json!(12);
        let diagnostics = provider.validate_resource_config(rs, config).await.unwrap();
        assert_eq!(diagnostics[0].summary, "Invalid type attribute");

        let diagnostics = provider.validate_resource_config(rs, base).await.unwrap();
        assert!(diagnostics.iter().any(|d| d.attribute.as_deref() == Some("type")));
    }

    #[tokio::test]
    async fn test_random_string_error_summaries() {
        let (provider, _) = configured();
        let rs = "clearblade-google_random_string";
        let mut planned = json!({"project_id": "p", "namespace": "acme", "suffix": "-pw"});
        planned["type"] = json!("password");
        planned["length"] = json!(3);

        let err = provider.create(rs, planned.clone()).await.unwrap_err();
        let diagnostics = crate::server::error_to_diagnostics(err);
        assert_eq!(diagnostics[0].summary, "Failed to create password");
        assert_eq!(diagnostics[0].code.as_deref(), Some("invalid_argument"));

        planned["type"] = json!("registration_key");
        planned["length"] = json!(8);
        let err = provider.update(rs, planned.clone(), planned).await.unwrap_err();
        let diagnostics = crate::server::error_to_diagnostics(err);
        assert_eq!(diagnostics[0].summary, "Failed to update registration key");
        assert_eq!(diagnostics[0].code.as_deref(), Some("not_found"));
    }

    #[tokio::test]
    async fn test_import_tls_certificate() {
        let (provider, _) = configured();
        let tls = "clearblade-google_tls_certificate";
        let mut config = json!({"project_id": "p", "namespace": "acme", "suffix": "-tls"});
        config["tls_certificates"] = json!({"a.pem": "A"});
        provider.create(tls, config).await.unwrap();

        let imported = provider.import_resource(tls, "p/acme/-tls").await.unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, tls);
        assert_eq!(imported[0].state["tls_certificates"], json!({"a.pem": "A"}));

        let err = provider.import_resource(tls, "p/acme/-missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_upgrade_passes_state_through() {
        let provider = ClearBladeGoogleProvider::new();
        let state = json!({"secret_id": "acme-mek"});
        let upgraded = provider
            .upgrade_resource_state("clearblade-google_mek", 0, state.clone())
            .await
            .unwrap();
        assert_eq!(upgraded, state);

        assert!(provider
            .upgrade_resource_state("clearblade-google_mek", 3, state)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_helm_values_without_configure() {
        let provider = ClearBladeGoogleProvider::new();
        let hv = "clearblade-google_helm_values";
        let config = json!({"options": sample_options()});

        assert!(provider.validate_data_source_config(hv, config.clone()).await.unwrap().is_empty());
        let state = provider.read_data_source(hv, config).await.unwrap();
        assert!(state["values"].as_str().unwrap().contains("cb-redis:"));
    }

    #[tokio::test]
    async fn test_function_argument_check() {
        let provider = ClearBladeGoogleProvider::new();
        let err = provider
            .call_function("get_helm_yaml_template", vec![json!(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));

        let err = provider
            .call_function("get_helm_yaml_template", vec![json!("https://github.com/x")])
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Invalid helm chart url: https://github.com/x");
    }

    #[tokio::test]
    async fn test_function_uses_registered_base_url() {
        let provider = ClearBladeGoogleProvider::new().with_functions(vec![Box::new(
            functions::HelmYamlTemplate::with_base_url("http://127.0.0.1:1"),
        )]);
        let url = "https://github.com/ClearBlade/helm-charts/releases/download/r1/chart.tgz";
        let err = provider
            .call_function("get_helm_yaml_template", vec![json!(url)])
            .await
            .unwrap_err();
        assert!(err.message().starts_with("GET failed"));
    }
}
