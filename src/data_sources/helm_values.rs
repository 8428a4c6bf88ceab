//! `clearblade-google_helm_values`: render chart values from typed options.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::DataSource;
use crate::error::ProviderError;
use crate::helm::HelmOptions;
use crate::schema::{Attribute, Block, NestedBlock, Schema};

/// Renders the chart values document as YAML and JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelmValuesDataSource;

fn resources_block(description: &str) -> Block {
    Block::new()
        .with_description(description)
        .with_attribute("request_cpu", Attribute::required_int64())
        .with_attribute("request_memory", Attribute::required_string())
        .with_attribute("limit_cpu", Attribute::required_int64())
        .with_attribute("limit_memory", Attribute::required_string())
}

fn section(block: Block) -> NestedBlock {
    NestedBlock::required_single(block)
}

fn global_block() -> Block {
    let strings = [
        ("namespace", "Instance namespace"),
        ("image_puller_secret", "Image pull secret for the ClearBlade registry"),
        ("enterprise_base_url", "Public URL of the instance"),
        ("enterprise_blue_version", "ClearBlade version deployed to the blue slot"),
        ("enterprise_instance_id", "License instance id"),
        ("enterprise_registration_key", "Instance registration key"),
        ("gcp_project", "GCP project of the deployment"),
        ("gcp_region", "GCP region of the deployment"),
        ("gcp_gsm_service_account", "Service account allowed to read GCP Secrets"),
        ("storage_class_name", "Kubernetes storage class"),
    ];
    let bools = [
        ("iotcore_enabled", "Deploy IoT Core"),
        ("ia_enabled", "Deploy Intelligent Assets"),
        ("gcp_cloudsql_enabled", "Use Cloud SQL instead of the bundled Postgres"),
        ("gcp_memorystore_enabled", "Use Memorystore instead of the bundled Redis"),
    ];

    let block = strings.iter().fold(
        Block::new().with_description("Helm Chart global section"),
        |block, (name, description)| {
            block.with_attribute(*name, Attribute::required_string().with_description(*description))
        },
    );
    bools.iter().fold(block, |block, (name, description)| {
        block.with_attribute(*name, Attribute::required_bool().with_description(*description))
    })
}

/// Schema of the `options` block.
pub fn options_block() -> Block {
    Block::new()
        .with_description("Helm values")
        .with_block("global", section(global_block()))
        .with_block(
            "cb_console",
            section(resources_block("Helm Chart cb-console section")),
        )
        .with_block(
            "cb_file_hosting",
            section(resources_block("Helm Chart cb-file-hosting section")),
        )
        .with_block(
            "cb_haproxy",
            section(
                resources_block("Helm Chart cb-haproxy section")
                    .with_attribute("replicas", Attribute::required_int64())
                    .with_attribute("enabled", Attribute::required_bool())
                    .with_attribute("primary_ip", Attribute::required_string())
                    .with_attribute("mqtt_ip", Attribute::required_string())
                    .with_attribute("mqtt_over_443", Attribute::required_bool()),
            ),
        )
        .with_block(
            "cb_iotcore",
            section(
                resources_block("Helm Chart cb-iotcore section")
                    .with_attribute("check_clearblade_readiness", Attribute::required_bool()),
            ),
        )
        .with_block(
            "cb_ia",
            section(
                resources_block("Helm Chart cb-ia section")
                    .with_attribute("check_clearblade_readiness", Attribute::required_bool()),
            ),
        )
        .with_block(
            "cb_postgres",
            section(
                resources_block("Helm Chart cb-postgres section")
                    .with_attribute("enabled", Attribute::required_bool())
                    .with_attribute("replicas", Attribute::required_int64())
                    .with_attribute("postgres0_disk_name", Attribute::required_string()),
            ),
        )
        .with_block(
            "cb_redis",
            section(
                resources_block("Helm Chart cb-redis section")
                    .with_attribute("enabled", Attribute::required_bool())
                    .with_attribute("high_availability", Attribute::required_bool()),
            ),
        )
        .with_block(
            "clearblade",
            section(
                resources_block("Helm Chart clearblade section")
                    .with_attribute("blue_replicas", Attribute::required_int64())
                    .with_attribute("green_replicas", Attribute::required_int64())
                    .with_attribute("mqtt_allow_duplicate_client_id", Attribute::required_bool()),
            ),
        )
}

#[async_trait]
impl DataSource for HelmValuesDataSource {
    fn name(&self) -> &'static str {
        "helm_values"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Datasource for creating helm values")
            .with_block("options", section(options_block()))
            .with_attribute(
                "values",
                Attribute::computed_string().with_description("Final Helm values as YAML"),
            )
            .with_attribute(
                "values_json",
                Attribute::computed_string().with_description("Final Helm values as JSON"),
            )
    }

    async fn read(&self, config: Value) -> Result<Value, ProviderError> {
        let raw_options = config
            .get("options")
            .cloned()
            .ok_or_else(|| ProviderError::Validation("Missing required block 'options'".to_string()))?;
        let options: HelmOptions = serde_json::from_value(raw_options.clone())
            .map_err(|e| ProviderError::Validation(format!("Invalid helm options: {}", e)))?;

        let values = options.to_helm_values();
        let yaml = values.to_yaml().map_err(|e| e.context("Failed to marshal data"))?;
        let json = values.to_json().map_err(|e| e.context("Failed to marshal data"))?;
        debug!(namespace = %options.global.namespace, "rendered helm values");

        Ok(serde_json::json!({
            "options": raw_options,
            "values": yaml,
            "values_json": json,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::tests::sample_options;
    use crate::validation::validate;
    use serde_json::json;

    #[test]
    fn test_schema_accepts_sample_options() {
        let schema = HelmValuesDataSource.schema();
        let diagnostics = validate(&schema, &json!({"options": sample_options()}));
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[test]
    fn test_schema_reports_missing_fields() {
        let schema = HelmValuesDataSource.schema();
        let mut options = sample_options();
        options["cb_redis"].as_object_mut().unwrap().remove("enabled");
        options["clearblade"]["blue_replicas"] = json!("three");

        let diagnostics = validate(&schema, &json!({"options": options}));
        let paths: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert!(paths.contains(&"options.cb_redis.enabled"));
        assert!(paths.contains(&"options.clearblade.blue_replicas"));

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_read_renders_yaml_and_json() {
        let state = HelmValuesDataSource
            .read(json!({"options": sample_options()}))
            .await
            .unwrap();

        let yaml = state["values"].as_str().unwrap();
        assert!(yaml.contains("namespace: acme"));
        assert!(yaml.contains("cb-haproxy:"));

        let json: Value = serde_json::from_str(state["values_json"].as_str().unwrap()).unwrap();
        assert_eq!(json["global"]["gcp"]["project"], "acme-prod");
        assert_eq!(state["options"], sample_options());
    }

    #[tokio::test]
    async fn test_read_rejects_bad_options() {
        let err = HelmValuesDataSource.read(json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));

        let err = HelmValuesDataSource
            .read(json!({"options": {"global": {}}}))
            .await
            .unwrap_err();
        assert!(err.message().starts_with("Invalid helm options"));
    }
}
