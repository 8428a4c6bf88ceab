//! ClearBlade Helm chart values.
//!
//! [`HelmOptions`] is the flat, per-component input accepted by the
//! `helm_values` data source. [`HelmOptions::to_helm_values`] reshapes it
//! into the nested [`HelmValues`] document the chart expects, filling in
//! the fixed images and feature flags of a GKE deployment.
//!
//! Output field order is the key order of the rendered YAML.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Enterprise slot that receives `enterprise_blue_version`.
pub const ENTERPRISE_SLOT: &str = "blue";
/// Secrets backend used by the chart.
pub const SECRETS_MANAGER: &str = "gsm";

const HAPROXY_IMAGE: (&str, &str) = ("haproxy", "2.6-alpine");
const POSTGRES_IMAGE: (&str, &str) = ("timescale/timescaledb", "latest-pg15");
const REDIS_IMAGE: (&str, &str) = ("redis", "alpine");

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// The `options` object of the data source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HelmOptions {
    /// Instance-wide settings.
    pub global: GlobalOptions,
    /// Web console.
    pub cb_console: ComponentOptions,
    /// File hosting service.
    pub cb_file_hosting: ComponentOptions,
    /// Load balancer in front of the platform.
    pub cb_haproxy: HaproxyOptions,
    /// IoT Core compatibility service.
    pub cb_iotcore: ReadinessComponentOptions,
    /// Intelligent Assets.
    pub cb_ia: ReadinessComponentOptions,
    /// In-cluster database.
    pub cb_postgres: PostgresOptions,
    /// In-cluster cache.
    pub cb_redis: RedisOptions,
    /// The ClearBlade platform itself.
    pub clearblade: ClearbladeOptions,
}

/// Instance-wide settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlobalOptions {
    /// Kubernetes namespace of the instance.
    pub namespace: String,
    /// Pull secret for the private image registry.
    pub image_puller_secret: String,
    /// Public URL of the instance.
    pub enterprise_base_url: String,
    /// Platform version deployed to the blue slot.
    pub enterprise_blue_version: String,
    /// License instance id.
    pub enterprise_instance_id: String,
    /// Registration key for new developer accounts.
    pub enterprise_registration_key: String,
    /// Enables IoT Core.
    pub iotcore_enabled: bool,
    /// Enables Intelligent Assets.
    pub ia_enabled: bool,
    /// Use Cloud SQL instead of the in-cluster database.
    pub gcp_cloudsql_enabled: bool,
    /// Use Memorystore instead of the in-cluster cache.
    pub gcp_memorystore_enabled: bool,
    /// GCP project id.
    pub gcp_project: String,
    /// GCP region.
    pub gcp_region: String,
    /// Service account that reads Secret Manager.
    pub gcp_gsm_service_account: String,
    /// Accepted but not rendered.
    pub storage_class_name: String,
}

/// CPU and memory requests/limits shared by every component.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentOptions {
    /// Requested CPU cores.
    pub request_cpu: i64,
    /// Requested memory, such as `1G`.
    pub request_memory: String,
    /// CPU core limit.
    pub limit_cpu: i64,
    /// Memory limit.
    pub limit_memory: String,
}

/// HAProxy section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HaproxyOptions {
    /// Requests and limits.
    #[serde(flatten)]
    pub resources: ComponentOptions,
    /// Pod count.
    pub replicas: i64,
    /// Whether HAProxy is deployed.
    pub enabled: bool,
    /// Static IP of the HTTP listener.
    pub primary_ip: String,
    /// Static IP of the MQTT listener.
    pub mqtt_ip: String,
    /// Serve MQTT on port 443.
    pub mqtt_over_443: bool,
}

/// IoT Core and IA sections.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadinessComponentOptions {
    /// Requests and limits.
    #[serde(flatten)]
    pub resources: ComponentOptions,
    /// Accepted but always rendered as `false`.
    pub check_clearblade_readiness: bool,
}

/// Postgres section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostgresOptions {
    /// Requests and limits.
    #[serde(flatten)]
    pub resources: ComponentOptions,
    /// Whether Postgres runs in the cluster.
    pub enabled: bool,
    /// Pod count.
    pub replicas: i64,
    /// Accepted but not rendered.
    pub postgres0_disk_name: String,
}

/// Redis section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedisOptions {
    /// Requests and limits.
    #[serde(flatten)]
    pub resources: ComponentOptions,
    /// Whether Redis runs in the cluster.
    pub enabled: bool,
    /// Accepted but not rendered.
    pub high_availability: bool,
}

/// ClearBlade platform section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClearbladeOptions {
    /// Requests and limits.
    #[serde(flatten)]
    pub resources: ComponentOptions,
    /// Pods running the blue slot.
    pub blue_replicas: i64,
    /// Pods running the green slot.
    pub green_replicas: i64,
    /// Let a second MQTT connection reuse a client id.
    pub mqtt_allow_duplicate_client_id: bool,
}

impl ComponentOptions {
    fn requests(&self) -> ResourceQuantity {
        ResourceQuantity {
            cpu: self.request_cpu,
            memory: self.request_memory.clone(),
        }
    }

    fn limits(&self) -> ResourceQuantity {
        ResourceQuantity {
            cpu: self.limit_cpu,
            memory: self.limit_memory.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// The chart values document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelmValues {
    /// `global`.
    pub global: Global,
    /// `clearblade`.
    pub clearblade: Clearblade,
    /// `cb-haproxy`.
    #[serde(rename = "cb-haproxy")]
    pub cb_haproxy: CbHaproxy,
    /// `cb-postgres`.
    #[serde(rename = "cb-postgres")]
    pub cb_postgres: CbPostgres,
    /// `cb-redis`.
    #[serde(rename = "cb-redis")]
    pub cb_redis: CbRedis,
    /// `cb-console`.
    #[serde(rename = "cb-console")]
    pub cb_console: CbConsole,
    /// `cb-file-hosting`.
    #[serde(rename = "cb-file-hosting")]
    pub cb_file_hosting: CbFileHosting,
    /// `cb-iotcore`.
    #[serde(rename = "cb-iotcore")]
    pub cb_iotcore: CbIotcore,
}

/// `global` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Global {
    /// Instance namespace.
    pub namespace: String,
    /// Always empty.
    pub node_selector: String,
    /// Always `null`.
    pub tolerations: Option<String>,
    /// Registry pull secret.
    pub image_puller_secret: String,
    /// Platform version and license settings.
    pub enterprise: Enterprise,
    /// IoT Core toggle.
    pub iot_core: VersionedFeature,
    /// Intelligent Assets toggle.
    #[serde(rename = "IA")]
    pub ia: VersionedFeature,
    /// GCP project settings.
    pub gcp: Gcp,
    /// Managed service switches.
    pub advanced: Advanced,
    /// Always `false`.
    #[serde(rename = "mtlsHAProxy")]
    pub mtls_haproxy: bool,
    /// Always `false`.
    #[serde(rename = "mtlsClearBlade")]
    pub mtls_clearblade: bool,
    /// Google Managed Prometheus, always `false`.
    #[serde(rename = "GMP")]
    pub gmp: bool,
}

/// `global.enterprise`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enterprise {
    /// Blue slot version.
    pub version: String,
    /// Always `null`.
    pub green_version: Option<String>,
    /// Active slot, see [`ENTERPRISE_SLOT`].
    pub slot: String,
    /// Public URL.
    #[serde(rename = "baseURL")]
    pub base_url: String,
    /// Always `null`.
    #[serde(rename = "consoleURL")]
    pub console_url: Option<String>,
    /// Developer registration key.
    pub registration_key: String,
    /// Always `false`.
    pub tag_override: bool,
    /// Always `null`; the instance id goes to the license instead.
    #[serde(rename = "instanceID")]
    pub instance_id: Option<String>,
}

/// `iotCore` and `IA`. Only `enabled` is set from options.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct VersionedFeature {
    /// Whether the feature is deployed.
    pub enabled: bool,
    /// Always empty.
    pub version: String,
    /// Emitted as empty for IoT Core only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<String>,
}

/// `global.gcp`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gcp {
    /// Project id.
    pub project: String,
    /// Region.
    pub region: String,
    /// Secret Manager reader account.
    pub gsm_read_service_account: String,
}

/// `global.advanced`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Advanced {
    /// Always `false`.
    pub predefined_namespace: bool,
    /// Memorystore switch.
    pub memory_store: MemoryStore,
    /// Cloud SQL switch.
    #[serde(rename = "cloudSQL")]
    pub cloud_sql: CloudSql,
    /// Secrets backend.
    pub secrets: Secrets,
}

/// `global.advanced.memoryStore`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStore {
    /// Use Memorystore.
    pub enabled: bool,
    /// Always `null`.
    pub address: Option<String>,
}

/// `global.advanced.cloudSQL`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSql {
    /// Use Cloud SQL.
    pub enabled: bool,
    /// Always `null`.
    pub database_connection_name: Option<String>,
}

/// `global.advanced.secrets`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Secrets {
    /// See [`SECRETS_MANAGER`].
    pub manager: String,
}

/// `clearblade` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clearblade {
    /// Blue slot pods.
    pub replicas: i64,
    /// Green slot pods.
    pub green_replicas: i64,
    /// License settings.
    pub license: License,
    /// Requests.
    pub resource_requests: ResourceQuantity,
    /// Limits.
    pub resource_limits: ResourceQuantity,
    /// MQTT broker settings.
    pub mqtt: Mqtt,
}

/// `clearblade.license`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    /// Always empty.
    pub key: String,
    /// License instance id.
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    /// Always enabled.
    pub auto_renew: AutoRenew,
}

/// `clearblade.license.autoRenew`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoRenew {
    /// Renew the license automatically.
    pub enabled: bool,
}

/// CPU and memory of a request or limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceQuantity {
    /// Cores.
    pub cpu: i64,
    /// Kubernetes memory quantity.
    pub memory: String,
}

/// `clearblade.mqtt`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mqtt {
    /// Let a second connection reuse a client id.
    #[serde(rename = "allowDuplicateClientID")]
    pub allow_duplicate_client_id: bool,
}

/// `cb-haproxy` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CbHaproxy {
    /// Whether HAProxy is deployed.
    pub enabled: bool,
    /// Always `false`.
    pub monitoring_enabled: bool,
    /// Pod count.
    pub replicas: i64,
    /// Image repository.
    pub image: String,
    /// Image tag.
    pub image_tag: String,
    /// Serve MQTT on port 443.
    #[serde(rename = "mqttOver443")]
    pub mqtt_over_443: bool,
    /// Always empty.
    #[serde(rename = "stats_auth")]
    pub stats_auth: String,
    /// Static IPs.
    pub ip: HaproxyIp,
    /// Requests.
    pub resource_requests: ResourceQuantity,
    /// Limits.
    pub resource_limits: ResourceQuantity,
}

/// `cb-haproxy.ip`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HaproxyIp {
    /// HTTP listener address.
    pub primary: String,
    /// MQTT listener address.
    pub mqtt: String,
}

/// `cb-postgres` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CbPostgres {
    /// Whether Postgres runs in the cluster.
    pub enabled: bool,
    /// Always `false`.
    pub monitoring_enabled: bool,
    /// Image repository.
    pub image: String,
    /// Image tag.
    pub image_tag: String,
    /// Pod count.
    pub replicas: i64,
    /// Requests.
    pub resource_requests: ResourceQuantity,
    /// Limits.
    pub resource_limits: ResourceQuantity,
}

/// `cb-redis` section. Limits come before requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CbRedis {
    /// Whether Redis runs in the cluster.
    pub enabled: bool,
    /// Always `false`.
    pub monitoring_enabled: bool,
    /// Image repository.
    pub image: String,
    /// Image tag.
    pub image_tag: String,
    /// Limits.
    pub resource_limits: ResourceQuantity,
    /// Requests.
    pub resource_requests: ResourceQuantity,
}

/// `cb-console` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CbConsole {
    /// Requests.
    pub resource_requests: ResourceQuantity,
    /// Limits.
    pub resource_limits: ResourceQuantity,
}

/// `cb-file-hosting` section. Limits come before requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CbFileHosting {
    /// Limits.
    pub resource_limits: ResourceQuantity,
    /// Requests.
    pub resource_requests: ResourceQuantity,
}

/// `cb-iotcore` section. Only limits are emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CbIotcore {
    /// Always `false`.
    pub check_clearblade_readiness: bool,
    /// Limits.
    pub resource_limits: ResourceQuantity,
}

impl HelmOptions {
    /// Reshape the options into the chart values document.
    pub fn to_helm_values(&self) -> HelmValues {
        let global = &self.global;

        HelmValues {
            global: Global {
                namespace: global.namespace.clone(),
                node_selector: String::new(),
                tolerations: None,
                image_puller_secret: global.image_puller_secret.clone(),
                enterprise: Enterprise {
                    version: global.enterprise_blue_version.clone(),
                    green_version: None,
                    slot: ENTERPRISE_SLOT.to_string(),
                    base_url: global.enterprise_base_url.clone(),
                    console_url: None,
                    registration_key: global.enterprise_registration_key.clone(),
                    tag_override: false,
                    instance_id: None,
                },
                iot_core: VersionedFeature {
                    enabled: global.iotcore_enabled,
                    regions: Some(String::new()),
                    ..Default::default()
                },
                ia: VersionedFeature {
                    enabled: global.ia_enabled,
                    ..Default::default()
                },
                gcp: Gcp {
                    project: global.gcp_project.clone(),
                    region: global.gcp_region.clone(),
                    gsm_read_service_account: global.gcp_gsm_service_account.clone(),
                },
                advanced: Advanced {
                    predefined_namespace: false,
                    memory_store: MemoryStore {
                        enabled: global.gcp_memorystore_enabled,
                        address: None,
                    },
                    cloud_sql: CloudSql {
                        enabled: global.gcp_cloudsql_enabled,
                        database_connection_name: None,
                    },
                    secrets: Secrets {
                        manager: SECRETS_MANAGER.to_string(),
                    },
                },
                mtls_haproxy: false,
                mtls_clearblade: false,
                gmp: false,
            },
            clearblade: Clearblade {
                replicas: self.clearblade.blue_replicas,
                green_replicas: self.clearblade.green_replicas,
                license: License {
                    key: String::new(),
                    instance_id: global.enterprise_instance_id.clone(),
                    auto_renew: AutoRenew { enabled: true },
                },
                resource_requests: self.clearblade.resources.requests(),
                resource_limits: self.clearblade.resources.limits(),
                mqtt: Mqtt {
                    allow_duplicate_client_id: self.clearblade.mqtt_allow_duplicate_client_id,
                },
            },
            cb_haproxy: CbHaproxy {
                enabled: self.cb_haproxy.enabled,
                monitoring_enabled: false,
                replicas: self.cb_haproxy.replicas,
                image: HAPROXY_IMAGE.0.to_string(),
                image_tag: HAPROXY_IMAGE.1.to_string(),
                mqtt_over_443: self.cb_haproxy.mqtt_over_443,
                stats_auth: String::new(),
                ip: HaproxyIp {
                    primary: self.cb_haproxy.primary_ip.clone(),
                    mqtt: self.cb_haproxy.mqtt_ip.clone(),
                },
                resource_requests: self.cb_haproxy.resources.requests(),
                resource_limits: self.cb_haproxy.resources.limits(),
            },
            cb_postgres: CbPostgres {
                enabled: self.cb_postgres.enabled,
                monitoring_enabled: false,
                image: POSTGRES_IMAGE.0.to_string(),
                image_tag: POSTGRES_IMAGE.1.to_string(),
                replicas: self.cb_postgres.replicas,
                resource_requests: self.cb_postgres.resources.requests(),
                resource_limits: self.cb_postgres.resources.limits(),
            },
            cb_redis: CbRedis {
                enabled: self.cb_redis.enabled,
                monitoring_enabled: false,
                image: REDIS_IMAGE.0.to_string(),
                image_tag: REDIS_IMAGE.1.to_string(),
                resource_limits: self.cb_redis.resources.limits(),
                resource_requests: self.cb_redis.resources.requests(),
            },
            cb_console: CbConsole {
                resource_requests: self.cb_console.requests(),
                resource_limits: self.cb_console.limits(),
            },
            cb_file_hosting: CbFileHosting {
                resource_limits: self.cb_file_hosting.limits(),
                resource_requests: self.cb_file_hosting.requests(),
            },
            cb_iotcore: CbIotcore {
                check_clearblade_readiness: false,
                resource_limits: self.cb_iotcore.resources.limits(),
            },
        }
    }
}

impl HelmValues {
    /// Render as a YAML document.
    pub fn to_yaml(&self) -> Result<String, ProviderError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Render as compact JSON.
    pub fn to_json(&self) -> Result<String, ProviderError> {
        Ok(serde_json::to_string(self)?)
    }
}
