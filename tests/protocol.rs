//! Drives the plugin over TCP the way the host does.

use std::sync::Arc;
use std::time::Duration;

use clearblade_google_provider::secrets::{InMemorySecretStore, SecretStore};
use clearblade_google_provider::server::Response;
use clearblade_google_provider::{serve_listener, ClearBladeGoogleProvider, ServeOptions};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Client {
    writer: OwnedWriteHalf,
    lines: Lines<BufReader<OwnedReadHalf>>,
    next_id: u64,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            writer,
            lines: BufReader::new(reader).lines(),
            next_id: 1,
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Response {
        let id = self.next_id;
        self.next_id += 1;
        let mut line = serde_json::to_vec(&json!({"id": id, "method": method, "params": params})).unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.unwrap();

        let reply = self.lines.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert_eq!(response.id, id);
        response
    }
}

async fn start(provider: ClearBladeGoogleProvider) -> (Client, oneshot::Sender<()>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        serve_listener(
            provider,
            listener,
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(5)),
            async move {
                let _ = rx.await;
            },
        )
        .await
        .unwrap();
    });
    (Client::connect(addr).await, tx, server)
}

fn component(cpu: i64, memory: &str) -> Value {
    json!({"request_cpu": cpu, "request_memory": memory, "limit_cpu": cpu, "limit_memory": memory})
}

fn with(mut base: Value, extra: Value) -> Value {
    for (k, v) in extra.as_object().unwrap() {
        base[k] = v.clone();
    }
    base
}

fn helm_options() -> Value {
    json!({
        "global": {
            "namespace": "staging",
            "image_puller_secret": "puller",
            "enterprise_base_url": "https://staging.clearblade.com",
            "enterprise_blue_version": "2024.4.1",
            "enterprise_instance_id": "instance-2",
            "enterprise_registration_key": "regkey",
            "iotcore_enabled": false,
            "ia_enabled": false,
            "gcp_cloudsql_enabled": false,
            "gcp_memorystore_enabled": false,
            "gcp_project": "staging-project",
            "gcp_region": "europe-west1",
            "gcp_gsm_service_account": "gsm@staging-project.iam.gserviceaccount.com",
            "storage_class_name": "standard-rwo"
        },
        "cb_console": component(1, "1G"),
        "cb_file_hosting": component(1, "1G"),
        "cb_haproxy": with(component(1, "1G"), json!({
            "replicas": 1, "enabled": true,
            "primary_ip": "10.1.0.1", "mqtt_ip": "10.1.0.2", "mqtt_over_443": false
        })),
        "cb_iotcore": with(component(1, "1G"), json!({"check_clearblade_readiness": false})),
        "cb_ia": with(component(1, "1G"), json!({"check_clearblade_readiness": false})),
        "cb_postgres": with(component(1, "2G"), json!({
            "enabled": true, "replicas": 1, "postgres0_disk_name": "pg"
        })),
        "cb_redis": with(component(1, "1G"), json!({"enabled": true, "high_availability": false})),
        "clearblade": with(component(2, "4G"), json!({
            "blue_replicas": 1, "green_replicas": 0, "mqtt_allow_duplicate_client_id": false
        }))
    })
}

#[tokio::test]
async fn test_mek_over_the_wire() {
    let store = InMemorySecretStore::new();
    let (mut client, shutdown, server) =
        start(ClearBladeGoogleProvider::with_store(Arc::new(store.clone()))).await;
    let mek = "clearblade-google_mek";
    let config = json!({"project_id": "p", "namespace": "staging", "suffix": "-mek"});

    let metadata = client.call("get_metadata", Value::Null).await;
    assert!(metadata.result["resources"].as_array().unwrap().contains(&json!(mek)));

    let validated = client
        .call("validate_resource_config", json!({"resource_type": mek, "config": config}))
        .await;
    assert!(validated.diagnostics.is_empty());

    let plan = client
        .call("plan", json!({"resource_type": mek, "proposed_state": config, "config": config}))
        .await;
    let planned = plan.result["planned_state"].clone();

    let created = client
        .call("create", json!({"resource_type": mek, "planned_state": planned}))
        .await;
    assert!(created.diagnostics.is_empty(), "{:?}", created.diagnostics);
    assert_eq!(created.result["secret_id"], "staging-mek");
    assert!(store.contains("p", "staging-mek").await);

    let read = client
        .call("read", json!({"resource_type": mek, "current_state": created.result}))
        .await;
    assert_eq!(read.result["key"], created.result["key"]);

    let deleted = client
        .call("delete", json!({"resource_type": mek, "current_state": read.result}))
        .await;
    assert!(deleted.diagnostics.is_empty());
    assert!(!store.contains("p", "staging-mek").await);

    shutdown.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_empty_tls_payload_over_the_wire() {
    let store = InMemorySecretStore::new();
    let (mut client, shutdown, server) =
        start(ClearBladeGoogleProvider::with_store(Arc::new(store.clone()))).await;
    let tls = "clearblade-google_tls_certificate";

    let created = client
        .call(
            "create",
            json!({
                "resource_type": tls,
                "planned_state": {
                    "project_id": "p", "namespace": "staging", "suffix": "-tls",
                    "tls_certificates": {"cert.pem": "-----BEGIN CERTIFICATE-----"}
                }
            }),
        )
        .await;
    assert!(created.diagnostics.is_empty(), "{:?}", created.diagnostics);
    store.add_secret_version("p", "staging-tls", b"").await.unwrap();

    let read = client
        .call("read", json!({"resource_type": tls, "current_state": created.result}))
        .await;
    assert!(read.result.is_null());
    assert!(read.error.is_none());
    assert_eq!(read.diagnostics.len(), 1);
    assert_eq!(read.diagnostics[0].summary, "Failed to get TLS certificate secret data");
    assert_eq!(read.diagnostics[0].detail.as_deref(), Some("Empty payload"));

    shutdown.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_unconfigured_provider_reports_diagnostic() {
    let (mut client, shutdown, server) = start(ClearBladeGoogleProvider::new()).await;

    let response = client
        .call(
            "create",
            json!({
                "resource_type": "clearblade-google_mek",
                "planned_state": {"project_id": "p", "namespace": "n", "suffix": "-mek"}
            }),
        )
        .await;
    assert!(response.result.is_null());
    assert_eq!(response.diagnostics[0].summary, "provider not configured");
    assert_eq!(response.diagnostics[0].code.as_deref(), Some("failed_precondition"));

    let response = client.call("configure", json!({"config": {}})).await;
    assert_eq!(response.diagnostics[0].attribute.as_deref(), Some("project"));

    shutdown.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_helm_values_over_the_wire() {
    let (mut client, shutdown, server) = start(ClearBladeGoogleProvider::new()).await;
    let config = json!({"options": helm_options()});

    let validated = client
        .call(
            "validate_data_source_config",
            json!({"data_source_type": "clearblade-google_helm_values", "config": config}),
        )
        .await;
    assert!(validated.diagnostics.is_empty(), "{:?}", validated.diagnostics);

    let read = client
        .call(
            "read_data_source",
            json!({"data_source_type": "clearblade-google_helm_values", "config": config}),
        )
        .await;
    let values: Value = serde_json::from_str(read.result["values_json"].as_str().unwrap()).unwrap();
    assert_eq!(values["global"]["namespace"], "staging");
    assert!(read.result["values"].as_str().unwrap().contains("namespace: staging"));

    shutdown.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_protocol_errors_keep_connection_open() {
    let (mut client, shutdown, server) = start(ClearBladeGoogleProvider::new()).await;

    let response = client.call("frobnicate", Value::Null).await;
    assert_eq!(response.error.unwrap().code, "unimplemented");

    let response = client.call("read", json!({"resource_type": 7})).await;
    assert_eq!(response.error.unwrap().code, "invalid_request");

    let response = client
        .call("call_function", json!({"name": "get_helm_yaml_template", "arguments": []}))
        .await;
    assert_eq!(response.diagnostics[0].summary, "expected 1 argument(s), got 0");

    shutdown.send(()).unwrap();
    server.await.unwrap();
}
