//! Plugin server.
//!
//! This module provides the `ProviderService` trait the provider implements,
//! and the `serve` functions that expose it over a line-delimited JSON
//! protocol with the handshake line on stdout.
//!
//! # Wire format
//!
//! Each TCP connection carries one JSON request per line:
//!
//! ```text
//! {"id": 1, "method": "read", "params": {"resource_type": "...", "current_state": {...}}}
//! ```
//!
//! and receives exactly one response line per request, in order:
//!
//! ```text
//! {"id": 1, "result": {...}, "diagnostics": [], "error": null}
//! ```
//!
//! Provider failures are reported as error diagnostics. `error` is only set
//! for requests the server could not dispatch (malformed JSON, unknown
//! method, bad parameters).
//!
//! # Signal Handling
//!
//! The server handles SIGTERM and SIGINT for graceful shutdown. When a
//! signal is received, the server:
//! 1. Stops accepting new connections
//! 2. Lets every connection finish the request it is handling (bounded by
//!    [`ServeOptions::shutdown_timeout`])
//! 3. Calls the provider's `stop()` method

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::wrappers::{LinesStream, TcpListenerStream};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// Operations the host can invoke on a provider.
///
/// Resource types are full type names such as `clearblade-google_mek`.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources, data sources
    /// and functions.
    fn schema(&self) -> ProviderSchema;

    /// Capability flags advertised in the metadata.
    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities::default()
    }

    /// Return provider metadata. By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut metadata = ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            functions: schema.functions.keys().cloned().collect(),
            capabilities: self.capabilities(),
        };
        metadata.resources.sort();
        metadata.data_sources.sort();
        metadata.functions.sort();
        metadata
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource. `Value::Null` means it is gone.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    // =========================================================================
    // Data Sources & Functions
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read a data source.
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            data_source_type
        )))
    }

    /// Call a provider function.
    async fn call_function(&self, name: &str, arguments: Vec<Value>) -> Result<Value, ProviderError> {
        let _ = arguments;
        Err(ProviderError::UnknownResource(format!("Unknown function: {}", name)))
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Echoed back in the response.
    pub id: u64,
    /// Operation name, e.g. `plan`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers; 0 when the request could not be parsed.
    pub id: u64,
    /// Method result, `null` when there is none.
    #[serde(default)]
    pub result: Value,
    /// Provider diagnostics.
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the request could not be dispatched.
    #[serde(default)]
    pub error: Option<WireError>,
}

/// A protocol-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// `invalid_request` or `unimplemented`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl Response {
    fn ok(id: u64, result: Value, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            id,
            result,
            diagnostics,
            error: None,
        }
    }

    fn failed(id: u64, err: ProviderError) -> Self {
        Self::ok(id, Value::Null, error_to_diagnostics(err))
    }

    fn protocol_error(id: u64, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            diagnostics: vec![],
            error: Some(WireError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

/// Turn a provider error into an error diagnostic.
///
/// Context added with [`ProviderError::context`] becomes the summary and the
/// underlying cause the detail. The diagnostic carries [`ProviderError::code`].
pub fn error_to_diagnostics(err: ProviderError) -> Vec<Diagnostic> {
    let message = err.message();
    let diagnostic = match message.split_once(": ") {
        Some((summary, detail)) => Diagnostic::error(summary).with_detail(detail),
        None => Diagnostic::error(message.clone()),
    };
    vec![diagnostic.with_code(err.code())]
}

#[derive(Deserialize)]
struct ConfigParams {
    #[serde(default)]
    config: Value,
}

#[derive(Deserialize)]
struct ResourceConfigParams {
    resource_type: String,
    #[serde(default)]
    config: Value,
}

#[derive(Deserialize)]
struct UpgradeParams {
    resource_type: String,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    state: Value,
}

#[derive(Deserialize)]
struct PlanParams {
    resource_type: String,
    #[serde(default)]
    prior_state: Option<Value>,
    #[serde(default)]
    proposed_state: Value,
    #[serde(default)]
    config: Value,
}

#[derive(Deserialize)]
struct CreateParams {
    resource_type: String,
    planned_state: Value,
}

#[derive(Deserialize)]
struct StateParams {
    resource_type: String,
    current_state: Value,
}

#[derive(Deserialize)]
struct UpdateParams {
    resource_type: String,
    prior_state: Value,
    planned_state: Value,
}

#[derive(Deserialize)]
struct ImportParams {
    resource_type: String,
    id: String,
}

#[derive(Deserialize)]
struct DataSourceParams {
    data_source_type: String,
    #[serde(default)]
    config: Value,
}

#[derive(Deserialize)]
struct FunctionParams {
    name: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

fn params<T: DeserializeOwned>(request: &Request) -> Result<T, Response> {
    serde_json::from_value(request.params.clone()).map_err(|e| {
        Response::protocol_error(
            request.id,
            "invalid_request",
            format!("invalid params for {}: {}", request.method, e),
        )
    })
}

fn to_result<T: Serialize>(id: u64, value: Result<T, ProviderError>) -> Response {
    match value.and_then(|v| serde_json::to_value(v).map_err(ProviderError::from)) {
        Ok(result) => Response::ok(id, result, vec![]),
        Err(e) => Response::failed(id, e),
    }
}

fn diagnostics_result(id: u64, operation: &str, value: Result<Vec<Diagnostic>, ProviderError>) -> Response {
    match value {
        Ok(diagnostics) => {
            if has_errors(&diagnostics) {
                warn!(diagnostics = diagnostics.len(), "{} completed with errors", operation);
            } else {
                info!("{} completed successfully", operation);
            }
            Response::ok(id, Value::Null, diagnostics)
        }
        Err(e) => {
            error!(error = %e, "{} failed", operation);
            Response::failed(id, e)
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Routes decoded requests to a [`ProviderService`].
pub struct Dispatcher<P: ProviderService> {
    provider: Arc<P>,
}

impl<P: ProviderService> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: ProviderService> Dispatcher<P> {
    /// Wrap a shared provider.
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Handle one raw request line.
    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "malformed request");
                Response::protocol_error(0, "invalid_request", format!("malformed request: {}", e))
            }
        }
    }

    /// Handle one decoded request.
    pub async fn handle(&self, request: Request) -> Response {
        let outcome = match request.method.as_str() {
            "get_metadata" => Ok(self.get_metadata(request.id)),
            "get_schema" => Ok(self.get_schema(request.id)),
            "validate_provider_config" => self.validate_provider_config(&request).await,
            "configure" => self.configure(&request).await,
            "stop" => Ok(self.stop(request.id).await),
            "validate_resource_config" => self.validate_resource_config(&request).await,
            "upgrade_resource_state" => self.upgrade_resource_state(&request).await,
            "plan" => self.plan(&request).await,
            "create" => self.create(&request).await,
            "read" => self.read(&request).await,
            "update" => self.update(&request).await,
            "delete" => self.delete(&request).await,
            "import_resource_state" => self.import_resource_state(&request).await,
            "validate_data_source_config" => self.validate_data_source_config(&request).await,
            "read_data_source" => self.read_data_source(&request).await,
            "call_function" => self.call_function(&request).await,
            other => {
                warn!(method = other, "unknown method");
                Ok(Response::protocol_error(
                    request.id,
                    "unimplemented",
                    format!("unknown method: {}", other),
                ))
            }
        };
        outcome.unwrap_or_else(|response| response)
    }

    #[instrument(skip(self), name = "rpc.get_metadata")]
    fn get_metadata(&self, id: u64) -> Response {
        let metadata = self.provider.metadata();
        info!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            functions = metadata.functions.len(),
            "GetMetadata completed"
        );
        to_result(id, Ok(metadata))
    }

    #[instrument(skip(self), name = "rpc.get_schema")]
    fn get_schema(&self, id: u64) -> Response {
        let schema = self.provider.schema();
        info!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema completed"
        );
        to_result(id, Ok(schema))
    }

    #[instrument(skip_all, name = "rpc.validate_provider_config")]
    async fn validate_provider_config(&self, request: &Request) -> Result<Response, Response> {
        let p: ConfigParams = params(request)?;
        let result = self.provider.validate_provider_config(p.config).await;
        Ok(diagnostics_result(request.id, "ValidateProviderConfig", result))
    }

    #[instrument(skip_all, name = "rpc.configure")]
    async fn configure(&self, request: &Request) -> Result<Response, Response> {
        let p: ConfigParams = params(request)?;
        let result = self.provider.configure(p.config).await;
        Ok(diagnostics_result(request.id, "Configure", result))
    }

    #[instrument(skip(self), name = "rpc.stop")]
    async fn stop(&self, id: u64) -> Response {
        info!("Stop called");
        match self.provider.stop().await {
            Ok(()) => Response::ok(id, Value::Null, vec![]),
            Err(e) => {
                error!(error = %e, "Stop failed");
                Response::failed(id, e)
            }
        }
    }

    #[instrument(skip_all, name = "rpc.validate_resource_config")]
    async fn validate_resource_config(&self, request: &Request) -> Result<Response, Response> {
        let p: ResourceConfigParams = params(request)?;
        debug!(resource_type = %p.resource_type, "ValidateResourceConfig called");
        let result = self
            .provider
            .validate_resource_config(&p.resource_type, p.config)
            .await;
        Ok(diagnostics_result(request.id, "ValidateResourceConfig", result))
    }

    #[instrument(skip_all, name = "rpc.upgrade_resource_state")]
    async fn upgrade_resource_state(&self, request: &Request) -> Result<Response, Response> {
        let p: UpgradeParams = params(request)?;
        debug!(resource_type = %p.resource_type, version = p.version, "UpgradeResourceState called");
        let result = self
            .provider
            .upgrade_resource_state(&p.resource_type, p.version, p.state)
            .await;
        if let Err(e) = &result {
            error!(resource_type = %p.resource_type, error = %e, "UpgradeResourceState failed");
        }
        Ok(to_result(request.id, result))
    }

    #[instrument(skip_all, name = "rpc.plan")]
    async fn plan(&self, request: &Request) -> Result<Response, Response> {
        let p: PlanParams = params(request)?;
        debug!(resource_type = %p.resource_type, "Plan called");
        let result = self
            .provider
            .plan(&p.resource_type, p.prior_state, p.proposed_state, p.config)
            .await;
        match &result {
            Ok(plan) => info!(
                resource_type = %p.resource_type,
                changes = plan.changes.len(),
                requires_replace = plan.requires_replace,
                "Plan completed"
            ),
            Err(e) => error!(resource_type = %p.resource_type, error = %e, "Plan failed"),
        }
        Ok(to_result(request.id, result))
    }

    #[instrument(skip_all, name = "rpc.create")]
    async fn create(&self, request: &Request) -> Result<Response, Response> {
        let p: CreateParams = params(request)?;
        debug!(resource_type = %p.resource_type, "Create called");
        let result = self.provider.create(&p.resource_type, p.planned_state).await;
        match &result {
            Ok(_) => info!(resource_type = %p.resource_type, "Create completed"),
            Err(e) => error!(resource_type = %p.resource_type, error = %e, "Create failed"),
        }
        Ok(to_result(request.id, result))
    }

    #[instrument(skip_all, name = "rpc.read")]
    async fn read(&self, request: &Request) -> Result<Response, Response> {
        let p: StateParams = params(request)?;
        debug!(resource_type = %p.resource_type, "Read called");
        let result = self.provider.read(&p.resource_type, p.current_state).await;
        match &result {
            Ok(Value::Null) => info!(resource_type = %p.resource_type, "Read: resource is gone"),
            Ok(_) => debug!(resource_type = %p.resource_type, "Read completed"),
            Err(e) => error!(resource_type = %p.resource_type, error = %e, "Read failed"),
        }
        Ok(to_result(request.id, result))
    }

    #[instrument(skip_all, name = "rpc.update")]
    async fn update(&self, request: &Request) -> Result<Response, Response> {
        let p: UpdateParams = params(request)?;
        debug!(resource_type = %p.resource_type, "Update called");
        let result = self
            .provider
            .update(&p.resource_type, p.prior_state, p.planned_state)
            .await;
        match &result {
            Ok(_) => info!(resource_type = %p.resource_type, "Update completed"),
            Err(e) => error!(resource_type = %p.resource_type, error = %e, "Update failed"),
        }
        Ok(to_result(request.id, result))
    }

    #[instrument(skip_all, name = "rpc.delete")]
    async fn delete(&self, request: &Request) -> Result<Response, Response> {
        let p: StateParams = params(request)?;
        debug!(resource_type = %p.resource_type, "Delete called");
        let result = self.provider.delete(&p.resource_type, p.current_state).await;
        match &result {
            Ok(()) => info!(resource_type = %p.resource_type, "Delete completed"),
            Err(e) => error!(resource_type = %p.resource_type, error = %e, "Delete failed"),
        }
        Ok(to_result(request.id, result.map(|()| Value::Null)))
    }

    #[instrument(skip_all, name = "rpc.import_resource_state")]
    async fn import_resource_state(&self, request: &Request) -> Result<Response, Response> {
        let p: ImportParams = params(request)?;
        debug!(resource_type = %p.resource_type, id = %p.id, "ImportResourceState called");
        let result = self.provider.import_resource(&p.resource_type, &p.id).await;
        match &result {
            Ok(imported) => info!(
                resource_type = %p.resource_type,
                count = imported.len(),
                "ImportResourceState completed"
            ),
            Err(e) => error!(resource_type = %p.resource_type, error = %e, "ImportResourceState failed"),
        }
        Ok(to_result(request.id, result))
    }

    #[instrument(skip_all, name = "rpc.validate_data_source_config")]
    async fn validate_data_source_config(&self, request: &Request) -> Result<Response, Response> {
        let p: DataSourceParams = params(request)?;
        debug!(data_source_type = %p.data_source_type, "ValidateDataSourceConfig called");
        let result = self
            .provider
            .validate_data_source_config(&p.data_source_type, p.config)
            .await;
        Ok(diagnostics_result(request.id, "ValidateDataSourceConfig", result))
    }

    #[instrument(skip_all, name = "rpc.read_data_source")]
    async fn read_data_source(&self, request: &Request) -> Result<Response, Response> {
        let p: DataSourceParams = params(request)?;
        debug!(data_source_type = %p.data_source_type, "ReadDataSource called");
        let result = self
            .provider
            .read_data_source(&p.data_source_type, p.config)
            .await;
        match &result {
            Ok(_) => info!(data_source_type = %p.data_source_type, "ReadDataSource completed"),
            Err(e) => error!(data_source_type = %p.data_source_type, error = %e, "ReadDataSource failed"),
        }
        Ok(to_result(request.id, result))
    }

    #[instrument(skip_all, name = "rpc.call_function")]
    async fn call_function(&self, request: &Request) -> Result<Response, Response> {
        let p: FunctionParams = params(request)?;
        debug!(function = %p.name, "CallFunction called");
        let result = self.provider.call_function(&p.name, p.arguments).await;
        if let Err(e) = &result {
            error!(function = %p.name, error = %e, "CallFunction failed");
        }
        Ok(to_result(request.id, result))
    }
}

// =============================================================================
// Serving
// =============================================================================

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long to wait for in-flight requests after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
    /// Address to listen on. Default: `127.0.0.1:0` (any free port).
    pub bind_address: SocketAddr,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the listen address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// If the handlers cannot be installed, this waits forever and the process
/// is left to be killed.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    return std::future::pending::<()>().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install CTRL+C handler");
            return std::future::pending::<()>().await;
        }
        info!("Received CTRL+C, initiating graceful shutdown");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider on any free local port.
///
/// This function:
/// 1. Binds `127.0.0.1:0`
/// 2. Outputs the handshake string to stdout
/// 3. Serves requests until SIGTERM/SIGINT
///
/// The handshake format is: `CLEARBLADE_PROVIDER|<version>|<address>`
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(options.bind_address).await?;
    let addr = listener.local_addr()?;

    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "Provider server starting");

    serve_listener(provider, listener, options, wait_for_shutdown_signal()).await?;
    Ok(())
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// Does not print the handshake. After `shutdown`, open connections finish
/// the request they are handling, bounded by the shutdown timeout, and the
/// provider's `stop()` is called.
pub async fn serve_listener<P, F>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
    shutdown: F,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    F: Future<Output = ()> + Send,
{
    let provider = Arc::new(provider);
    let dispatcher = Dispatcher::new(Arc::clone(&provider));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    let mut incoming = TcpListenerStream::new(listener);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = incoming.next() => match accepted {
                Some(Ok(stream)) => {
                    let peer = stream.peer_addr().ok();
                    debug!(?peer, "connection accepted");
                    connections.spawn(serve_connection(dispatcher.clone(), stream, shutdown_rx.clone()));
                }
                Some(Err(e)) => warn!(error = %e, "accept failed"),
                None => break,
            },
            // Reap finished connections so the set does not grow.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(open_connections = connections.len(), "Shutting down provider server");
    let _ = shutdown_tx.send(true);

    let drain = async {
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "connection task failed");
            }
        }
    };
    if tokio::time::timeout(options.shutdown_timeout, drain).await.is_err() {
        warn!(
            timeout = ?options.shutdown_timeout,
            "Shutdown timeout exceeded, forcing shutdown"
        );
        connections.abort_all();
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

async fn serve_connection<P: ProviderService>(
    dispatcher: Dispatcher<P>,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = LinesStream::new(BufReader::new(reader).lines());

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            line = lines.next() => line,
        };
        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "failed to read request");
                break;
            }
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        // A request that has been read is always answered, even during shutdown.
        let response = dispatcher.handle_line(&line).await;
        let mut encoded = match serde_json::to_vec(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "failed to encode response");
                break;
            }
        };
        encoded.push(b'\n');
        if let Err(e) = writer.write_all(&encoded).await {
            warn!(error = %e, "failed to write response");
            break;
        }
        if *shutdown.borrow() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributeChange;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct EchoProvider {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ProviderService for EchoProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_resource("echo_b", crate::schema::Schema::v0())
                .with_resource("echo_a", crate::schema::Schema::v0())
        }

        async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            if config.get("project").is_none() {
                return Ok(vec![Diagnostic::error("Missing project")]);
            }
            Ok(vec![])
        }

        async fn stop(&self) -> Result<(), ProviderError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn plan(
            &self,
            _resource_type: &str,
            _prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(PlanResult::with_changes(
                proposed_state.clone(),
                vec![AttributeChange::added("value", proposed_state)],
                false,
            ))
        }

        async fn create(&self, _resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn read(&self, _resource_type: &str, _current_state: Value) -> Result<Value, ProviderError> {
            Err(ProviderError::Sdk("Failed to get secret: backend down".to_string()))
        }

        async fn update(
            &self,
            _resource_type: &str,
            _prior_state: Value,
            planned_state: Value,
        ) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn delete(&self, _resource_type: &str, _current_state: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher<EchoProvider> {
        Dispatcher::new(Arc::new(EchoProvider::default()))
    }

    #[test]
    fn test_error_to_diagnostics_splits_context() {
        let diagnostics = error_to_diagnostics(
            ProviderError::NotFound("projects/p/secrets/s".into()).context("Failed to read MEK"),
        );
        assert_eq!(diagnostics[0].summary, "Failed to read MEK");
        assert_eq!(diagnostics[0].detail.as_deref(), Some("projects/p/secrets/s"));
        assert_eq!(diagnostics[0].code.as_deref(), Some("not_found"));

        let diagnostics = error_to_diagnostics(ProviderError::Configuration("provider not configured".into()));
        assert_eq!(diagnostics[0].summary, "provider not configured");
        assert!(diagnostics[0].detail.is_none());
    }

    #[tokio::test]
    async fn test_metadata_is_sorted() {
        let response = dispatcher()
            .handle(Request { id: 7, method: "get_metadata".into(), params: Value::Null })
            .await;
        assert_eq!(response.id, 7);
        assert_eq!(response.result["resources"], json!(["echo_a", "echo_b"]));
        assert_eq!(response.result["capabilities"]["plan_destroy"], false);
    }

    #[test]
    fn test_serve_options() {
        let defaults = ServeOptions::new();
        assert_eq!(defaults.bind_address.port(), 0);
        assert_eq!(defaults.shutdown_timeout, Duration::from_secs(30));

        let addr = SocketAddr::from(([0, 0, 0, 0], 50051));
        let options = ServeOptions::new().with_bind_address(addr);
        assert_eq!(options.bind_address, addr);
    }

    #[tokio::test]
    async fn test_configure_response_line() {
        let response = dispatcher()
            .handle_line(r#"{"id":1,"method":"configure","params":{"config":{"project":"acme-prod"}}}"#)
            .await;
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"id":1,"result":null,"diagnostics":[],"error":null}"#
        );
    }

    #[tokio::test]
    async fn test_configure_diagnostics() {
        let response = dispatcher()
            .handle_line(r#"{"id": 1, "method": "configure", "params": {"config": {}}}"#)
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(response.diagnostics[0].summary, "Missing project");
    }

    #[tokio::test]
    async fn test_provider_error_becomes_diagnostic() {
        let response = dispatcher()
            .handle_line(r#"{"id": 2, "method": "read", "params": {"resource_type": "echo_a", "current_state": {}}}"#)
            .await;
        assert!(response.error.is_none());
        assert!(response.result.is_null());
        assert_eq!(response.diagnostics[0].summary, "Failed to get secret");
        assert_eq!(response.diagnostics[0].detail.as_deref(), Some("backend down"));
        assert_eq!(response.diagnostics[0].code.as_deref(), Some("internal"));

        let line = serde_json::to_string(&response).unwrap();
        assert!(line.contains(r#""code":"internal""#));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let response = dispatcher().handle_line("not json").await;
        assert_eq!(response.error.unwrap().code, "invalid_request");

        let response = dispatcher().handle_line(r#"{"id": 3, "method": "frobnicate"}"#).await;
        assert_eq!(response.id, 3);
        assert_eq!(response.error.unwrap().code, "unimplemented");

        let response = dispatcher()
            .handle_line(r#"{"id": 4, "method": "create", "params": {}}"#)
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "invalid_request");
        assert!(error.message.contains("create"));
    }

    #[tokio::test]
    async fn test_default_import_and_function_are_errors() {
        let response = dispatcher()
            .handle_line(r#"{"id": 5, "method": "import_resource_state", "params": {"resource_type": "echo_a", "id": "x"}}"#)
            .await;
        assert!(has_errors(&response.diagnostics));

        let response = dispatcher()
            .handle_line(r#"{"id": 6, "method": "call_function", "params": {"name": "nope"}}"#)
            .await;
        assert_eq!(response.diagnostics[0].summary, "Unknown function");
    }

    #[tokio::test]
    async fn test_serve_listener_round_trip_and_shutdown() {
        let provider = EchoProvider::default();
        let stopped = Arc::clone(&provider.stopped);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve_listener(
            provider,
            listener,
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(5)),
            async move {
                let _ = rx.await;
            },
        ));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"id\": 1, \"method\": \"create\", \"params\": {\"resource_type\": \"echo_a\", \"planned_state\": {\"a\": 1}}}\n")
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, 1);
        assert_eq!(response.result, json!({"a": 1}));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(stopped.load(Ordering::SeqCst));
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
