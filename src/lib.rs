//! ClearBlade Google provider
//!
//! A provider plugin that keeps the secrets of a ClearBlade IoT Enterprise
//! deployment in Google Secret Manager and renders the values file for its
//! Helm chart.
//!
//! # Overview
//!
//! - **Resources**: `mek`, `random_string`, `tls_certificate` and
//!   `filehosting_hmac_secret`, each backed by one Secret Manager secret
//!   named `namespace + suffix`
//! - **Data source**: `helm_values` turns typed chart options into YAML and JSON
//! - **Function**: `get_helm_yaml_template` downloads the default GKE values
//!   for a chart release
//! - **Server**: line-delimited JSON over TCP with a stdout handshake
//!
//! Every resource and data source type name carries the `clearblade-google_`
//! prefix.
//!
//! # Handshake Protocol
//!
//! When the plugin starts via [`serve`], it prints one line to stdout:
//!
//! ```text
//! CLEARBLADE_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `CLEARBLADE_PROVIDER|<protocol_version>|<address>`
//!
//! The host then connects to the address and sends one JSON request per line:
//!
//! ```text
//! {"id":1,"method":"configure","params":{"config":{"project":"acme-prod"}}}
//! {"id":1,"result":null,"diagnostics":[],"error":null}
//! ```
//!
//! # Testing
//!
//! [`testing::ProviderTester`] drives the provider in process against an
//! [`secrets::InMemorySecretStore`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data_sources;
pub mod error;
pub mod functions;
pub mod helm;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod secrets;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{ClearBladeGoogleProvider, PROVIDER_NAME, TYPE_PREFIX};
pub use schema::ProviderSchema;
pub use server::{serve, serve_listener, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{validate, validate_result};

pub use async_trait::async_trait;

pub use serde_json;
pub use tracing;
