//! Read-only data sources.
//!
//! Data sources never touch Secret Manager, so they run whether or not the
//! provider has been configured.

mod helm_values;

pub use helm_values::HelmValuesDataSource;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};

/// A data source computed from its configuration.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Type name without the provider prefix.
    fn name(&self) -> &'static str;

    /// Data source schema.
    fn schema(&self) -> Schema;

    /// Checks beyond schema validation.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Produce the data source state from its configuration.
    async fn read(&self, config: Value) -> Result<Value, ProviderError>;
}

/// All data sources served by the provider.
pub fn all() -> Vec<Box<dyn DataSource>> {
    vec![Box::new(HelmValuesDataSource)]
}
