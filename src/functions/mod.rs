//! Provider-defined functions.

mod helm_template;

pub use helm_template::{release_from_chart_url, HelmYamlTemplate, HELM_CHARTS_RAW_BASE_URL};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{AttributeType, FunctionSchema};

/// A pure function callable from configuration.
#[async_trait]
pub trait ProviderFunction: Send + Sync {
    /// Function name as used in configuration.
    fn name(&self) -> &'static str;

    /// Signature and documentation.
    fn schema(&self) -> FunctionSchema;

    /// Run with positional arguments already checked against the signature.
    async fn call(&self, arguments: Vec<Value>) -> Result<Value, ProviderError>;
}

/// All functions served by the provider.
pub fn all() -> Vec<Box<dyn ProviderFunction>> {
    vec![Box::new(HelmYamlTemplate::default())]
}

/// Check argument count and types against a function signature.
pub fn check_arguments(schema: &FunctionSchema, arguments: &[Value]) -> Result<(), ProviderError> {
    if arguments.len() != schema.parameters.len() {
        return Err(ProviderError::InvalidRequest(format!(
            "expected {} argument(s), got {}",
            schema.parameters.len(),
            arguments.len()
        )));
    }
    for (parameter, argument) in schema.parameters.iter().zip(arguments) {
        let (matches, expected) = match parameter.param_type {
            AttributeType::String => (argument.is_string(), "string"),
            AttributeType::Int64 => (argument.is_i64(), "int64"),
            AttributeType::Bool => (argument.is_boolean(), "bool"),
            _ => (true, ""),
        };
        if !matches {
            return Err(ProviderError::InvalidRequest(format!(
                "argument {} must be a {}",
                parameter.name, expected
            )));
        }
    }
    Ok(())
}
