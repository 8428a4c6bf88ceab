//! Error types for the ClearBlade Google provider.

use thiserror::Error;

/// Errors that can occur while serving provider requests.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested secret or resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An unexpected failure inside the provider or an upstream API.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// The provider is misconfigured or has not been configured yet.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource, data source or function is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A JSON serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A YAML serialization error occurred while rendering Helm values.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An HTTP transport error talking to Google APIs or GitHub.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The secret already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Sdk(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unimplemented(msg)
            | Self::InvalidRequest(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Yaml(err) => err.to_string(),
            Self::Http(err) => err.to_string(),
        }
    }

    /// Stable, machine-readable code reported on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::UnknownResource(_) => "not_found",
            Self::Validation(_) | Self::Serialization(_) | Self::InvalidRequest(_) => {
                "invalid_argument"
            },
            Self::Sdk(_) | Self::Yaml(_) => "internal",
            Self::Configuration(_) | Self::FailedPrecondition(_) => "failed_precondition",
            Self::Http(err) if err.is_timeout() => "deadline_exceeded",
            Self::Http(_) | Self::Unavailable(_) => "unavailable",
            Self::AlreadyExists(_) => "already_exists",
            Self::PermissionDenied(_) => "permission_denied",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Unimplemented(_) => "unimplemented",
        }
    }

    /// Whether this error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Prefix the message with context, keeping the variant.
    ///
    /// ```
    /// use clearblade_google_provider::ProviderError;
    ///
    /// let err = ProviderError::NotFound("projects/p/secrets/s".to_string())
    ///     .context("Failed to get MEK secret");
    /// assert_eq!(err.message(), "Failed to get MEK secret: projects/p/secrets/s");
    /// assert!(err.is_not_found());
    /// ```
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        let wrap = |msg: String| format!("{}: {}", context, msg);
        match self {
            Self::NotFound(msg) => Self::NotFound(wrap(msg)),
            Self::Validation(msg) => Self::Validation(wrap(msg)),
            Self::Sdk(msg) => Self::Sdk(wrap(msg)),
            Self::Configuration(msg) => Self::Configuration(wrap(msg)),
            Self::UnknownResource(msg) => Self::UnknownResource(wrap(msg)),
            Self::AlreadyExists(msg) => Self::AlreadyExists(wrap(msg)),
            Self::PermissionDenied(msg) => Self::PermissionDenied(wrap(msg)),
            Self::ResourceExhausted(msg) => Self::ResourceExhausted(wrap(msg)),
            Self::Unavailable(msg) => Self::Unavailable(wrap(msg)),
            Self::DeadlineExceeded(msg) => Self::DeadlineExceeded(wrap(msg)),
            Self::FailedPrecondition(msg) => Self::FailedPrecondition(wrap(msg)),
            Self::Unimplemented(msg) => Self::Unimplemented(wrap(msg)),
            Self::InvalidRequest(msg) => Self::InvalidRequest(wrap(msg)),
            Self::Serialization(err) => Self::Sdk(wrap(err.to_string())),
            Self::Yaml(err) => Self::Sdk(wrap(err.to_string())),
            Self::Http(err) if err.is_timeout() => Self::DeadlineExceeded(wrap(err.to_string())),
            Self::Http(err) => Self::Unavailable(wrap(err.to_string())),
        }
    }

    /// Map an HTTP status from a Google API into the matching variant.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::InvalidRequest(message),
            401 | 403 => Self::PermissionDenied(message),
            404 => Self::NotFound(message),
            409 => Self::AlreadyExists(message),
            412 => Self::FailedPrecondition(message),
            429 => Self::ResourceExhausted(message),
            501 => Self::Unimplemented(message),
            503 => Self::Unavailable(message),
            504 => Self::DeadlineExceeded(message),
            _ => Self::Sdk(format!("HTTP {}: {}", status, message)),
        }
    }
}
