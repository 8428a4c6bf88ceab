//! Logging setup for the provider binary.
//!
//! All logs go to **stderr**. Stdout is reserved for the handshake line the
//! host reads when it launches the plugin.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: log filter (e.g. `info`, `clearblade_google_provider=debug`)
//! - `CLEARBLADE_LOG_FORMAT`: `json` for structured JSON lines, anything else
//!   for the compact human-readable format
//!
//! ```bash
//! RUST_LOG=clearblade_google_provider=debug CLEARBLADE_LOG_FORMAT=json \
//!     ./terraform-provider-clearblade-google
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "CLEARBLADE_LOG_FORMAT";

/// Output format for provider logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact, human-readable lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Read the format from [`LOG_FORMAT_ENV`].
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Compact
        }
    }
}

/// Initialize logging with an `info` default level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging, using `default_level` when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    if !install(default_level, LogFormat::from_env()) {
        panic!("a global tracing subscriber is already installed");
    }
}

/// Try to initialize logging, returning false if already initialized.
///
/// Used by tests, where several cases may race to install a subscriber.
pub fn try_init_logging() -> bool {
    install("info", LogFormat::from_env())
}

fn install(default_level: &str, format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
            .is_ok(),
    }
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so these
    // tests only cover parsing.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("clearblade_google_provider=debug").is_ok());
        assert!(EnvFilter::try_new("warn,clearblade_google_provider::secrets=trace").is_ok());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
    }
}
