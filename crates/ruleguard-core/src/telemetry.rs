//! Logging setup
//!
//! TigerStyle: Explicit telemetry configuration, safe to call repeatedly.
//!
//! All crates log through `tracing`. Binaries and tests call
//! `init_telemetry` once to install a `tracing-subscriber` formatter.

use crate::error::{Error, Result};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Write logs through the test harness capture instead of stdout
    pub test_writer: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ruleguard".to_string(),
            log_level: "info".to_string(),
            test_writer: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Configuration for `cargo test`: captured output, warnings only
    pub fn for_tests() -> Self {
        Self {
            service_name: "ruleguard-test".to_string(),
            log_level: "warn".to_string(),
            test_writer: true,
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `RULEGUARD_SERVICE_NAME`: Service name (default: "ruleguard")
    /// - `RUST_LOG`: Log level filter (default: "info")
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("RULEGUARD_SERVICE_NAME").unwrap_or_else(|_| "ruleguard".to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            service_name,
            log_level,
            test_writer: false,
        }
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.log_level`. Returns `Ok(false)`
/// if a subscriber was already installed, which lets every test call this.
pub fn init_telemetry(config: TelemetryConfig) -> Result<bool> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| Error::InvalidConfiguration {
            field: "log_level".into(),
            reason: e.to_string(),
        })?,
    };

    let fmt_layer = if config.test_writer {
        tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = %config.service_name, "Telemetry initialized");
    }
    Ok(installed)
}
