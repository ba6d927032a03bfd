//! Tracing Subscriber Initialization
//!
//! Installs a `tracing-subscriber` registry filtered by `RUST_LOG`, writing
//! either JSON lines (for log shipping) or human-readable text.

use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ApiError::internal_error(format!(
                "Unknown log format '{}', expected 'json' or 'pretty'",
                other
            ))),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Log line format
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tollgate-api".to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Pretty,
            default_filter: "tollgate_api=debug,tower_http=debug,info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `TOLLGATE_SERVICE_NAME`, `TOLLGATE_ENVIRONMENT` and `TOLLGATE_LOG_FORMAT`.
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            service_name: std::env::var("TOLLGATE_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            environment: std::env::var("TOLLGATE_ENVIRONMENT").unwrap_or(defaults.environment),
            log_format: match std::env::var("TOLLGATE_LOG_FORMAT") {
                Ok(raw) => raw.parse()?,
                Err(_) => defaults.log_format,
            },
            default_filter: defaults.default_filter,
        })
    }
}

/// Install the global tracing subscriber.
///
/// Must be called once at startup, before any spans are created.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        environment = config.environment,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().ok(), Some(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>().ok(), Some(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tollgate-api");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }
}
