//! Configuration module
//!
//! Each service reads its configuration once at startup, either from the
//! process environment or from a YAML file. YAML values may reference the
//! environment with `${VAR}` or `${VAR:-default}`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variables
// ============================================================================

pub const ENV_SERVICE_NAME: &str = "SERVICE_NAME";
pub const ENV_OTLP_ENDPOINT: &str = "OTLP_EXPORTER_ENDPOINT";
pub const ENV_OTLP_TIMEOUT: &str = "OTLP_EXPORTER_TIMEOUT";
pub const ENV_OTLP_MAX_RETRIES: &str = "OTLP_EXPORTER_MAX_RETRIES";
pub const ENV_BIND_ADDRESS: &str = "BIND_ADDRESS";
pub const ENV_METRICS_ADDRESS: &str = "METRICS_ADDRESS";
pub const ENV_BSP_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
pub const ENV_BSP_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
pub const ENV_BSP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
pub const ENV_BSP_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "TELEMETRY_SHUTDOWN_TIMEOUT";

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https:// and names a host
fn is_valid_http_url(url: &str) -> bool {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return false;
    }
    url.parse::<hyper::Uri>()
        .map(|uri| uri.authority().is_some())
        .unwrap_or(false)
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Defaults for a service, with `service.name` set to `service_name`
    pub fn for_service(service_name: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            telemetry: TelemetryConfig {
                service_name: service_name.to_string(),
                ..TelemetryConfig::default()
            },
            metrics: MetricsConfig::default(),
        }
    }

    /// Load configuration from a YAML file
    ///
    /// An empty or absent `service_name` falls back to `default_service_name`.
    pub fn load<P: AsRef<Path>>(path: P, default_service_name: &str) -> Result<Self, ConfigError> {
        ConfigLoader::load(path, default_service_name)
    }

    /// Load configuration from the process environment
    pub fn from_env(default_service_name: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(default_service_name, |name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_lookup<F>(default_service_name: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::for_service(default_service_name);
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(name) = get(ENV_SERVICE_NAME) {
            config.telemetry.service_name = name;
        }
        if let Some(endpoint) = get(ENV_OTLP_ENDPOINT) {
            config.telemetry.otlp.endpoint = endpoint;
        }
        if let Some(address) = get(ENV_BIND_ADDRESS) {
            config.server.address = address;
        }
        config.metrics.address = get(ENV_METRICS_ADDRESS);

        let otlp = &mut config.telemetry.otlp;
        parse_env(&get, ENV_OTLP_TIMEOUT, &mut otlp.timeout_seconds)?;
        parse_env(&get, ENV_OTLP_MAX_RETRIES, &mut otlp.max_retries)?;

        let batch = &mut config.telemetry.batch;
        parse_env(&get, ENV_BSP_MAX_QUEUE_SIZE, &mut batch.max_queue_size)?;
        parse_env(&get, ENV_BSP_SCHEDULE_DELAY, &mut batch.scheduled_delay_millis)?;
        parse_env(&get, ENV_BSP_MAX_EXPORT_BATCH_SIZE, &mut batch.max_export_batch_size)?;
        parse_env(&get, ENV_BSP_EXPORT_TIMEOUT, &mut batch.export_timeout_millis)?;

        parse_env(
            &get,
            ENV_SHUTDOWN_TIMEOUT,
            &mut config.telemetry.shutdown_timeout_millis,
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .address
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Invalid bind address '{}': {}",
                    self.server.address, e
                ))
            })?;

        if let Some(ref address) = self.metrics.address {
            address.parse::<SocketAddr>().map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Invalid metrics address '{}': {}",
                    address, e
                ))
            })?;
        }

        self.telemetry.validate()
    }
}

fn parse_env<G, T>(get: &G, name: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = get(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnv {
                name,
                value: value.clone(),
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on. Default: "0.0.0.0:8000"
    #[serde(default = "default_bind_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

/// Metrics configuration
///
/// The metrics server only runs when an address is configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub address: Option<String>,
}

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Span pipeline configuration
///
/// # Example
///
/// ```yaml
/// telemetry:
///   service_name: "${SERVICE_NAME:-order-service}"
///   otlp:
///     endpoint: "http://jaeger:4317"
///     timeout_seconds: 10
///     max_retries: 3
///   batch:
///     max_queue_size: 2048
///     scheduled_delay_millis: 5000
///     max_export_batch_size: 512
///     export_timeout_millis: 30000
///   shutdown_timeout_millis: 5000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Value of the `service.name` resource attribute
    #[serde(default)]
    pub service_name: String,

    #[serde(default)]
    pub otlp: OtlpConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    /// Deadline for the final flush at shutdown. Default: 5000
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_millis: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            otlp: OtlpConfig::default(),
            batch: BatchConfig::default(),
            shutdown_timeout_millis: default_shutdown_timeout(),
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Service name cannot be empty".into(),
            ));
        }

        if !is_valid_http_url(&self.otlp.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid OTLP endpoint '{}': must be an http:// or https:// URL",
                self.otlp.endpoint
            )));
        }

        if self.otlp.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "OTLP export timeout must be greater than zero".into(),
            ));
        }

        let batch = &self.batch;
        if batch.max_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "Batch max_queue_size must be greater than zero".into(),
            ));
        }
        if batch.max_export_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "Batch max_export_batch_size must be greater than zero".into(),
            ));
        }
        if batch.max_export_batch_size > batch.max_queue_size {
            return Err(ConfigError::ValidationError(format!(
                "Batch max_export_batch_size ({}) cannot exceed max_queue_size ({})",
                batch.max_export_batch_size, batch.max_queue_size
            )));
        }
        if batch.scheduled_delay_millis == 0 || batch.export_timeout_millis == 0 {
            return Err(ConfigError::ValidationError(
                "Batch scheduled delay and export timeout must be greater than zero".into(),
            ));
        }

        if self.shutdown_timeout_millis == 0 {
            return Err(ConfigError::ValidationError(
                "Telemetry shutdown timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn default_shutdown_timeout() -> u64 {
    5000
}

/// OTLP/gRPC exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    /// Collector endpoint URL. Default: "http://jaeger:4317"
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,

    /// Timeout for each export RPC in seconds. Default: 10
    #[serde(default = "default_otlp_timeout")]
    pub timeout_seconds: u64,

    /// Retries for retryable gRPC failures. Default: 3
    #[serde(default = "default_otlp_max_retries")]
    pub max_retries: usize,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: default_otlp_endpoint(),
            timeout_seconds: default_otlp_timeout(),
            max_retries: default_otlp_max_retries(),
        }
    }
}

fn default_otlp_endpoint() -> String {
    "http://jaeger:4317".to_string()
}

fn default_otlp_timeout() -> u64 {
    10
}

fn default_otlp_max_retries() -> usize {
    3
}

/// Batch span processor configuration.
///
/// The processor exports when `max_export_batch_size` spans are pending or
/// every `scheduled_delay_millis`, whichever comes first. Spans arriving while
/// `max_queue_size` spans are already queued are dropped.
///
/// # Example
///
/// ```yaml
/// batch:
///   max_queue_size: 2048
///   scheduled_delay_millis: 5000  # Export every 5 seconds
///   max_export_batch_size: 512
///   export_timeout_millis: 30000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Capacity of the span queue. Default: 2048
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Delay in milliseconds between scheduled exports. Default: 5000
    #[serde(default = "default_scheduled_delay")]
    pub scheduled_delay_millis: u64,

    /// Maximum number of spans per export batch. Default: 512
    #[serde(default = "default_max_export_batch_size")]
    pub max_export_batch_size: usize,

    /// Deadline for one export, retries included. Default: 30000
    #[serde(default = "default_export_timeout")]
    pub export_timeout_millis: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            scheduled_delay_millis: default_scheduled_delay(),
            max_export_batch_size: default_max_export_batch_size(),
            export_timeout_millis: default_export_timeout(),
        }
    }
}

fn default_max_queue_size() -> usize {
    2048
}

fn default_scheduled_delay() -> u64 {
    5000
}

fn default_max_export_batch_size() -> usize {
    512
}

fn default_export_timeout() -> u64 {
    30000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = Config::from_lookup("order-service", lookup(&[])).unwrap();

        assert_eq!(config.telemetry.service_name, "order-service");
        assert_eq!(config.telemetry.otlp.endpoint, "http://jaeger:4317");
        assert_eq!(config.server.address, "0.0.0.0:8000");
        assert_eq!(config.telemetry.batch.max_queue_size, 2048);
        assert_eq!(config.telemetry.batch.scheduled_delay_millis, 5000);
        assert_eq!(config.telemetry.batch.max_export_batch_size, 512);
        assert_eq!(config.telemetry.batch.export_timeout_millis, 30000);
        assert!(config.metrics.address.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::from_lookup(
            "notification-service",
            lookup(&[
                ("SERVICE_NAME", "notify-eu"),
                ("OTLP_EXPORTER_ENDPOINT", "http://collector:4317"),
                ("BIND_ADDRESS", "127.0.0.1:9000"),
                ("METRICS_ADDRESS", "127.0.0.1:9100"),
                ("OTEL_BSP_MAX_QUEUE_SIZE", "64"),
                ("OTEL_BSP_MAX_EXPORT_BATCH_SIZE", "16"),
                ("OTLP_EXPORTER_MAX_RETRIES", "0"),
            ]),
        )
        .unwrap();

        assert_eq!(config.telemetry.service_name, "notify-eu");
        assert_eq!(config.telemetry.otlp.endpoint, "http://collector:4317");
        assert_eq!(config.server.address, "127.0.0.1:9000");
        assert_eq!(config.metrics.address.as_deref(), Some("127.0.0.1:9100"));
        assert_eq!(config.telemetry.batch.max_queue_size, 64);
        assert_eq!(config.telemetry.batch.max_export_batch_size, 16);
        assert_eq!(config.telemetry.otlp.max_retries, 0);
    }

    #[test]
    fn test_non_numeric_env_is_rejected() {
        let result = Config::from_lookup(
            "order-service",
            lookup(&[("OTEL_BSP_MAX_QUEUE_SIZE", "lots")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                name: "OTEL_BSP_MAX_QUEUE_SIZE",
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_endpoint_is_rejected() {
        for endpoint in ["jaeger:4317", "grpc://jaeger:4317", "http://"] {
            let result = Config::from_lookup(
                "order-service",
                lookup(&[("OTLP_EXPORTER_ENDPOINT", endpoint)]),
            );
            assert!(result.is_err(), "{}", endpoint);
        }
    }

    #[test]
    fn test_batch_larger_than_queue_is_rejected() {
        let mut config = Config::for_service("order-service");
        config.telemetry.batch.max_queue_size = 10;
        config.telemetry.batch.max_export_batch_size = 20;
        assert!(config.validate().is_err());

        config.telemetry.batch.max_export_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_service_name_is_rejected() {
        let config = Config::for_service("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_bind_address_is_rejected() {
        let mut config = Config::for_service("order-service");
        config.server.address = "invalid".into();
        assert!(config.validate().is_err());
    }
}
