//! Span pipeline initialization and lifecycle management
//!
//! Builds the resource, OTLP exporter, batch processor and provider for a
//! service, and tears them down with a bounded final flush.

use crate::config::{ConfigError, TelemetryConfig};
use crate::telemetry::export::{SpanExporter, TraceError};
use crate::telemetry::otlp::OtlpExporter;
use crate::telemetry::processor::{BatchConfig, BatchSpanProcessor};
use crate::telemetry::provider::TracerProvider;
use crate::telemetry::resource::Resource;
use crate::telemetry::retry::RetryPolicy;
use crate::telemetry::tracer::Tracer;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during telemetry setup and teardown
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid OTLP endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid telemetry configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry shutdown failed: {0}")]
    Shutdown(#[from] TraceError),
}

/// RAII guard for the span pipeline
///
/// Prefer [`shutdown_telemetry`], which waits for the final flush. Dropping
/// an active guard starts the same shutdown in the background without
/// waiting for it.
#[derive(Debug)]
pub struct TelemetryGuard {
    provider: TracerProvider,
    shutdown_timeout: Duration,
    active: bool,
}

impl TelemetryGuard {
    fn new(provider: TracerProvider, shutdown_timeout: Duration) -> Self {
        Self {
            provider,
            shutdown_timeout,
            active: true,
        }
    }

    /// The process-wide provider
    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Shorthand for `provider().tracer(name)`
    pub fn tracer(&self, name: impl Into<Arc<str>>) -> Tracer {
        self.provider.tracer(name)
    }

    /// Check if the pipeline has not been shut down yet
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let provider = self.provider.clone();
                let timeout = self.shutdown_timeout;
                handle.spawn(async move {
                    if let Err(e) = provider.shutdown(timeout).await {
                        warn!(error = %e, "Background telemetry shutdown failed");
                    }
                });
            }
            Err(_) => warn!("Telemetry guard dropped outside a runtime; pending spans discarded"),
        }
    }
}

/// Initialize the span pipeline for a service
///
/// Must be called from within a tokio runtime: the exporter channel and the
/// batch worker are spawned on it.
///
/// # Arguments
///
/// * `config` - Telemetry configuration (service name, collector, batching)
///
/// # Returns
///
/// * `Ok(TelemetryGuard)` - Guard owning the provider
/// * `Err(TelemetryError)` - If the configuration or endpoint is invalid
///
/// # Example
///
/// ```no_run
/// use traced_services::config::Config;
/// use traced_services::telemetry::{init_telemetry, shutdown_telemetry};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::from_env("order-service")?;
/// let guard = init_telemetry(&config.telemetry)?;
/// let tracer = guard.tracer("order-service");
/// // ... serve requests ...
/// shutdown_telemetry(guard).await?;
/// # Ok(())
/// # }
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    config.validate()?;

    let exporter = OtlpExporter::new(
        &config.otlp.endpoint,
        Duration::from_secs(config.otlp.timeout_seconds),
        RetryPolicy {
            max_retries: config.otlp.max_retries,
            ..RetryPolicy::default()
        },
    )?;

    init_telemetry_with_exporter(config, exporter)
}

/// Initialize the span pipeline with a caller-supplied exporter
pub fn init_telemetry_with_exporter<E: SpanExporter>(
    config: &TelemetryConfig,
    exporter: E,
) -> Result<TelemetryGuard, TelemetryError> {
    config.validate()?;

    let batch = BatchConfig::from(&config.batch);
    info!(
        service_name = %config.service_name,
        endpoint = %config.otlp.endpoint,
        max_queue_size = batch.max_queue_size,
        max_export_batch_size = batch.max_export_batch_size,
        scheduled_delay = ?batch.scheduled_delay,
        "Initializing span pipeline"
    );

    let provider = TracerProvider::builder()
        .with_resource(Resource::for_service(config.service_name.clone()))
        .with_batch_exporter(exporter, batch)
        .build();

    Ok(TelemetryGuard::new(
        provider,
        Duration::from_millis(config.shutdown_timeout_millis),
    ))
}

/// Flush pending spans and shut the pipeline down
///
/// Waits at most the configured shutdown timeout; spans not exported by
/// then are discarded.
pub async fn shutdown_telemetry(mut guard: TelemetryGuard) -> Result<(), TelemetryError> {
    guard.active = false;
    let timeout = guard.shutdown_timeout;

    info!(?timeout, "Flushing spans before exit");
    guard.provider.shutdown(timeout).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::Context;
    use crate::telemetry::export::InMemorySpanExporter;

    fn test_config() -> TelemetryConfig {
        let mut config = TelemetryConfig {
            service_name: "order-service".to_string(),
            ..TelemetryConfig::default()
        };
        config.batch.scheduled_delay_millis = 60_000;
        config
    }

    #[tokio::test]
    async fn test_shutdown_flushes_buffered_spans() {
        let exporter = InMemorySpanExporter::default();
        let guard = init_telemetry_with_exporter(&test_config(), exporter.clone()).unwrap();

        let tracer = guard.tracer("order-service");
        for _ in 0..3 {
            tracer.start_span("process_order", &Context::new()).end();
        }
        assert!(exporter.finished_spans().is_empty());

        shutdown_telemetry(guard).await.unwrap();

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].resource.service_name(), Some("order-service"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.otlp.endpoint = "jaeger:4317".to_string();

        assert!(matches!(
            init_telemetry(&config),
            Err(TelemetryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_init_does_not_require_reachable_collector() {
        let mut config = test_config();
        config.otlp.endpoint = "http://127.0.0.1:1".to_string();

        let guard = init_telemetry(&config).unwrap();
        assert!(guard.is_active());
    }

    #[tokio::test]
    async fn test_dropped_guard_shuts_down_in_background() {
        let exporter = InMemorySpanExporter::default();
        let guard = init_telemetry_with_exporter(&test_config(), exporter.clone()).unwrap();
        guard.tracer("t").start_span("late", &Context::new()).end();
        let provider = guard.provider().clone();

        drop(guard);
        for _ in 0..50 {
            if provider.is_shutdown() && !exporter.finished_spans().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(provider.is_shutdown());
        assert_eq!(exporter.finished_spans().len(), 1);
    }
}
