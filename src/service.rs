//! Service entry point shared by the binaries
//!
//! Startup order: log subscriber, configuration, span pipeline, optional
//! metrics server, HTTP server. On SIGINT/SIGTERM the server stops
//! accepting, drains open connections and the span pipeline gets a final
//! flush.

use crate::config::Config;
use crate::handlers::Handler;
use crate::metrics::server::MetricsServer;
use crate::router::Router;
use crate::server::{App, HttpServer};
use crate::telemetry::{init_subscriber, init_telemetry, shutdown_telemetry, LogFormat};
use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

/// Command line arguments common to both services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ServiceArgs {
    /// Path to a YAML configuration file; the environment is used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,
}

/// Run a service until it receives a shutdown signal
///
/// # Arguments
///
/// * `args` - Parsed command line
/// * `default_service_name` - `service.name` when `SERVICE_NAME` is unset
/// * `routes` - The service's route table
pub async fn run(
    args: ServiceArgs,
    default_service_name: &str,
    routes: Router<Handler>,
) -> anyhow::Result<()> {
    init_subscriber(&args.log_level, args.log_format).map_err(anyhow::Error::msg)?;

    let config = match &args.config {
        Some(path) => Config::load(path, default_service_name)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::from_env(default_service_name)
            .context("invalid configuration in environment")?,
    };

    info!(
        service = %config.telemetry.service_name,
        version = crate::VERSION,
        "Starting service"
    );

    let guard = init_telemetry(&config.telemetry)?;
    let tracer = guard.tracer(config.telemetry.service_name.clone());

    let mut metrics_server = match &config.metrics.address {
        Some(address) => {
            let mut server = MetricsServer::new(address.clone());
            server.start().await?;
            Some(server)
        }
        None => None,
    };

    let server = HttpServer::bind(&config.server.address, App::new(routes, tracer)).await?;
    server.run_until(shutdown_signal()).await;

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }

    shutdown_telemetry(guard).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Completes on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
