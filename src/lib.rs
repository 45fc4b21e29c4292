//! Traced Services Library
//!
//! Two small HTTP services, `order-service` and `notification-service`,
//! instrumented with an in-process span pipeline that exports to an
//! OTLP/gRPC collector such as Jaeger.
//!
//! # Modules
//!
//! - [`telemetry`]: tracer, spans, batch processor, OTLP exporter, HTTP instrumentation
//! - [`handlers`]: the `/orders`, `/notify` and `/health` endpoints
//! - [`server`]: hyper accept loop with graceful shutdown
//! - [`config`]: environment and YAML configuration
//! - [`metrics`]: Prometheus counters for the pipeline and requests
//!
//! # Example
//!
//! ```no_run
//! use traced_services::config::Config;
//! use traced_services::handlers::order_routes;
//! use traced_services::server::{App, HttpServer};
//! use traced_services::telemetry::{init_telemetry, shutdown_telemetry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env("order-service")?;
//!     let guard = init_telemetry(&config.telemetry)?;
//!     let app = App::new(order_routes(), guard.tracer("order-service"));
//!
//!     let server = HttpServer::bind(&config.server.address, app).await?;
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!
//!     shutdown_telemetry(guard).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod router;
pub mod server;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use server::{App, HttpServer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
