//! Diagnostic log subscriber
//!
//! Process logs (startup, exporter failures, dropped spans) go through the
//! `tracing` facade to a `tracing-subscriber` registry:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, falling back to --log-level)
//!   └── Fmt Layer (text or JSON on stdout)
//! ```
//!
//! This is independent of the span pipeline, which exports request spans
//! over OTLP.

use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Output format for process logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}': expected 'text' or 'json'", other)),
        }
    }
}

/// Install the global log subscriber
///
/// `RUST_LOG` takes precedence over `default_level` when set.
///
/// # Returns
///
/// * `Err(String)` - If a global subscriber is already installed
pub fn init_subscriber(default_level: &str, format: LogFormat) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = match format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(env_filter).with(fmt_layer),
            )
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(env_filter).with(fmt_layer),
            )
        }
    };

    result.map_err(|e| {
        format!(
            "Failed to set global subscriber (may already be initialized): {}",
            e
        )
    })
}
