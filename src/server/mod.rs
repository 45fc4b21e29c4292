//! HTTP server module
//!
//! Accepts connections, dispatches requests through the router and wraps
//! every request in a server span.

pub mod http;

pub use http::{App, HttpServer};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),
}
