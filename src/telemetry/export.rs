//! Span exporters
//!
//! An exporter receives batches of ended spans from a processor and ships them
//! somewhere. Exporters run off the request path, on the processor's worker
//! task, so they are free to perform network I/O.

use crate::telemetry::span::SpanData;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the span pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Span pipeline already shut down")]
    AlreadyShutdown,

    #[error("Span processor worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// Destination for batches of ended spans
#[async_trait]
pub trait SpanExporter: Send + Sync + fmt::Debug + 'static {
    /// Export one batch
    ///
    /// Batches are submitted sequentially; an exporter never sees two
    /// concurrent `export` calls from the same processor.
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), TraceError>;

    /// Release exporter resources
    async fn shutdown(&self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Exporter that keeps spans in memory
///
/// Clones share storage, so a test can keep one handle and hand another to
/// the pipeline.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl InMemorySpanExporter {
    /// All spans exported so far, in export order
    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.lock().clone()
    }

    /// Sizes of the batches received, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }

    /// Forget everything exported so far
    pub fn reset(&self) {
        self.spans.lock().clear();
        self.batches.lock().clear();
    }
}

#[async_trait]
impl SpanExporter for InMemorySpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), TraceError> {
        self.batches.lock().push(batch.len());
        self.spans.lock().extend(batch);
        Ok(())
    }
}
