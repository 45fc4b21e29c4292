//! Tracer provider
//!
//! The [`TracerProvider`] owns the service [`Resource`] and the registered span
//! processors. It is created once per process, handed to whoever needs a
//! [`Tracer`], and shut down exactly once when the process exits.

use crate::telemetry::context::RandomIdGenerator;
use crate::telemetry::export::{SpanExporter, TraceError};
use crate::telemetry::processor::{
    BatchConfig, BatchSpanProcessor, SimpleSpanProcessor, SpanProcessor,
};
use crate::telemetry::resource::Resource;
use crate::telemetry::tracer::Tracer;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) type ProcessorList = Arc<Vec<Arc<dyn SpanProcessor>>>;

#[derive(Debug)]
struct ProviderInner {
    resource: Arc<Resource>,
    processors: RwLock<ProcessorList>,
    id_generator: RandomIdGenerator,
    is_shutdown: AtomicBool,
}

/// Process-wide owner of the span pipeline
///
/// Cloning is cheap; all clones share the same processors.
#[derive(Debug, Clone)]
pub struct TracerProvider {
    inner: Arc<ProviderInner>,
}

impl TracerProvider {
    /// Create a provider with no processors
    pub fn new(resource: Resource) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                resource: Arc::new(resource),
                processors: RwLock::new(Arc::new(Vec::new())),
                id_generator: RandomIdGenerator,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Register a processor for spans started from now on
    ///
    /// Spans already open keep the processor list they started with.
    pub fn add_processor<P: SpanProcessor + 'static>(&self, processor: P) {
        let mut processors = self.inner.processors.write();
        let mut updated = Vec::with_capacity(processors.len() + 1);
        updated.extend(processors.iter().cloned());
        updated.push(Arc::new(processor) as Arc<dyn SpanProcessor>);
        *processors = Arc::new(updated);
    }

    /// Obtain a tracer tagged with an instrumentation scope name
    pub fn tracer(&self, name: impl Into<Arc<str>>) -> Tracer {
        Tracer::new(name.into(), self.clone())
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.inner.resource
    }

    /// Whether [`TracerProvider::shutdown`] has been called
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }

    pub(crate) fn processors(&self) -> ProcessorList {
        self.inner.processors.read().clone()
    }

    pub(crate) fn id_generator(&self) -> &RandomIdGenerator {
        &self.inner.id_generator
    }

    /// Flush every processor
    ///
    /// Returns one result per registered processor, in registration order.
    pub async fn force_flush(&self) -> Vec<Result<(), TraceError>> {
        let processors = self.processors();
        let mut results = Vec::with_capacity(processors.len());
        for processor in processors.iter() {
            results.push(processor.force_flush().await);
        }
        results
    }

    /// Shut every processor down within `timeout`
    ///
    /// The deadline covers all processors together. A second call returns
    /// [`TraceError::AlreadyShutdown`].
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TraceError> {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TraceError::AlreadyShutdown);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let processors = self.processors();
        let mut first_error = None;

        for processor in processors.iter() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if let Err(err) = processor.shutdown(remaining).await {
                warn!(error = %err, "Span processor shutdown failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            None => {
                info!(processors = processors.len(), "Tracer provider shut down");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }
}

/// Builder for [`TracerProvider`]
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    resource: Option<Resource>,
    processors: Vec<Arc<dyn SpanProcessor>>,
}

impl TracerProviderBuilder {
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_span_processor<P: SpanProcessor + 'static>(mut self, processor: P) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Export each span synchronously as it ends
    pub fn with_simple_exporter<E: SpanExporter>(self, exporter: E) -> Self {
        self.with_span_processor(SimpleSpanProcessor::new(exporter))
    }

    /// Export through a [`BatchSpanProcessor`]; requires a tokio runtime
    pub fn with_batch_exporter<E: SpanExporter>(self, exporter: E, config: BatchConfig) -> Self {
        self.with_span_processor(BatchSpanProcessor::new(exporter, config))
    }

    pub fn build(self) -> TracerProvider {
        let provider = TracerProvider::new(self.resource.unwrap_or_default());
        debug!(
            processors = self.processors.len(),
            service = provider.resource().service_name().unwrap_or_default(),
            "Built tracer provider"
        );
        *provider.inner.processors.write() = Arc::new(self.processors);
        provider
    }
}
