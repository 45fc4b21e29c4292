//! Span processors
//!
//! Processors sit between span completion and export. [`Span`] hands every
//! ended span to each registered processor through [`SpanProcessor::on_end`],
//! which runs on the request path and therefore must never block.
//!
//! [`BatchSpanProcessor`] is the production processor:
//!
//! ```text
//! request tasks ──try_send──▶ bounded queue ──▶ worker task ──▶ exporter
//!   (on_end)                 (max_queue_size)    batches of      (network)
//!                                                max_export_batch_size
//! ```
//!
//! The worker exports when `max_export_batch_size` spans are pending or when
//! `scheduled_delay` elapses, whichever comes first. A full queue drops the
//! new span and counts it.
//!
//! [`Span`]: crate::telemetry::Span

use crate::metrics;
use crate::telemetry::export::{SpanExporter, TraceError};
use crate::telemetry::span::SpanData;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Receives ended spans
#[async_trait]
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Called synchronously when a span ends. Must not block.
    fn on_end(&self, span: SpanData);

    /// Export everything received so far
    async fn force_flush(&self) -> Result<(), TraceError>;

    /// Flush and release resources within `timeout`
    async fn shutdown(&self, timeout: Duration) -> Result<(), TraceError>;
}

/// Tuning for [`BatchSpanProcessor`]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Capacity of the span queue
    pub max_queue_size: usize,
    /// Interval between scheduled exports
    pub scheduled_delay: Duration,
    /// Maximum spans per export request
    pub max_export_batch_size: usize,
    /// Deadline for a single export call, retries included
    pub export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            scheduled_delay: Duration::from_millis(5000),
            max_export_batch_size: 512,
            export_timeout: Duration::from_millis(30000),
        }
    }
}

impl From<&crate::config::BatchConfig> for BatchConfig {
    fn from(config: &crate::config::BatchConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            scheduled_delay: Duration::from_millis(config.scheduled_delay_millis),
            max_export_batch_size: config.max_export_batch_size,
            export_timeout: Duration::from_millis(config.export_timeout_millis),
        }
    }
}

/// Processor that exports each span as soon as it ends
///
/// The export runs inline on the caller's thread, so this is only suitable
/// for in-memory exporters in tests and local debugging.
#[derive(Debug)]
pub struct SimpleSpanProcessor {
    exporter: Box<dyn SpanExporter>,
    is_shutdown: AtomicBool,
}

impl SimpleSpanProcessor {
    pub fn new<E: SpanExporter>(exporter: E) -> Self {
        Self {
            exporter: Box::new(exporter),
            is_shutdown: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SpanProcessor for SimpleSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        if let Err(err) = futures::executor::block_on(self.exporter.export(vec![span])) {
            warn!(error = %err, "Simple span processor export failed");
        }
    }

    async fn force_flush(&self) -> Result<(), TraceError> {
        Ok(())
    }

    async fn shutdown(&self, _timeout: Duration) -> Result<(), TraceError> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TraceError::AlreadyShutdown);
        }
        self.exporter.shutdown().await
    }
}

/// Control messages for the batch worker
enum ControlMessage {
    Flush(oneshot::Sender<Result<(), TraceError>>),
    Shutdown(oneshot::Sender<Result<(), TraceError>>),
}

/// Processor that buffers spans and exports them in batches on a background task
pub struct BatchSpanProcessor {
    span_tx: mpsc::Sender<SpanData>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    dropped_spans: AtomicUsize,
    max_queue_size: usize,
    is_shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchSpanProcessor {
    /// Create the processor and spawn its worker
    ///
    /// Must be called from within a tokio runtime. Zero sizes are raised to
    /// one and the batch size is capped at the queue size.
    pub fn new<E: SpanExporter>(exporter: E, config: BatchConfig) -> Self {
        let max_queue_size = config.max_queue_size.max(1);
        let config = BatchConfig {
            max_queue_size,
            max_export_batch_size: config.max_export_batch_size.clamp(1, max_queue_size),
            ..config
        };

        let (span_tx, span_rx) = mpsc::channel(max_queue_size);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let worker = BatchWorker {
            exporter,
            pending: Vec::with_capacity(config.max_export_batch_size),
            config,
        };
        let handle = tokio::spawn(worker.run(span_rx, control_rx));

        Self {
            span_tx,
            control_tx,
            dropped_spans: AtomicUsize::new(0),
            max_queue_size,
            is_shutdown: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Number of spans dropped because the queue was full or closed
    pub fn dropped_spans(&self) -> usize {
        self.dropped_spans.load(Ordering::Relaxed)
    }

    /// Number of spans waiting in the queue
    pub fn queued_spans(&self) -> usize {
        self.span_tx.max_capacity() - self.span_tx.capacity()
    }

    /// Configured queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.max_queue_size
    }
}

impl fmt::Debug for BatchSpanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("max_queue_size", &self.max_queue_size)
            .field("dropped_spans", &self.dropped_spans())
            .finish()
    }
}

#[async_trait]
impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: SpanData) {
        let Err(err) = self.span_tx.try_send(span) else {
            return;
        };

        metrics::record_span_dropped();
        if self.dropped_spans.fetch_add(1, Ordering::Relaxed) == 0 {
            let reason = match err {
                TrySendError::Full(_) => "queue full",
                TrySendError::Closed(_) => "processor shut down",
            };
            warn!(
                max_queue_size = self.max_queue_size,
                reason,
                "Dropping spans; further drops are only counted until shutdown"
            );
        }
    }

    async fn force_flush(&self) -> Result<(), TraceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(ControlMessage::Flush(reply_tx))
            .map_err(|_| TraceError::AlreadyShutdown)?;

        reply_rx
            .await
            .map_err(|e| TraceError::WorkerUnavailable(e.to_string()))?
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), TraceError> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TraceError::AlreadyShutdown);
        }

        let dropped = self.dropped_spans();
        if dropped > 0 {
            warn!(
                dropped_spans = dropped,
                max_queue_size = self.max_queue_size,
                "Spans were dropped during the processor lifetime"
            );
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(ControlMessage::Shutdown(reply_tx))
            .map_err(|_| TraceError::AlreadyShutdown)?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(reply) => {
                self.worker.lock().take();
                reply.map_err(|e| TraceError::WorkerUnavailable(e.to_string()))?
            }
            Err(_) => {
                if let Some(handle) = self.worker.lock().take() {
                    handle.abort();
                }
                warn!(?timeout, "Final flush missed its deadline; unexported spans discarded");
                Err(TraceError::Timeout(timeout))
            }
        }
    }
}

/// State owned by the background worker task
struct BatchWorker<E> {
    exporter: E,
    config: BatchConfig,
    pending: Vec<SpanData>,
}

impl<E: SpanExporter> BatchWorker<E> {
    async fn run(
        mut self,
        mut span_rx: mpsc::Receiver<SpanData>,
        mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    ) {
        let delay = self.config.scheduled_delay;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + delay, delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                Some(message) = control_rx.recv() => match message {
                    ControlMessage::Flush(reply) => {
                        let result = self.drain_and_export(&mut span_rx).await;
                        let _ = reply.send(result);
                    }
                    ControlMessage::Shutdown(reply) => {
                        span_rx.close();
                        let flushed = self.drain_and_export(&mut span_rx).await;
                        let closed = self.exporter.shutdown().await;
                        let _ = reply.send(flushed.and(closed));
                        debug!("Batch span processor worker stopped");
                        return;
                    }
                },

                received = span_rx.recv() => match received {
                    Some(span) => {
                        self.pending.push(span);
                        if self.pending.len() >= self.config.max_export_batch_size {
                            let _ = self.export_pending().await;
                        }
                    }
                    None => {
                        // Processor dropped without shutdown.
                        let _ = self.export_pending().await;
                        return;
                    }
                },

                _ = ticker.tick() => {
                    let _ = self.export_pending().await;
                }
            }
        }
    }

    /// Move everything queued into pending batches and export them all
    async fn drain_and_export(
        &mut self,
        span_rx: &mut mpsc::Receiver<SpanData>,
    ) -> Result<(), TraceError> {
        let mut result = Ok(());
        while let Ok(span) = span_rx.try_recv() {
            self.pending.push(span);
            if self.pending.len() >= self.config.max_export_batch_size {
                result = result.and(self.export_pending().await);
            }
        }
        result.and(self.export_pending().await)
    }

    /// Export pending spans in chunks of at most `max_export_batch_size`
    async fn export_pending(&mut self) -> Result<(), TraceError> {
        let mut result = Ok(());
        while !self.pending.is_empty() {
            let count = self.pending.len().min(self.config.max_export_batch_size);
            let batch: Vec<SpanData> = self.pending.drain(..count).collect();
            result = result.and(self.export(batch).await);
        }
        result
    }

    async fn export(&self, batch: Vec<SpanData>) -> Result<(), TraceError> {
        let size = batch.len();
        let timeout = self.config.export_timeout;

        let result = match tokio::time::timeout(timeout, self.exporter.export(batch)).await {
            Ok(result) => result,
            Err(_) => Err(TraceError::Timeout(timeout)),
        };

        match &result {
            Ok(()) => {
                debug!(batch_size = size, "Exported span batch");
                metrics::record_spans_exported(size);
            }
            Err(err) => {
                error!(batch_size = size, error = %err, "Discarding span batch after export failure");
                metrics::record_export_failure(size);
            }
        }
        result
    }
}
