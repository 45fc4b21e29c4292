//! Request tracing and span export
//!
//! An in-process span pipeline exporting to any OTLP/gRPC collector
//! (Jaeger, Tempo, the OpenTelemetry Collector).
//!
//! ```text
//! Tracer ──start──▶ Span ──end──▶ SpanProcessor ──batch──▶ SpanExporter ──gRPC──▶ collector
//!   ▲                                 (bounded queue,        (OtlpExporter,
//!   │                                  worker task)           retry + backoff)
//! TracerProvider (Resource, processors)
//! ```
//!
//! Context is explicit: every function that may open a nested span takes a
//! [`Context`], and [`Span::context`] produces the context for its children.
//!
//! # Example
//!
//! ```
//! use traced_services::telemetry::{
//!     Context, InMemorySpanExporter, KeyValue, Resource, Status, TracerProvider,
//! };
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = TracerProvider::builder()
//!     .with_resource(Resource::for_service("order-service"))
//!     .with_simple_exporter(exporter.clone())
//!     .build();
//!
//! let tracer = provider.tracer("order-service");
//! let mut span = tracer.start_span("process_order", &Context::new());
//! span.set_attribute(KeyValue::new("user.id", "u1"));
//! span.add_event("order_processed", vec![]);
//! span.set_status(Status::Ok);
//! span.end();
//!
//! assert_eq!(exporter.finished_spans().len(), 1);
//! ```

pub mod attribute;
pub mod context;
pub mod export;
pub mod init;
pub mod instrumentation;
pub mod otlp;
pub mod processor;
pub mod propagation;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod span;
pub mod subscriber;
pub mod tracer;

pub use attribute::{KeyValue, Value};
pub use context::{Context, SpanContext};
pub use export::{InMemorySpanExporter, SpanExporter, TraceError};
pub use init::{
    init_telemetry, init_telemetry_with_exporter, shutdown_telemetry, TelemetryError,
    TelemetryGuard,
};
pub use instrumentation::{instrument_request, RequestInfo, ResponseError};
pub use otlp::OtlpExporter;
pub use processor::{BatchConfig, BatchSpanProcessor, SimpleSpanProcessor, SpanProcessor};
pub use provider::{TracerProvider, TracerProviderBuilder};
pub use resource::Resource;
pub use retry::RetryPolicy;
pub use span::{Event, Span, SpanData, SpanKind, Status};
pub use subscriber::{init_subscriber, LogFormat};
pub use tracer::Tracer;
