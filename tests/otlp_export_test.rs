//! OTLP Export Integration Tests
//!
//! Runs a mock gRPC `TraceService` collector and exports real batches to it.
//!
//! Test Coverage:
//! - Batches arrive grouped by resource and scope with ids, parents and status
//! - Retryable gRPC failures are retried, permanent ones are not
//! - Shutdown flushes the batch processor into the collector

use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::{TraceService, TraceServiceServer},
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::common::v1::any_value;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind as ProtoSpanKind, status::StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use traced_services::telemetry::{
    BatchConfig, Context, InMemorySpanExporter, KeyValue, OtlpExporter, Resource, RetryPolicy,
    SpanExporter, SpanKind, Status, TraceError, TracerProvider,
};

struct MockCollector {
    tx: Mutex<mpsc::Sender<ExportTraceServiceRequest>>,
    /// Respond with `failure` to this many requests before accepting
    failures_left: AtomicUsize,
    failure: tonic::Code,
    calls: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl TraceService for MockCollector {
    async fn export(
        &self,
        request: tonic::Request<ExportTraceServiceRequest>,
    ) -> Result<tonic::Response<ExportTraceServiceResponse>, tonic::Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(tonic::Status::new(self.failure, "collector says no"));
        }

        self.tx
            .lock()
            .unwrap()
            .try_send(request.into_inner())
            .expect("Channel full");
        Ok(tonic::Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

struct Collector {
    addr: SocketAddr,
    requests: mpsc::Receiver<ExportTraceServiceRequest>,
    calls: Arc<AtomicUsize>,
}

async fn start_collector(failures: usize, failure: tonic::Code) -> Collector {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();
    let stream = TcpListenerStream::new(listener);

    let (tx, requests) = mpsc::channel(16);
    let calls = Arc::new(AtomicUsize::new(0));
    let service = TraceServiceServer::new(MockCollector {
        tx: Mutex::new(tx),
        failures_left: AtomicUsize::new(failures),
        failure,
        calls: Arc::clone(&calls),
    });

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(stream)
            .await
            .expect("Server failed")
    });

    Collector {
        addr,
        requests,
        calls,
    }
}

fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        jitter_ms: 5,
    }
}

fn exporter(addr: SocketAddr, retry: RetryPolicy) -> OtlpExporter {
    OtlpExporter::new(&format!("http://{}", addr), Duration::from_secs(5), retry)
        .expect("valid endpoint")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_reaches_collector() {
    let mut collector = start_collector(0, tonic::Code::Ok).await;

    let provider = TracerProvider::builder()
        .with_resource(Resource::for_service("order-service"))
        .with_batch_exporter(
            exporter(collector.addr, fast_retry(0)),
            BatchConfig {
                scheduled_delay: Duration::from_secs(60),
                ..BatchConfig::default()
            },
        )
        .build();
    let tracer = provider.tracer("order-service");

    let server = tracer.start_span_with_kind("POST /orders", SpanKind::Server, &Context::new());
    let mut child = tracer.start_span("process_order", &server.context());
    child.set_attribute(KeyValue::new("user.id", "u1"));
    child.add_event("order_processed", vec![]);
    child.set_status(Status::Ok);
    let (trace_id, server_span_id) = (
        server.span_context().trace_id(),
        server.span_context().span_id(),
    );
    child.end();
    server.end();

    provider.shutdown(Duration::from_secs(5)).await.unwrap();

    let request = tokio::time::timeout(Duration::from_secs(5), collector.requests.recv())
        .await
        .expect("no export request")
        .expect("collector closed");

    assert_eq!(request.resource_spans.len(), 1);
    let resource_spans = &request.resource_spans[0];
    let service_name = resource_spans
        .resource
        .as_ref()
        .unwrap()
        .attributes
        .iter()
        .find(|kv| kv.key == "service.name")
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| v.value.clone());
    assert_eq!(
        service_name,
        Some(any_value::Value::StringValue("order-service".into()))
    );

    let scope_spans = &resource_spans.scope_spans[0];
    assert_eq!(scope_spans.scope.as_ref().unwrap().name, "order-service");
    let spans = &scope_spans.spans;
    assert_eq!(spans.len(), 2);

    let (child, server) = (&spans[0], &spans[1]);
    assert_eq!(child.name, "process_order");
    assert_eq!(child.trace_id, trace_id.to_bytes().to_vec());
    assert_eq!(child.parent_span_id, server_span_id.to_bytes().to_vec());
    assert_eq!(child.events[0].name, "order_processed");
    assert_eq!(
        child.status.as_ref().unwrap().code,
        StatusCode::Ok as i32
    );
    assert!(child.end_time_unix_nano >= child.start_time_unix_nano);

    assert_eq!(server.kind, ProtoSpanKind::Server as i32);
    assert!(server.parent_span_id.is_empty());
}

/// One finished span, as a processor would hand it to the exporter
fn finished_batch(name: &'static str) -> Vec<traced_services::telemetry::SpanData> {
    let spans = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(spans.clone())
        .build();
    let mut span = provider.tracer("retry").start_span(name, &Context::new());
    span.set_attribute(KeyValue::new("notification.type", "email"));
    span.end();
    spans.finished_spans()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unavailable_collector_is_retried() {
    let mut collector = start_collector(2, tonic::Code::Unavailable).await;
    let exporter = exporter(collector.addr, fast_retry(3));

    exporter
        .export(finished_batch("send_notification"))
        .await
        .unwrap();

    assert_eq!(collector.calls.load(Ordering::SeqCst), 3);
    let request = collector.requests.recv().await.unwrap();
    assert_eq!(request.resource_spans[0].scope_spans[0].spans.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retries_are_bounded() {
    let collector = start_collector(10, tonic::Code::Unavailable).await;
    let exporter = exporter(collector.addr, fast_retry(2));

    let result = exporter.export(finished_batch("send_notification")).await;
    assert!(matches!(result, Err(TraceError::ExportFailed(_))));
    assert_eq!(collector.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_permanent_failure_is_not_retried() {
    let collector = start_collector(1, tonic::Code::InvalidArgument).await;
    let exporter = exporter(collector.addr, fast_retry(3));

    let result = exporter.export(finished_batch("process_order")).await;
    assert!(matches!(result, Err(TraceError::ExportFailed(_))));
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exporter_rejects_after_shutdown() {
    let collector = start_collector(0, tonic::Code::Ok).await;
    let exporter = exporter(collector.addr, fast_retry(0));

    exporter.shutdown().await.unwrap();
    assert_eq!(
        exporter.export(Vec::new()).await,
        Err(TraceError::AlreadyShutdown)
    );
    assert_eq!(collector.calls.load(Ordering::SeqCst), 0);
}
