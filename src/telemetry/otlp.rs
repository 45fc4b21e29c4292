//! OTLP/gRPC span exporter
//!
//! Converts batches of [`SpanData`] into `ExportTraceServiceRequest` messages
//! and sends them to a collector over a persistent tonic channel. The channel
//! connects lazily, so a collector that is down at startup does not prevent
//! the service from starting.

use crate::telemetry::attribute::{KeyValue, Value};
use crate::telemetry::export::{SpanExporter, TraceError};
use crate::telemetry::init::TelemetryError;
use crate::telemetry::resource::Resource;
use crate::telemetry::retry::{retry_with_exponential_backoff, RetryPolicy};
use crate::telemetry::span::{SpanData, SpanKind, Status};
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_client::TraceServiceClient, ExportTraceServiceRequest,
};
use opentelemetry_proto::tonic::common::v1 as common;
use opentelemetry_proto::tonic::resource::v1 as resource;
use opentelemetry_proto::tonic::trace::v1 as proto;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::{debug, warn};

/// Exporter sending spans to an OTLP/gRPC collector
pub struct OtlpExporter {
    endpoint: String,
    client: TraceServiceClient<Channel>,
    retry: RetryPolicy,
    is_shutdown: AtomicBool,
}

impl OtlpExporter {
    /// Create an exporter for `endpoint`
    ///
    /// No connection is attempted here. Must be called from within a tokio
    /// runtime.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Collector URL, e.g. `http://jaeger:4317`
    /// * `timeout` - Deadline for each export RPC
    /// * `retry` - Backoff policy for retryable gRPC failures
    ///
    /// # Returns
    ///
    /// * `Err(TelemetryError::InvalidEndpoint)` - If the URL cannot be parsed
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, TelemetryError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(TelemetryError::InvalidEndpoint(format!(
                "Endpoint must start with http:// or https://, got: {}",
                endpoint
            )));
        }

        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| TelemetryError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?
            .timeout(timeout)
            .connect_timeout(timeout)
            .connect_lazy();

        debug!(endpoint, ?timeout, max_retries = retry.max_retries, "Created OTLP exporter");

        Ok(Self {
            endpoint: endpoint.to_string(),
            client: TraceServiceClient::new(channel),
            retry,
            is_shutdown: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for OtlpExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpExporter")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish()
    }
}

#[async_trait]
impl SpanExporter for OtlpExporter {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), TraceError> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        if batch.is_empty() {
            return Ok(());
        }

        let span_count = batch.len();
        let request = ExportTraceServiceRequest {
            resource_spans: group_spans_by_resource_and_scope(batch),
        };

        let response = retry_with_exponential_backoff(
            self.retry,
            "otlp.trace.export",
            |status: &tonic::Status| is_retryable(status.code()),
            || {
                let mut client = self.client.clone();
                let request = request.clone();
                async move { client.export(request).await }
            },
        )
        .await
        .map_err(|status| {
            TraceError::ExportFailed(format!("{:?}: {}", status.code(), status.message()))
        })?;

        if let Some(partial) = response.into_inner().partial_success {
            if partial.rejected_spans > 0 {
                warn!(
                    rejected_spans = partial.rejected_spans,
                    message = %partial.error_message,
                    "Collector rejected part of the batch"
                );
            }
        }

        debug!(span_count, endpoint = %self.endpoint, "OTLP export succeeded");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TraceError> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TraceError::AlreadyShutdown);
        }
        Ok(())
    }
}

/// gRPC codes worth another attempt
pub fn is_retryable(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable
            | Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Aborted
            | Code::Cancelled
            | Code::OutOfRange
            | Code::DataLoss
    )
}

/// Group spans into one `ResourceSpans` per resource and one `ScopeSpans`
/// per instrumentation scope, keeping completion order inside each group
pub fn group_spans_by_resource_and_scope(batch: Vec<SpanData>) -> Vec<proto::ResourceSpans> {
    struct ResourceGroup {
        resource: Arc<Resource>,
        scopes: Vec<(Arc<str>, Vec<proto::Span>)>,
    }

    let mut groups: Vec<ResourceGroup> = Vec::new();

    for span in batch {
        let resource = span.resource.clone();
        let scope = span.instrumentation_scope.clone();

        let group = match groups
            .iter()
            .position(|g| Arc::ptr_eq(&g.resource, &resource) || *g.resource == *resource)
        {
            Some(index) => &mut groups[index],
            None => {
                groups.push(ResourceGroup {
                    resource,
                    scopes: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };

        let converted = to_proto_span(span);
        match group.scopes.iter_mut().find(|(name, _)| *name == scope) {
            Some((_, spans)) => spans.push(converted),
            None => group.scopes.push((scope, vec![converted])),
        }
    }

    groups
        .into_iter()
        .map(|group| proto::ResourceSpans {
            resource: Some(resource::Resource {
                attributes: group.resource.iter().map(to_proto_key_value).collect(),
                ..Default::default()
            }),
            scope_spans: group
                .scopes
                .into_iter()
                .map(|(name, spans)| proto::ScopeSpans {
                    scope: Some(common::InstrumentationScope {
                        name: name.to_string(),
                        version: crate::VERSION.to_string(),
                        ..Default::default()
                    }),
                    spans,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
        .collect()
}

fn to_proto_span(span: SpanData) -> proto::Span {
    let (status_code, status_message) = match span.status {
        Status::Unset => (proto::status::StatusCode::Unset, String::new()),
        Status::Ok => (proto::status::StatusCode::Ok, String::new()),
        Status::Error { description } => {
            (proto::status::StatusCode::Error, description.into_owned())
        }
    };

    let kind = match span.kind {
        SpanKind::Internal => proto::span::SpanKind::Internal,
        SpanKind::Server => proto::span::SpanKind::Server,
        SpanKind::Client => proto::span::SpanKind::Client,
    };

    proto::Span {
        trace_id: span.span_context.trace_id().to_bytes().to_vec(),
        span_id: span.span_context.span_id().to_bytes().to_vec(),
        trace_state: span.span_context.trace_state().header(),
        parent_span_id: span
            .parent_span_id
            .map(|id| id.to_bytes().to_vec())
            .unwrap_or_default(),
        name: span.name.into_owned(),
        kind: kind as i32,
        start_time_unix_nano: to_nanos(span.start_time),
        end_time_unix_nano: to_nanos(span.end_time),
        attributes: span.attributes.iter().map(to_proto_key_value).collect(),
        events: span
            .events
            .into_iter()
            .map(|event| proto::span::Event {
                time_unix_nano: to_nanos(event.timestamp),
                name: event.name.into_owned(),
                attributes: event.attributes.iter().map(to_proto_key_value).collect(),
                ..Default::default()
            })
            .collect(),
        status: Some(proto::Status {
            code: status_code as i32,
            message: status_message,
        }),
        ..Default::default()
    }
}

fn to_proto_key_value(kv: &KeyValue) -> common::KeyValue {
    let value = match &kv.value {
        Value::String(s) => common::any_value::Value::StringValue(s.to_string()),
        Value::Bool(b) => common::any_value::Value::BoolValue(*b),
        Value::I64(i) => common::any_value::Value::IntValue(*i),
        Value::F64(f) => common::any_value::Value::DoubleValue(*f),
    };
    common::KeyValue {
        key: kv.key.to_string(),
        value: Some(common::AnyValue { value: Some(value) }),
    }
}

fn to_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
