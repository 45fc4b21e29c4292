//! HTTP Span Instrumentation
//!
//! Wraps request handling in a `Server` span following the OpenTelemetry HTTP
//! semantic conventions. Every inbound request gets exactly one such span; a
//! valid W3C `traceparent` makes it the child of the remote caller, otherwise
//! it starts a new trace. The handler runs with the span's context, so spans it
//! opens nest underneath.
//!
//! # Semantic Conventions
//!
//! | Attribute | Description | Example |
//! |-----------|-------------|---------|
//! | `http.request.method` | HTTP method | `POST` |
//! | `url.path` | Request path | `/orders` |
//! | `url.scheme` | URI scheme | `http` |
//! | `http.route` | Matched route template | `/orders` |
//! | `user_agent.original` | User-Agent header | `curl/8.5.0` |
//! | `http.response.status_code` | Response status | `200` |

use crate::metrics;
use crate::telemetry::attribute::KeyValue;
use crate::telemetry::context::Context;
use crate::telemetry::propagation::extract_trace_context;
use crate::telemetry::span::{Span, SpanKind, Status};
use crate::telemetry::tracer::Tracer;
use futures::FutureExt;
use hyper::header::{HeaderMap, USER_AGENT};
use hyper::{Method, Response, StatusCode, Uri};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::error;

pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const URL_PATH: &str = "url.path";
pub const URL_SCHEME: &str = "url.scheme";
pub const HTTP_ROUTE: &str = "http.route";
pub const USER_AGENT_ORIGINAL: &str = "user_agent.original";
pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";

/// Route label used in metrics for requests that matched no route
const UNMATCHED_ROUTE: &str = "unmatched";

/// An error a handler can fail with, carrying the status it maps to
pub trait ResponseError: fmt::Display {
    fn status_code(&self) -> StatusCode;

    /// The error returned in place of a handler that panicked
    fn from_panic(message: String) -> Self
    where
        Self: Sized;
}

/// The parts of an inbound request the wrapper reads
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    /// Matched route template, `None` when no route matched
    pub route: Option<&'static str>,
}

impl<'a> RequestInfo<'a> {
    /// Span name: `"{METHOD} {route}"`, or just the method when unmatched
    pub fn span_name(&self) -> String {
        match self.route {
            Some(route) => format!("{} {}", self.method, route),
            None => self.method.to_string(),
        }
    }

    fn attributes(&self) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new(HTTP_REQUEST_METHOD, self.method.to_string()),
            KeyValue::new(URL_PATH, self.uri.path().to_string()),
            KeyValue::new(
                URL_SCHEME,
                self.uri.scheme_str().unwrap_or("http").to_string(),
            ),
        ];
        if let Some(route) = self.route {
            attributes.push(KeyValue::new(HTTP_ROUTE, route));
        }
        if let Some(user_agent) = self.headers.get(USER_AGENT).and_then(|v| v.to_str().ok()) {
            attributes.push(KeyValue::new(USER_AGENT_ORIGINAL, user_agent.to_string()));
        }
        attributes
    }
}

/// Owns the request span until the outcome is known
///
/// If the request future is dropped before completion, the guard closes the
/// span as cancelled.
struct RequestSpan {
    span: Option<Span>,
    method: String,
    route: &'static str,
    started: Instant,
}

impl RequestSpan {
    fn record_error<E: ResponseError>(&mut self, error: &E) {
        if let Some(span) = self.span.as_mut() {
            span.record_error(error);
        }
    }

    fn record_panic(&mut self, message: &str) {
        if let Some(span) = self.span.as_mut() {
            span.record_panic(message);
        }
    }

    fn finish(&mut self, status: StatusCode) {
        let Some(mut span) = self.span.take() else {
            return;
        };

        span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, status.as_u16()));
        if !span.status().is_error() {
            if status.is_server_error() {
                span.set_status(Status::error(status.to_string()));
            } else {
                span.set_status(Status::Ok);
            }
        }
        span.end();

        metrics::record_http_request(
            &self.method,
            self.route,
            status.as_str(),
            self.started.elapsed(),
        );
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.set_status(Status::error("request cancelled"));
            span.end();
            metrics::record_http_request(&self.method, self.route, "cancelled", self.started.elapsed());
        }
    }
}

/// Run `handler` inside a `Server` span for the request described by `info`
///
/// The handler receives the context to parent its own spans on. Its error is
/// recorded on the span and the span is closed before the error is returned,
/// so the caller converts it into a response outside the span. A panic in
/// the handler is caught, recorded on the span as an `exception` event and
/// closes it with status code 500; it comes back as `E::from_panic`.
///
/// # Arguments
///
/// * `tracer` - Tracer used to open the request span
/// * `info` - Method, URI, headers and matched route of the request
/// * `handler` - Produces the response given the request span's context
///
/// # Returns
///
/// The handler's result, unchanged unless the handler panicked
pub async fn instrument_request<F, Fut, B, E>(
    tracer: &Tracer,
    info: RequestInfo<'_>,
    handler: F,
) -> Result<Response<B>, E>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<Response<B>, E>>,
    E: ResponseError,
{
    let parent = extract_trace_context(info.headers)
        .map(Context::with_span_context)
        .unwrap_or_default();

    let mut span = tracer.start_span_with_kind(info.span_name(), SpanKind::Server, &parent);
    span.set_attributes(info.attributes());
    let cx = span.context();

    let mut request_span = RequestSpan {
        span: Some(span),
        method: info.method.to_string(),
        route: info.route.unwrap_or(UNMATCHED_ROUTE),
        started: Instant::now(),
    };

    let result = match AssertUnwindSafe(handler(cx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(route = request_span.route, panic = %message, "Handler panicked");
            request_span.record_panic(&message);
            request_span.finish(StatusCode::INTERNAL_SERVER_ERROR);
            return Err(E::from_panic(message));
        }
    };

    match &result {
        Ok(response) => request_span.finish(response.status()),
        Err(err) => {
            request_span.record_error(err);
            request_span.finish(err.status_code());
        }
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::attribute::Value;
    use crate::telemetry::export::InMemorySpanExporter;
    use crate::telemetry::provider::TracerProvider;
    use crate::telemetry::attribute;
    use crate::telemetry::span::{EXCEPTION_EVENT, EXCEPTION_MESSAGE, EXCEPTION_TYPE};
    use hyper::header::HeaderValue;

    #[derive(Debug)]
    struct TestError(StatusCode);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "failed with {}", self.0)
        }
    }

    impl ResponseError for TestError {
        fn status_code(&self) -> StatusCode {
            self.0
        }

        fn from_panic(_message: String) -> Self {
            TestError(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }

    fn setup() -> (Tracer, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider.tracer("http"), exporter)
    }

    fn respond(status: StatusCode) -> Result<Response<()>, TestError> {
        let mut response = Response::new(());
        *response.status_mut() = status;
        Ok(response)
    }

    #[tokio::test]
    async fn test_success_sets_ok_and_attributes() {
        let (tracer, exporter) = setup();
        let uri: Uri = "/orders".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("test-client/1.0"));
        let info = RequestInfo {
            method: &Method::POST,
            uri: &uri,
            headers: &headers,
            route: Some("/orders"),
        };

        let response = instrument_request(&tracer, info, |_cx| async { respond(StatusCode::OK) })
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "POST /orders");
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.attribute(HTTP_ROUTE).and_then(Value::as_str), Some("/orders"));
        assert_eq!(span.attribute(URL_SCHEME).and_then(Value::as_str), Some("http"));
        assert_eq!(
            span.attribute(USER_AGENT_ORIGINAL).and_then(Value::as_str),
            Some("test-client/1.0")
        );
        assert_eq!(span.attribute(HTTP_RESPONSE_STATUS_CODE), Some(&Value::I64(200)));
    }

    #[tokio::test]
    async fn test_server_error_status_marks_span() {
        let (tracer, exporter) = setup();
        let uri: Uri = "/notify".parse().unwrap();
        let headers = HeaderMap::new();
        let info = RequestInfo {
            method: &Method::POST,
            uri: &uri,
            headers: &headers,
            route: Some("/notify"),
        };

        let _ = instrument_request(&tracer, info, |_cx| async {
            respond(StatusCode::SERVICE_UNAVAILABLE)
        })
        .await;

        assert!(exporter.finished_spans()[0].status.is_error());
    }

    #[tokio::test]
    async fn test_not_found_is_ok_and_unnamed_route() {
        let (tracer, exporter) = setup();
        let uri: Uri = "/missing".parse().unwrap();
        let headers = HeaderMap::new();
        let info = RequestInfo {
            method: &Method::GET,
            uri: &uri,
            headers: &headers,
            route: None,
        };

        let _ = instrument_request(&tracer, info, |_cx| async { respond(StatusCode::NOT_FOUND) })
            .await;

        let span = &exporter.finished_spans()[0];
        assert_eq!(span.name, "GET");
        assert_eq!(span.status, Status::Ok);
        assert!(span.attribute(HTTP_ROUTE).is_none());
    }

    #[tokio::test]
    async fn test_handler_error_recorded_before_conversion() {
        let (tracer, exporter) = setup();
        let uri: Uri = "/orders".parse().unwrap();
        let headers = HeaderMap::new();
        let info = RequestInfo {
            method: &Method::POST,
            uri: &uri,
            headers: &headers,
            route: Some("/orders"),
        };

        let result = instrument_request(&tracer, info, |_cx| async {
            Err::<Response<()>, _>(TestError(StatusCode::BAD_REQUEST))
        })
        .await;
        assert!(result.is_err());

        let span = &exporter.finished_spans()[0];
        assert!(span.status.is_error());
        assert_eq!(span.events[0].name, EXCEPTION_EVENT);
        assert_eq!(span.attribute(HTTP_RESPONSE_STATUS_CODE), Some(&Value::I64(400)));
    }

    #[tokio::test]
    async fn test_remote_parent_and_handler_nesting() {
        let (tracer, exporter) = setup();
        let uri: Uri = "/orders".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            HeaderValue::from_static("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"),
        );
        let info = RequestInfo {
            method: &Method::POST,
            uri: &uri,
            headers: &headers,
            route: Some("/orders"),
        };

        let inner = tracer.clone();
        let _ = instrument_request(&tracer, info, |cx| async move {
            inner.start_span("process_order", &cx).end();
            respond(StatusCode::OK)
        })
        .await;

        let spans = exporter.finished_spans();
        let (child, server) = (&spans[0], &spans[1]);
        assert_eq!(
            format!("{:032x}", server.span_context.trace_id()),
            "0af7651916cd43dd8448eb211c80319c"
        );
        assert_eq!(
            server.parent_span_id.map(|id| format!("{:016x}", id)),
            Some("b7ad6b7169203331".to_string())
        );
        assert_eq!(child.parent_span_id, Some(server.span_context.span_id()));
    }

    #[tokio::test]
    async fn test_cancelled_request_closes_span() {
        let (tracer, exporter) = setup();
        let uri: Uri = "/notify".parse().unwrap();
        let headers = HeaderMap::new();
        let info = RequestInfo {
            method: &Method::POST,
            uri: &uri,
            headers: &headers,
            route: Some("/notify"),
        };

        let request = instrument_request(&tracer, info, |_cx| async {
            futures::future::pending::<()>().await;
            respond(StatusCode::OK)
        });
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(10), request).await;
        assert!(timed_out.is_err());

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("request cancelled"));
    }

    #[tokio::test]
    async fn test_panicking_handler_closes_span_with_500() {
        let (tracer, exporter) = setup();
        let uri: Uri = "/orders".parse().unwrap();
        let headers = HeaderMap::new();
        let info = RequestInfo {
            method: &Method::POST,
            uri: &uri,
            headers: &headers,
            route: Some("/orders"),
        };

        let inner = tracer.clone();
        let result = instrument_request(&tracer, info, |cx| async move {
            let _child = inner.start_span("process_order", &cx);
            if cx.span_context().is_some() {
                panic!("inventory lookup failed");
            }
            respond(StatusCode::OK)
        })
        .await;
        assert_eq!(
            result.unwrap_err().status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 2);
        let (child, server) = (&spans[0], &spans[1]);
        assert!(child.status.is_error());
        assert_eq!(server.status, Status::error("panicked"));
        assert_eq!(server.attribute(HTTP_RESPONSE_STATUS_CODE), Some(&Value::I64(500)));
        let event = &server.events[0];
        assert_eq!(event.name, EXCEPTION_EVENT);
        assert_eq!(
            attribute::find(&event.attributes, EXCEPTION_MESSAGE).and_then(Value::as_str),
            Some("inventory lookup failed")
        );
        assert_eq!(
            attribute::find(&event.attributes, EXCEPTION_TYPE).and_then(Value::as_str),
            Some("panic")
        );
    }
}
