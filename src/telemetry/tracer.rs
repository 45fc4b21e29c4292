//! Tracer handle
//!
//! A [`Tracer`] is a cheap handle carrying an instrumentation scope name and a
//! reference back to its [`TracerProvider`]. Handlers use it to start spans
//! under an explicit parent [`Context`].

use crate::telemetry::context::{Context, SpanContext};
use crate::telemetry::provider::TracerProvider;
use crate::telemetry::span::{Span, SpanKind, SpanStart};
use futures::future::BoxFuture;
use opentelemetry::trace::{TraceFlags, TraceState};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Starts spans for one instrumentation scope
#[derive(Clone)]
pub struct Tracer {
    name: Arc<str>,
    provider: TracerProvider,
}

impl Tracer {
    pub(crate) fn new(name: Arc<str>, provider: TracerProvider) -> Self {
        Self { name, provider }
    }

    /// Instrumentation scope name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start an `Internal` span as a child of the active span in `parent`
    ///
    /// With no active span in `parent` the new span is the root of a new
    /// trace.
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>, parent: &Context) -> Span {
        self.start_span_with_kind(name, SpanKind::Internal, parent)
    }

    /// Start a span with an explicit [`SpanKind`]
    pub fn start_span_with_kind(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: &Context,
    ) -> Span {
        let ids = self.provider.id_generator();
        let span_id = ids.new_span_id();

        let (span_context, parent_span_id) = match parent.span_context() {
            Some(parent) => (
                SpanContext::new(
                    parent.trace_id(),
                    span_id,
                    parent.trace_flags(),
                    false,
                    parent.trace_state().clone(),
                ),
                Some(parent.span_id()),
            ),
            None => (
                SpanContext::new(
                    ids.new_trace_id(),
                    span_id,
                    TraceFlags::SAMPLED,
                    false,
                    TraceState::default(),
                ),
                None,
            ),
        };

        Span::start(SpanStart {
            span_context,
            parent_span_id,
            name: name.into(),
            kind,
            instrumentation_scope: self.name.clone(),
            resource: self.provider.resource().clone(),
            processors: self.provider.processors(),
        })
    }

    /// Run `f` inside a new span
    ///
    /// If `f` returns `Err`, the error is recorded on the span as an
    /// `exception` event and the status becomes `Error` before the span ends.
    /// On `Ok` the status is whatever `f` set.
    pub fn in_span<T, E, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        parent: &Context,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut Span) -> Result<T, E>,
        E: fmt::Display,
    {
        let mut span = self.start_span(name, parent);
        let result = f(&mut span);
        if let Err(err) = &result {
            span.record_error(err);
        }
        span.end();
        result
    }

    /// Async counterpart of [`Tracer::in_span`]
    ///
    /// ```no_run
    /// # use traced_services::telemetry::{Context, KeyValue, Tracer};
    /// # use futures::FutureExt;
    /// # async fn example(tracer: Tracer) -> Result<(), std::io::Error> {
    /// tracer
    ///     .in_span_async("send_notification", &Context::new(), |span| {
    ///         async move {
    ///             span.set_attribute(KeyValue::new("notification.type", "email"));
    ///             Ok::<_, std::io::Error>(())
    ///         }
    ///         .boxed()
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn in_span_async<T, E, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        parent: &Context,
        f: F,
    ) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Span) -> BoxFuture<'s, Result<T, E>>,
        E: fmt::Display,
    {
        let mut span = self.start_span(name, parent);
        let result = f(&mut span).await;
        if let Err(err) = &result {
            span.record_error(err);
        }
        span.end();
        result
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::export::InMemorySpanExporter;
    use crate::telemetry::span::{Status, EXCEPTION_EVENT};
    use futures::FutureExt;

    fn setup() -> (Tracer, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider.tracer("tracer-test"), exporter)
    }

    #[test]
    fn test_child_shares_trace_and_records_parent() {
        let (tracer, exporter) = setup();

        let parent = tracer.start_span_with_kind("GET /health", SpanKind::Server, &Context::new());
        let child = tracer.start_span("inner", &parent.context());
        let child_trace = child.span_context().trace_id();
        child.end();
        parent.end();

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 2);
        let (child, parent) = (&spans[0], &spans[1]);

        assert_eq!(child_trace, parent.span_context.trace_id());
        assert_eq!(child.parent_span_id, Some(parent.span_context.span_id()));
        assert!(parent.is_root());
        assert_eq!(parent.kind, SpanKind::Server);
        assert_eq!(child.kind, SpanKind::Internal);
    }

    #[test]
    fn test_roots_start_new_traces() {
        let (tracer, _exporter) = setup();

        let a = tracer.start_span("a", &Context::new());
        let b = tracer.start_span("b", &Context::new());

        assert_ne!(a.span_context().trace_id(), b.span_context().trace_id());
        assert!(a.span_context().is_valid());
        assert!(a.span_context().is_sampled());
    }

    #[test]
    fn test_in_span_error_marks_span() {
        let (tracer, exporter) = setup();

        let result: Result<(), String> =
            tracer.in_span("process_order", &Context::new(), |_span| {
                Err("missing field: userId".to_string())
            });
        assert!(result.is_err());

        let spans = exporter.finished_spans();
        assert_eq!(spans[0].status, Status::error("missing field: userId"));
        assert_eq!(spans[0].events.len(), 1);
        assert_eq!(spans[0].events[0].name, EXCEPTION_EVENT);
    }

    #[test]
    fn test_in_span_success_leaves_status_unset() {
        let (tracer, exporter) = setup();

        let value: Result<u32, String> = tracer.in_span("noop", &Context::new(), |_span| Ok(7));
        assert_eq!(value, Ok(7));
        assert_eq!(exporter.finished_spans()[0].status, Status::Unset);
    }

    #[tokio::test]
    async fn test_in_span_async_nests_under_parent() {
        let (tracer, exporter) = setup();
        let parent = tracer.start_span("parent", &Context::new());
        let cx = parent.context();

        let result: Result<&str, String> = tracer
            .in_span_async("send_notification", &cx, |span| {
                async move {
                    tokio::task::yield_now().await;
                    span.set_status(Status::Ok);
                    Ok("sent")
                }
                .boxed()
            })
            .await;
        parent.end();

        assert_eq!(result, Ok("sent"));
        let spans = exporter.finished_spans();
        assert_eq!(spans[0].name, "send_notification");
        assert_eq!(spans[0].status, Status::Ok);
        assert_eq!(spans[0].parent_span_id, Some(spans[1].span_context.span_id()));
    }
}
