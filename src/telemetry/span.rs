//! Span lifecycle
//!
//! A [`Span`] is an exclusively-owned guard for one unit of traced work. It is
//! open from the moment a [`Tracer`](crate::telemetry::Tracer) creates it until
//! it is ended, either explicitly through [`Span::end`] or implicitly when the
//! guard is dropped. Ending consumes the guard, so an ended span can never be
//! mutated again; the immutable [`SpanData`] snapshot is what processors and
//! exporters see.
//!
//! # Status rules
//!
//! | Current | Requested | Result |
//! |---------|-----------|--------|
//! | any     | `Unset`   | unchanged |
//! | `Ok`    | any       | `Ok` (final) |
//! | `Unset` / `Error` | `Ok` / `Error` | requested |

use crate::telemetry::attribute::{self, KeyValue, Value};
use crate::telemetry::context::{Context, SpanContext};
use crate::telemetry::processor::SpanProcessor;
use crate::telemetry::resource::Resource;
use opentelemetry::trace::SpanId;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Event name used for recorded errors
pub const EXCEPTION_EVENT: &str = "exception";
/// Attribute key carrying the error message on an exception event
pub const EXCEPTION_MESSAGE: &str = "exception.message";
/// Attribute key carrying the error type on an exception event
pub const EXCEPTION_TYPE: &str = "exception.type";
/// `exception.type` recorded for panics
pub const PANIC_EXCEPTION_TYPE: &str = "panic";

/// Completion status of a span
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Status {
    /// No status was set
    #[default]
    Unset,
    /// The operation completed successfully
    Ok,
    /// The operation failed
    Error { description: Cow<'static, str> },
}

impl Status {
    /// An error status with a description
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error { .. })
    }
}

/// Role of a span in a trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpanKind {
    /// Work internal to the process
    #[default]
    Internal,
    /// Handling of an inbound request
    Server,
    /// An outbound request
    Client,
}

/// A timestamped point-in-time occurrence inside a span
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: Cow<'static, str>,
    pub timestamp: SystemTime,
    pub attributes: Vec<KeyValue>,
}

/// Read-only snapshot of an ended span
#[derive(Debug, Clone)]
pub struct SpanData {
    pub span_context: SpanContext,
    /// `None` for the root span of a trace
    pub parent_span_id: Option<SpanId>,
    pub name: Cow<'static, str>,
    pub kind: SpanKind,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: Vec<KeyValue>,
    pub events: Vec<Event>,
    pub status: Status,
    /// Name of the tracer that produced the span
    pub instrumentation_scope: Arc<str>,
    pub resource: Arc<Resource>,
}

impl SpanData {
    /// Look up an attribute value
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        attribute::find(&self.attributes, key)
    }

    /// Wall-clock duration of the span
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    /// Whether this span has no parent
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

/// Mutable state of an open span
struct OpenSpan {
    parent_span_id: Option<SpanId>,
    name: Cow<'static, str>,
    kind: SpanKind,
    start_time: SystemTime,
    start_instant: Instant,
    attributes: Vec<KeyValue>,
    events: Vec<Event>,
    status: Status,
    instrumentation_scope: Arc<str>,
    resource: Arc<Resource>,
    processors: Arc<Vec<Arc<dyn SpanProcessor>>>,
}

/// An open span
///
/// Dropping the guard ends the span. A span dropped while the thread is
/// panicking is marked as an error.
pub struct Span {
    span_context: SpanContext,
    open: Option<OpenSpan>,
}

/// Fields needed to open a span; assembled by the tracer
pub(crate) struct SpanStart {
    pub span_context: SpanContext,
    pub parent_span_id: Option<SpanId>,
    pub name: Cow<'static, str>,
    pub kind: SpanKind,
    pub instrumentation_scope: Arc<str>,
    pub resource: Arc<Resource>,
    pub processors: Arc<Vec<Arc<dyn SpanProcessor>>>,
}

impl Span {
    pub(crate) fn start(start: SpanStart) -> Self {
        Self {
            span_context: start.span_context,
            open: Some(OpenSpan {
                parent_span_id: start.parent_span_id,
                name: start.name,
                kind: start.kind,
                start_time: SystemTime::now(),
                start_instant: Instant::now(),
                attributes: Vec::new(),
                events: Vec::new(),
                status: Status::Unset,
                instrumentation_scope: start.instrumentation_scope,
                resource: start.resource,
                processors: start.processors,
            }),
        }
    }

    /// Identity of this span
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// A context in which this span is the active parent
    pub fn context(&self) -> Context {
        Context::with_span_context(self.span_context.clone())
    }

    /// Set a single attribute
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        if let Some(open) = self.open.as_mut() {
            open.attributes.push(attribute);
        }
    }

    /// Set several attributes at once
    pub fn set_attributes<I>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = KeyValue>,
    {
        if let Some(open) = self.open.as_mut() {
            open.attributes.extend(attributes);
        }
    }

    /// Record a named event with optional attributes
    pub fn add_event(&mut self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        if let Some(open) = self.open.as_mut() {
            open.events.push(Event {
                name: name.into(),
                timestamp: SystemTime::now(),
                attributes,
            });
        }
    }

    /// Update the status according to the precedence rules in the module docs
    pub fn set_status(&mut self, status: Status) {
        if let Some(open) = self.open.as_mut() {
            match (&open.status, &status) {
                (Status::Ok, _) | (_, Status::Unset) => {}
                _ => open.status = status,
            }
        }
    }

    /// Record an error as an `exception` event and mark the span failed
    pub fn record_error<E>(&mut self, error: &E)
    where
        E: fmt::Display + ?Sized,
    {
        let message = error.to_string();
        self.add_event(
            EXCEPTION_EVENT,
            vec![
                KeyValue::new(EXCEPTION_MESSAGE, message.clone()),
                KeyValue::new(EXCEPTION_TYPE, std::any::type_name::<E>()),
            ],
        );
        self.set_status(Status::error(message));
    }

    /// Record a panic as an `exception` event of type `panic` and mark the
    /// span failed
    pub fn record_panic(&mut self, message: &str) {
        self.add_event(
            EXCEPTION_EVENT,
            vec![
                KeyValue::new(EXCEPTION_MESSAGE, message.to_string()),
                KeyValue::new(EXCEPTION_TYPE, PANIC_EXCEPTION_TYPE),
            ],
        );
        self.set_status(Status::error("panicked"));
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.open
            .as_ref()
            .map(|open| open.status.clone())
            .unwrap_or_default()
    }

    /// End the span now
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };

        // Derive the end from the monotonic clock so end >= start always holds.
        let end_time = open.start_time + open.start_instant.elapsed();
        let data = SpanData {
            span_context: self.span_context.clone(),
            parent_span_id: open.parent_span_id,
            name: open.name,
            kind: open.kind,
            start_time: open.start_time,
            end_time,
            attributes: open.attributes,
            events: open.events,
            status: open.status,
            instrumentation_scope: open.instrumentation_scope,
            resource: open.resource,
        };

        crate::metrics::record_span_ended();

        if let Some((last, rest)) = open.processors.split_last() {
            for processor in rest {
                processor.on_end(data.clone());
            }
            last.on_end(data);
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if std::thread::panicking() && self.open.is_some() {
            self.record_panic("panicked while span was open");
        }
        self.finish();
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("span_context", &self.span_context)
            .field("name", &self.open.as_ref().map(|open| &open.name))
            .finish()
    }
}
