//! Trace context carried explicitly along the call path
//!
//! A [`Context`] holds the identity of the span that is active for a piece of
//! work. It is passed by reference into every function that may start a
//! nested span, so concurrent requests never share an ambient "current span".

use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};
use rand::Rng;

/// Identity of a span within a trace
#[derive(Debug, Clone, PartialEq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    trace_flags: TraceFlags,
    trace_state: TraceState,
    is_remote: bool,
}

impl SpanContext {
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: TraceFlags,
        is_remote: bool,
        trace_state: TraceState,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags,
            trace_state,
            is_remote,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    pub fn trace_state(&self) -> &TraceState {
        &self.trace_state
    }

    /// Whether this context was received from another process
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Whether the upstream sampled flag is set
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// Both identifiers are non-zero
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }
}

/// Execution-scoped trace context
///
/// An empty context means "no active span": a span started under it becomes
/// the root of a new trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    span: Option<SpanContext>,
}

impl Context {
    /// An empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose active span is `span_context`
    pub fn with_span_context(span_context: SpanContext) -> Self {
        Self {
            span: Some(span_context),
        }
    }

    /// The active span's identity, if any
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }
}

/// Generates random trace and span identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    /// A random, non-zero trace id
    pub fn new_trace_id(&self) -> TraceId {
        let mut rng = rand::rng();
        loop {
            let id: u128 = rng.random();
            if id != 0 {
                return TraceId::from(id);
            }
        }
    }

    /// A random, non-zero span id
    pub fn new_span_id(&self) -> SpanId {
        let mut rng = rand::rng();
        loop {
            let id: u64 = rng.random();
            if id != 0 {
                return SpanId::from(id);
            }
        }
    }
}
