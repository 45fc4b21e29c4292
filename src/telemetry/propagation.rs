//! W3C Trace Context Propagation
//!
//! Extracts a remote parent from incoming request headers and injects the
//! active span into outgoing ones.
//!
//! ## Headers
//!
//! - **traceparent**: `{version}-{trace-id}-{span-id}-{trace-flags}`
//!   - Example: `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
//! - **tracestate**: optional vendor data, passed through unchanged
//!   - Example: `congo=t61rcWkgMzE,rojo=00f067aa0ba902b7`
//!
//! An invalid `traceparent` is ignored, and the request starts a new trace.
//!
//! ```
//! use std::collections::HashMap;
//! use traced_services::telemetry::propagation::extract_trace_context;
//!
//! let mut headers = HashMap::new();
//! headers.insert(
//!     "traceparent".to_string(),
//!     "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
//! );
//!
//! let parent = extract_trace_context(&headers).unwrap();
//! assert!(parent.is_remote());
//! assert!(parent.is_sampled());
//! ```

use crate::telemetry::context::SpanContext;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};
use std::collections::HashMap;
use std::str::FromStr;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

const SUPPORTED_VERSION: u8 = 0;
const INVALID_VERSION: u8 = 0xff;

/// Read access to a carrier of propagation fields
pub trait Extractor {
    /// Value for `key`, matched case-insensitively
    fn get(&self, key: &str) -> Option<&str>;
}

/// Write access to a carrier of propagation fields
pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|value| value.to_str().ok())
    }
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(key), HeaderValue::from_str(&value)) {
            self.insert(name, value);
        }
    }
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_ascii_lowercase(), value);
    }
}

/// Extract a remote parent span context
///
/// # Returns
///
/// * `Some(SpanContext)` - If a valid `traceparent` is present
/// * `None` - If it is missing or malformed
pub fn extract_trace_context<E: Extractor + ?Sized>(carrier: &E) -> Option<SpanContext> {
    let traceparent = carrier.get(TRACEPARENT_HEADER)?;
    let (trace_id, span_id, trace_flags) = parse_traceparent(traceparent.trim())?;

    let trace_state = carrier
        .get(TRACESTATE_HEADER)
        .and_then(|value| TraceState::from_str(value).ok())
        .unwrap_or_default();

    Some(SpanContext::new(trace_id, span_id, trace_flags, true, trace_state))
}

/// Write `traceparent` and, when non-empty, `tracestate` for `context`
pub fn inject_trace_context<I: Injector + ?Sized>(context: &SpanContext, carrier: &mut I) {
    if !context.is_valid() {
        return;
    }

    carrier.set(TRACEPARENT_HEADER, format_traceparent(context));

    let trace_state = context.trace_state().header();
    if !trace_state.is_empty() {
        carrier.set(TRACESTATE_HEADER, trace_state);
    }
}

/// Format a context as a `traceparent` header value
pub fn format_traceparent(context: &SpanContext) -> String {
    format!(
        "{:02x}-{:032x}-{:016x}-{:02x}",
        SUPPORTED_VERSION,
        context.trace_id(),
        context.span_id(),
        context.trace_flags().to_u8()
    )
}

fn parse_traceparent(value: &str) -> Option<(TraceId, SpanId, TraceFlags)> {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() < 4 {
        return None;
    }

    let version = parse_hex_byte(parts[0])?;
    if version == INVALID_VERSION {
        return None;
    }
    // Version 00 has exactly four fields; later versions may append more.
    if version == SUPPORTED_VERSION && parts.len() != 4 {
        return None;
    }

    if !is_hex(parts[1], 32) || !is_hex(parts[2], 16) {
        return None;
    }
    let trace_id = TraceId::from_hex(parts[1]).ok()?;
    let span_id = SpanId::from_hex(parts[2]).ok()?;
    if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
        return None;
    }

    let flags = parse_hex_byte(parts[3])?;
    Some((trace_id, span_id, TraceFlags::new(flags & TraceFlags::SAMPLED.to_u8())))
}

fn parse_hex_byte(s: &str) -> Option<u8> {
    if !is_hex(s, 2) {
        return None;
    }
    u8::from_str_radix(s, 16).ok()
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit())
}
