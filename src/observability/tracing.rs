//! Distributed tracing support.
//!
//! # Responsibilities
//! - Start a child span for every traced outbound call
//! - Propagate the child span's identity to the downstream (`traceparent`)
//! - Guarantee every started span is finished exactly once
//!
//! # Design Decisions
//! - The parent is passed explicitly on the call context; no ambient lookup
//! - Untraced calls get an inert handle so call sites never branch
//! - W3C Trace Context header format
//! - Span lifecycle is reported to a pluggable [`SpanRecorder`]

use reqwest::header::HeaderValue;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::http::request::OutboundRequest;

/// W3C trace context header.
pub const TRACEPARENT: &str = "traceparent";

const FLAG_SAMPLED: u8 = 0x01;

/// Identity of a span, as carried across process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub sampled: bool,
}

impl TraceContext {
    /// Start a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: fastrand::u128(1..),
            span_id: fastrand::u64(1..),
            sampled: true,
        }
    }

    /// A new span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: fastrand::u64(1..),
            sampled: self.sampled,
        }
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { FLAG_SAMPLED } else { 0 };
        format!("00-{:032x}-{:016x}-{:02x}", self.trace_id, self.span_id, flags)
    }

    /// Parse a `traceparent` header value. Returns `None` for anything malformed.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || version.eq_ignore_ascii_case("ff") {
            return None;
        }
        // Version 00 has exactly four fields; later versions may append more.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }
        if ![version, trace_id, span_id, flags].iter().all(|part| is_hex(part)) {
            return None;
        }

        let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
        let span_id = u64::from_str_radix(span_id, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;

        if trace_id == 0 || span_id == 0 {
            return None;
        }

        Some(Self {
            trace_id,
            span_id,
            sampled: flags & FLAG_SAMPLED != 0,
        })
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_traceparent())
    }
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A span as seen by a [`SpanRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanInfo {
    pub name: String,
    pub context: TraceContext,
    pub parent_span_id: u64,
}

/// Receives span lifecycle events.
pub trait SpanRecorder: Send + Sync {
    fn on_start(&self, span: &SpanInfo);
    fn on_finish(&self, span: &SpanInfo, elapsed: Duration);
}

/// Reports spans as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl SpanRecorder for LogRecorder {
    fn on_start(&self, span: &SpanInfo) {
        ::tracing::debug!(
            span_name = %span.name,
            trace_id = %format_args!("{:032x}", span.context.trace_id),
            span_id = %format_args!("{:016x}", span.context.span_id),
            parent_span_id = %format_args!("{:016x}", span.parent_span_id),
            "span started"
        );
    }

    fn on_finish(&self, span: &SpanInfo, elapsed: Duration) {
        ::tracing::debug!(
            span_name = %span.name,
            span_id = %format_args!("{:016x}", span.context.span_id),
            elapsed_ms = elapsed.as_millis() as u64,
            "span finished"
        );
    }
}

/// Handle to a started span. Finishes on [`SpanHandle::finish`] or on drop, whichever is first.
pub struct SpanHandle {
    active: Option<ActiveSpan>,
}

struct ActiveSpan {
    info: SpanInfo,
    recorder: Arc<dyn SpanRecorder>,
    started: Instant,
    span: ::tracing::Span,
}

impl SpanHandle {
    /// A handle that records nothing.
    pub fn inert() -> Self {
        Self { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Identity injected into the outgoing request, if traced.
    pub fn context(&self) -> Option<TraceContext> {
        self.active.as_ref().map(|a| a.info.context)
    }

    /// The `tracing` span to instrument the call with; disabled when inert.
    pub fn tracing_span(&self) -> ::tracing::Span {
        match &self.active {
            Some(active) => active.span.clone(),
            None => ::tracing::Span::none(),
        }
    }

    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.recorder.on_finish(&active.info, active.started.elapsed());
        }
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("span", &self.active.as_ref().map(|a| &a.info))
            .finish()
    }
}

/// Starts child spans for outbound requests and injects their identity.
#[derive(Clone)]
pub struct TracePropagator {
    recorder: Arc<dyn SpanRecorder>,
}

impl Default for TracePropagator {
    fn default() -> Self {
        Self::new(Arc::new(LogRecorder))
    }
}

impl fmt::Debug for TracePropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracePropagator").finish_non_exhaustive()
    }
}

impl TracePropagator {
    pub fn new(recorder: Arc<dyn SpanRecorder>) -> Self {
        Self { recorder }
    }

    /// Decorate `request` with a child of `parent` and return its handle.
    ///
    /// Without a parent the request is left untouched and the handle is inert.
    pub fn annotate(&self, request: &mut OutboundRequest, parent: Option<&TraceContext>) -> SpanHandle {
        let Some(parent) = parent else {
            return SpanHandle::inert();
        };

        let context = parent.child();
        let name = format!("HTTP {}: {}", request.method, request.url.path());

        if let Ok(value) = HeaderValue::from_str(&context.to_traceparent()) {
            request.headers.insert(TRACEPARENT, value);
        }

        let span = ::tracing::info_span!(
            "remote_call",
            span_name = %name,
            trace_id = %format_args!("{:032x}", context.trace_id),
            span_id = %format_args!("{:016x}", context.span_id),
        );

        let info = SpanInfo {
            name,
            context,
            parent_span_id: parent.span_id,
        };
        self.recorder.on_start(&info);

        SpanHandle {
            active: Some(ActiveSpan {
                info,
                recorder: self.recorder.clone(),
                started: Instant::now(),
                span,
            }),
        }
    }
}
