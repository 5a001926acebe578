//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every remote call produces:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (child span + traceparent injection)
//! ```
//!
//! # Design Decisions
//! - Trace and span ids flow into every log event of a traced call
//! - Metrics are cheap (facade calls, no-ops without a recorder)
//! - Tracing is opt-in per call: no parent, no span

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::tracing::{LogRecorder, SpanHandle, SpanInfo, SpanRecorder, TraceContext, TracePropagator};
