//! # Middleware Stack
//!
//! - [`metrics`]: per-request counters and latency histograms.
//!
//! Identity lives in [`crate::auth`]; request tracing is tower-http's
//! `TraceLayer`.

pub mod metrics;
