//! # svcguard-observability
//!
//! Structured logging for svcguard.
//!
//! - [`init_tracing`] installs a `tracing-subscriber` stack (text or JSON,
//!   per-component levels) once at startup.
//! - [`TransitionLogger`] turns breaker state changes into structured log
//!   events that log aggregation and alerting can key on.

pub mod tracing_setup;
pub mod transitions;

pub use tracing_setup::{build_filter, init_tracing, LogConfig};
pub use transitions::{attach_transition_logger, log_health_summary, TransitionLogger};
