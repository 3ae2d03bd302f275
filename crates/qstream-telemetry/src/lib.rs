//! Prometheus metrics and structured logging for the qstream quote client.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus metrics for the session lifecycle and inbound traffic

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with_filter, DEFAULT_FILTER};
pub use metrics::Metrics;
