//! Telemetry for the Caesar trading terminal.
//!
//! Structured logging via `tracing` and Prometheus counters for the
//! non-blocking drop points mandated by the backpressure discipline.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
