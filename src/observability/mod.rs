//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, backend stderr included)
//!     → metrics.rs (counters and gauges through the `metrics` facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`session_id`, `generation`, `rewritten_id`) rather
//!   than formatted strings
//! - Request ID flows from the `x-request-id` header into HTTP spans
//! - Without an installed recorder, metric calls are no-ops

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
