//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend exit observed by the supervisor:
//!     → restart.rs (stable run? reset; budget left? next delay)
//!     → backoff.rs (exponential delay with jitter)
//!     → sleep, respawn
//!     → budget exhausted: backend marked fatal
//! ```
//!
//! # Design Decisions
//! - Restarts are bounded; a crash loop ends in a fatal state rather than
//!   spinning forever
//! - A child that stayed up long enough earns a fresh budget

pub mod backoff;
pub mod restart;

pub use backoff::calculate_backoff;
pub use restart::RestartPolicy;
