//! Client sessions.
//!
//! # Data Flow
//! ```text
//! POST without token → registry.rs (create, uuid token)
//! backend output → correlator → registry.rs (enqueue)
//!     → session.rs (bounded queue, wake stream)
//!     → SSE stream (drain)
//! sweep tick → registry.rs (idle sessions) → bridge expires them
//! ```
//!
//! # Design Decisions
//! - Enqueue never blocks; the backend read loop must not stall on a slow
//!   client
//! - Notifications are lossy under pressure, terminal outcomes are not
//! - One stream per session

pub mod registry;
pub mod session;

pub use registry::SessionRegistry;
pub use session::{EnqueueOutcome, Session};
