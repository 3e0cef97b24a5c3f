//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Scratch dir → Backend manager → Sessions + correlator → Bridge
//!     → Supervisor startup (backend Running) → HTTP server
//!
//! Supervision (supervisor.rs):
//!     Backend events → dispatch | crash → fail pending → backoff → restart
//!     Sweep tick → idle sessions, request timeouts
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain pending → Fail leftovers
//!     → Close streams → Stop backend → Remove scratch dir
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: the listener serves only once the backend is Running
//! - Ordered shutdown: stop accept, drain, close
//! - Drain has a deadline; leftovers get an error, never silence

pub mod scratch;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use scratch::ScratchSpace;
pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{launch, RunningBridge};
pub use supervisor::Supervisor;
