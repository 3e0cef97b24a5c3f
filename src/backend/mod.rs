//! Backend process subsystem.
//!
//! # Data Flow
//! ```text
//! command string
//!     → command.rs (shell split into argv)
//!     → manager.rs (state machine, process lock)
//!     → process.rs (spawn; writer / reader / stderr / monitor tasks)
//!
//! stdout → reader task → BackendEvent::Message ─┐
//! exit   → monitor task → BackendEvent::Exited ─┴→ supervisor loop
//! ```
//!
//! # Design Decisions
//! - Exactly one writer task owns stdin and one reader task owns stdout
//! - Exit events are sent after stdout is drained, so responses written
//!   just before a crash are delivered before pending requests are failed
//! - Restart decisions live in the supervisor, not here

pub mod command;
pub mod manager;
pub mod process;
pub mod state;

pub use command::CommandSpec;
pub use manager::{BackendManager, BackendWriter};
pub use process::{BackendEvent, ProcessHandle};
pub use state::ProcessState;
