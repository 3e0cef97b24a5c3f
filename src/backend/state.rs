//! Backend process state machine.
//!
//! # States
//! - Stopped: no child
//! - Starting: spawned, not yet confirmed alive
//! - Running: accepting writes
//! - Crashed: exited unexpectedly or failed to start
//! - Stopping: termination in progress
//!
//! # State Transitions
//! ```text
//! Stopped  → Starting
//! Starting → Running | Crashed | Stopping
//! Running  → Crashed | Stopping
//! Crashed  → Starting | Stopping
//! Stopping → Stopped
//! ```

use std::fmt;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Crashed = 3,
    Stopping = 4,
}

impl ProcessState {
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Starting, Stopping)
                | (Running, Crashed)
                | (Running, Stopping)
                | (Crashed, Starting)
                | (Crashed, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Crashed => "crashed",
            ProcessState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
