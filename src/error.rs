//! Error types shared across the bridge.

use crate::config::loader::ConfigError;

/// Errors surfaced by the bridge core.
///
/// Every variant that can reach an HTTP client is mapped to a status code
/// and a JSON-RPC error code in [`crate::http::response`].
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The backend is not in the Running state (starting, crashed, stopping).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend did not take the message off the writer queue in time.
    #[error("backend did not accept the message within {0:?}")]
    BackendBusy(std::time::Duration),

    /// The restart policy is exhausted; the proxy refuses new traffic.
    #[error("backend failed permanently after {attempts} restart attempts")]
    BackendFatal { attempts: u32 },

    /// The session token does not name a live session.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A submit arrived without a session token and cannot open one.
    #[error("missing session: send {0} without a session header to open one")]
    MissingSession(String),

    /// A second stream was requested for a session that already has one.
    #[error("session {0} already has an open stream")]
    StreamAlreadyOpen(String),

    /// Body is not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// Body is JSON but not an acceptable JSON-RPC envelope.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The proxy is draining and no longer accepts submissions.
    #[error("proxy is shutting down")]
    ShuttingDown,

    /// The backend command string could not be turned into an argv.
    #[error("invalid backend command: {0}")]
    Command(String),

    /// Spawning the child process failed.
    #[error("failed to spawn backend: {0}")]
    Spawn(#[source] std::io::Error),

    /// The child exited before it was confirmed alive.
    #[error("backend exited during startup ({0})")]
    StartupExit(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
