//! The bridge core: sessions, correlation and the backend, wired together.
//!
//! HTTP handlers and the supervisor loop both go through [`Bridge`]; neither
//! touches the backend or the correlator directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::backend::{BackendManager, BackendWriter, ProcessState};
use crate::correlator::{Correlator, Dispatch, Submission};
use crate::error::{BridgeError, Result};
use crate::jsonrpc::Message;
use crate::observability::metrics;
use crate::session::{Session, SessionRegistry};

const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Snapshot served by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub name: String,
    pub state: &'static str,
    pub generation: u64,
    pub fatal: bool,
    pub sessions: usize,
    pub pending: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        !self.fatal && self.state == ProcessState::Running.as_str()
    }
}

pub struct Bridge {
    name: String,
    backend: Arc<BackendManager>,
    correlator: Correlator,
    sessions: Arc<SessionRegistry>,
    open_method: Option<String>,
    idle_timeout: Duration,
    submit_timeout: Duration,
    accepting: AtomicBool,
}

/// Withdraws a pending entry unless the write completed.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    rewritten_id: Option<i64>,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.rewritten_id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.rewritten_id.take() {
            if self.correlator.withdraw(id).is_some() {
                tracing::debug!(rewritten_id = id, "Withdrew unsent request");
            }
        }
    }
}

impl Bridge {
    pub fn new(
        name: String,
        backend: Arc<BackendManager>,
        sessions: Arc<SessionRegistry>,
        correlator: Correlator,
        open_method: Option<String>,
        idle_timeout: Duration,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            name,
            backend,
            correlator,
            sessions,
            open_method,
            idle_timeout,
            submit_timeout,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<BackendManager> {
        &self.backend
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::ShuttingDown)
        }
    }

    fn opens_session(&self, message: &Message) -> bool {
        match (message, self.open_method.as_deref()) {
            (Message::Request(_), None | Some("*")) => true,
            (Message::Request(request), Some(method)) => request.method == method,
            _ => false,
        }
    }

    /// Error for a message that needs a session but carries none.
    pub fn missing_session(&self) -> BridgeError {
        let hint = match self.open_method.as_deref() {
            None | Some("*") => "any request".to_string(),
            Some(method) => format!("`{}` request", method),
        };
        BridgeError::MissingSession(hint)
    }

    /// Open a session with its first message and forward that message.
    pub async fn open(&self, message: Message) -> Result<Arc<Session>> {
        self.ensure_accepting()?;
        if !self.opens_session(&message) {
            return Err(self.missing_session());
        }

        let writer = self.backend.writer().await?;
        let session = self.sessions.create_session();
        metrics::record_submission(message.kind());
        let submission = match self.correlator.submit(session.id(), message) {
            Ok(submission) => submission,
            Err(e) => {
                self.sessions.expire(session.id());
                return Err(e);
            }
        };
        if let Err(e) = self.forward(&writer, submission).await {
            self.sessions.expire(session.id());
            return Err(e);
        }
        Ok(session)
    }

    /// Forward a message on an existing session.
    pub async fn submit(&self, session_id: &str, message: Message) -> Result<()> {
        self.ensure_accepting()?;
        let session = self.sessions.lookup(session_id)?;
        session.touch();

        let writer = self.backend.writer().await?;
        metrics::record_submission(message.kind());
        let submission = self.correlator.submit(session_id, message)?;
        // An expiry that closed the session before the entry existed could
        // not abandon it.
        if session.is_closed() {
            if let Some(id) = submission.rewritten_id {
                self.correlator.withdraw(id);
            }
            return Err(BridgeError::UnknownSession(session_id.to_string()));
        }
        self.forward(&writer, submission).await
    }

    /// Write one submission, withdrawing its pending entry if the write
    /// fails, times out or is cancelled.
    async fn forward(&self, writer: &BackendWriter<'_>, submission: Submission) -> Result<()> {
        let Submission { message, rewritten_id } = submission;
        let mut guard = PendingGuard {
            correlator: &self.correlator,
            rewritten_id,
        };
        match tokio::time::timeout(self.submit_timeout, writer.send(message)).await {
            Ok(Ok(())) => {
                guard.disarm();
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(timeout = ?self.submit_timeout, "Backend writer queue stayed full");
                Err(BridgeError::BackendBusy(self.submit_timeout))
            }
        }
    }

    /// Route one message read from the backend.
    pub async fn dispatch(&self, message: Message) {
        if let Dispatch::ReplyToBackend(reply) = self.correlator.on_backend_message(message) {
            self.reply_to_backend(reply).await;
        }
    }

    async fn reply_to_backend(&self, reply: Message) {
        let result = match self.backend.writer().await {
            Ok(writer) => writer.try_send(reply),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Could not answer backend request");
        }
    }

    /// Resolve every pending request with a backend-unavailable error.
    pub fn fail_pending(&self, reason: &str) -> usize {
        self.correlator.fail_all(reason)
    }

    /// Tear down a session after abandoning its pending requests.
    ///
    /// The session is closed first, so a submit racing this call either
    /// lands before the abandon or sees the closed session.
    pub async fn expire_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.expire(session_id).is_some();
        let (abandoned, owed) = self.correlator.abandon_session(session_id);
        if abandoned > 0 {
            tracing::debug!(session_id = %session_id, abandoned, "Abandoned pending requests");
        }
        for reply in owed {
            self.reply_to_backend(reply).await;
        }
        removed
    }

    /// Explicit client teardown.
    pub async fn terminate(&self, session_id: &str) -> Result<()> {
        self.sessions.lookup(session_id)?;
        self.expire_session(session_id).await;
        Ok(())
    }

    /// Periodic housekeeping: idle sessions and timed-out requests.
    pub async fn sweep(&self, now: Instant) {
        for session_id in self.sessions.idle_sessions(now, self.idle_timeout) {
            tracing::info!(session_id = %session_id, "Expiring idle session");
            self.expire_session(&session_id).await;
        }
        self.correlator.expire_timed_out(now);
    }

    /// Refuse new submissions from now on.
    pub fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!("No longer accepting submissions");
        }
    }

    /// Wait up to `timeout` for outstanding requests to resolve.
    ///
    /// Returns how many were still outstanding at the deadline.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let outstanding = self.correlator.outstanding();
            if outstanding == 0 || tokio::time::Instant::now() >= deadline {
                return outstanding;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            name: self.name.clone(),
            state: self.backend.state().as_str(),
            generation: self.backend.generation(),
            fatal: self.backend.is_fatal(),
            sessions: self.sessions.len(),
            pending: self.correlator.pending_count(),
        }
    }
}
