//! Bookkeeping for requests awaiting a backend reply.

use std::time::{Duration, Instant};

use crate::jsonrpc::RequestId;

#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Id the client chose.
    pub original_id: RequestId,
    /// Id sent to the backend.
    pub rewritten_id: i64,
    pub session_id: String,
    pub method: String,
    pub created_at: Instant,
    /// The owning session expired; the reply will be discarded.
    pub abandoned: bool,
}

impl PendingRequest {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Result of routing one backend message.
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// Queued for exactly one session.
    Delivered,
    /// Notification queued for this many sessions.
    Broadcast(usize),
    /// Reply to an abandoned request, or its session is gone.
    Discarded,
    /// Reply with no matching pending request.
    Unroutable,
    /// The bridge must answer the backend itself.
    ReplyToBackend(crate::jsonrpc::Message),
}
