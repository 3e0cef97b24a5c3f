//! Live sessions keyed by their token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::jsonrpc::Message;
use crate::observability::metrics;
use crate::session::{EnqueueOutcome, Session};

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            queue_capacity,
        }
    }

    pub fn create_session(&self) -> Arc<Session> {
        let id = Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(id.clone(), self.queue_capacity));
        self.sessions.insert(id.clone(), session.clone());
        metrics::set_sessions(self.sessions.len());
        tracing::info!(session_id = %id, "Session opened");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Session>> {
        self.get(id)
            .ok_or_else(|| BridgeError::UnknownSession(id.to_string()))
    }

    /// Queue a message for one session. `None` if the session is gone.
    pub fn enqueue(&self, id: &str, message: Message) -> Option<EnqueueOutcome> {
        let session = self.get(id)?;
        let outcome = session.enqueue(message);
        if outcome.lost_notification() {
            metrics::record_notification_dropped();
            tracing::debug!(session_id = %id, outcome = ?outcome, "Session queue full, notification lost");
        }
        Some(outcome)
    }

    /// Queue a copy of `message` for every live session.
    pub fn broadcast(&self, message: &Message) -> usize {
        let targets: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        targets
            .iter()
            .filter(|id| {
                matches!(
                    self.enqueue(id, message.clone()),
                    Some(EnqueueOutcome::Queued | EnqueueOutcome::ReplacedOldest)
                )
            })
            .count()
    }

    /// Session that receives server-initiated requests: the most recently
    /// active one with a stream attached, else the most recently active.
    pub fn primary(&self) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .max_by_key(|session| (session.has_stream(), session.last_activity()))
    }

    /// Remove and close a session.
    pub fn expire(&self, id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        session.close();
        metrics::set_sessions(self.sessions.len());
        tracing::info!(session_id = %id, age = ?session.age(), "Session closed");
        Some(session)
    }

    /// Sessions idle for at least `idle_timeout` as of `now`.
    pub fn idle_sessions(&self, now: Instant, idle_timeout: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now) >= idle_timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.expire(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
