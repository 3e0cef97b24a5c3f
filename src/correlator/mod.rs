//! Request correlation between many clients and one backend.
//!
//! # Data Flow
//! ```text
//! client Request {id: 1}
//!     → submit: allocate rewritten id 17, record PendingRequest
//!     → backend sees {id: 17}
//! backend Response {id: 17}
//!     → on_backend_message: remove entry, restore {id: 1}
//!     → owning session queue
//!
//! backend Request {id: "srv-1"} → primary session
//! client Response {id: "srv-1"} → submit: forwarded unchanged
//! ```
//!
//! # Design Decisions
//! - Rewritten ids come from one counter, so they are unique across all
//!   sessions and survive client id collisions
//! - An entry is removed when resolved; a second resolution finds nothing
//! - Session queues are never touched while the pending table is locked
//! - The table is ordered by rewritten id, so bulk failures reach each
//!   session in submission order

pub mod pending;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};
use crate::jsonrpc::message::{BACKEND_UNAVAILABLE, INTERNAL_ERROR, REQUEST_TIMEOUT};
use crate::jsonrpc::{Message, RequestId};
use crate::observability::metrics;
use crate::session::{EnqueueOutcome, SessionRegistry};

pub use pending::{Dispatch, PendingRequest};

/// A client message ready for the backend writer.
#[derive(Debug)]
pub struct Submission {
    pub message: Message,
    /// Set for requests; used to withdraw the entry if the write fails.
    pub rewritten_id: Option<i64>,
}

pub struct Correlator {
    next_id: AtomicI64,
    pending: Mutex<BTreeMap<i64, PendingRequest>>,
    /// Server-initiated requests awaiting a client reply, by backend id.
    server_requests: Mutex<HashMap<RequestId, String>>,
    sessions: Arc<SessionRegistry>,
    request_timeout: Duration,
}

impl Correlator {
    pub fn new(sessions: Arc<SessionRegistry>, request_timeout: Duration) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(BTreeMap::new()),
            server_requests: Mutex::new(HashMap::new()),
            sessions,
            request_timeout,
        }
    }

    /// Prepare a client message for the backend.
    pub fn submit(&self, session_id: &str, message: Message) -> Result<Submission> {
        match message {
            Message::Request(request) => {
                let rewritten_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let entry = PendingRequest {
                    original_id: request.id.clone(),
                    rewritten_id,
                    session_id: session_id.to_string(),
                    method: request.method.clone(),
                    created_at: Instant::now(),
                    abandoned: false,
                };
                tracing::debug!(
                    session_id = %session_id,
                    method = %request.method,
                    original_id = %request.id,
                    rewritten_id,
                    "Request submitted"
                );
                let pending = {
                    let mut table = self.pending.lock();
                    table.insert(rewritten_id, entry);
                    table.len()
                };
                metrics::set_pending(pending);
                Ok(Submission {
                    message: Message::Request(request).with_id(RequestId::Number(rewritten_id)),
                    rewritten_id: Some(rewritten_id),
                })
            }
            Message::Notification(_) => Ok(Submission {
                message,
                rewritten_id: None,
            }),
            reply => {
                let id = reply
                    .id()
                    .cloned()
                    .ok_or_else(|| BridgeError::InvalidMessage("reply without id".to_string()))?;
                let mut owners = self.server_requests.lock();
                let owned = owners.get(&id).is_some_and(|owner| owner == session_id);
                if !owned {
                    return Err(BridgeError::InvalidMessage(format!(
                        "no outstanding server request {} for this session",
                        id
                    )));
                }
                owners.remove(&id);
                Ok(Submission {
                    message: reply,
                    rewritten_id: None,
                })
            }
        }
    }

    /// Drop a pending entry whose request never reached the backend.
    pub fn withdraw(&self, rewritten_id: i64) -> Option<PendingRequest> {
        let (entry, pending) = {
            let mut table = self.pending.lock();
            (table.remove(&rewritten_id), table.len())
        };
        metrics::set_pending(pending);
        entry
    }

    /// Route one message read from the backend.
    pub fn on_backend_message(&self, message: Message) -> Dispatch {
        match message {
            Message::Notification(_) => Dispatch::Broadcast(self.sessions.broadcast(&message)),
            Message::Request(request) => self.route_server_request(request),
            outcome => self.resolve(outcome),
        }
    }

    fn resolve(&self, outcome: Message) -> Dispatch {
        let rewritten_id = match outcome.id() {
            Some(RequestId::Number(n)) => *n,
            id => {
                metrics::record_unroutable();
                tracing::warn!(id = ?id, kind = outcome.kind(), "Backend reply with foreign id, dropping");
                return Dispatch::Unroutable;
            }
        };

        let (entry, pending) = {
            let mut table = self.pending.lock();
            (table.remove(&rewritten_id), table.len())
        };
        let Some(entry) = entry else {
            metrics::record_unroutable();
            tracing::warn!(rewritten_id, kind = outcome.kind(), "Backend reply matches no pending request, dropping");
            return Dispatch::Unroutable;
        };
        metrics::set_pending(pending);
        metrics::record_outcome(outcome.kind());

        if entry.abandoned {
            tracing::debug!(rewritten_id, session_id = %entry.session_id, "Discarding reply for expired session");
            return Dispatch::Discarded;
        }

        tracing::debug!(
            session_id = %entry.session_id,
            method = %entry.method,
            rewritten_id,
            elapsed = ?entry.created_at.elapsed(),
            "Request resolved"
        );
        let restored = outcome.with_id(entry.original_id);
        match self.sessions.enqueue(&entry.session_id, restored) {
            Some(EnqueueOutcome::Closed) | None => Dispatch::Discarded,
            Some(_) => Dispatch::Delivered,
        }
    }

    fn route_server_request(&self, request: crate::jsonrpc::Request) -> Dispatch {
        let Some(session) = self.sessions.primary() else {
            tracing::warn!(method = %request.method, id = %request.id, "Server request with no client session, refusing");
            return Dispatch::ReplyToBackend(Message::error(
                Some(request.id),
                INTERNAL_ERROR,
                "no client session available",
            ));
        };

        tracing::debug!(method = %request.method, id = %request.id, session_id = %session.id(), "Routing server request");
        let id = request.id.clone();
        self.server_requests
            .lock()
            .insert(id.clone(), session.id().to_string());
        if session.enqueue(Message::Request(request)) == EnqueueOutcome::Closed {
            self.server_requests.lock().remove(&id);
            return Dispatch::ReplyToBackend(Message::error(
                Some(id),
                INTERNAL_ERROR,
                "client session closed",
            ));
        }
        Dispatch::Delivered
    }

    /// Resolve every pending request with a backend-unavailable error.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.pending.lock();
            std::mem::take(&mut *table).into_values().collect()
        };
        self.server_requests.lock().clear();
        metrics::set_pending(0);

        let mut failed = 0;
        for entry in drained.into_iter().filter(|e| !e.abandoned) {
            metrics::record_outcome("failed");
            let error = Message::error(Some(entry.original_id), BACKEND_UNAVAILABLE, reason);
            self.sessions.enqueue(&entry.session_id, error);
            failed += 1;
        }
        if failed > 0 {
            tracing::warn!(failed, reason = %reason, "Failed pending requests");
        }
        failed
    }

    /// Mark a session's requests abandoned and release its server requests.
    ///
    /// Returns the number of abandoned requests and the replies the backend
    /// is still owed for server requests that session held.
    pub fn abandon_session(&self, session_id: &str) -> (usize, Vec<Message>) {
        let mut abandoned = 0;
        for entry in self.pending.lock().values_mut() {
            if entry.session_id == session_id && !entry.abandoned {
                entry.abandoned = true;
                abandoned += 1;
            }
        }

        let owed: Vec<RequestId> = {
            let mut owners = self.server_requests.lock();
            let ids: Vec<RequestId> = owners
                .iter()
                .filter(|(_, owner)| owner.as_str() == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                owners.remove(id);
            }
            ids
        };
        let replies = owed
            .into_iter()
            .map(|id| Message::error(Some(id), INTERNAL_ERROR, "client session closed"))
            .collect();

        (abandoned, replies)
    }

    /// Resolve requests older than the request timeout.
    pub fn expire_timed_out(&self, now: Instant) -> usize {
        let (expired, pending) = {
            let mut table = self.pending.lock();
            let ids: Vec<i64> = table
                .values()
                .filter(|e| e.age(now) >= self.request_timeout)
                .map(|e| e.rewritten_id)
                .collect();
            let expired: Vec<PendingRequest> =
                ids.iter().filter_map(|id| table.remove(id)).collect();
            (expired, table.len())
        };
        if expired.is_empty() {
            return 0;
        }
        metrics::set_pending(pending);

        let mut timed_out = 0;
        for entry in expired.into_iter().filter(|e| !e.abandoned) {
            tracing::warn!(
                session_id = %entry.session_id,
                method = %entry.method,
                rewritten_id = entry.rewritten_id,
                "Request timed out"
            );
            metrics::record_outcome("timeout");
            let error = Message::error(Some(entry.original_id), REQUEST_TIMEOUT, "request timed out");
            self.sessions.enqueue(&entry.session_id, error);
            timed_out += 1;
        }
        timed_out
    }

    /// Pending requests whose owner still wants the reply.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().values().filter(|e| !e.abandoned).count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::ErrorResponse;
    use serde_json::json;

    fn setup() -> (Arc<SessionRegistry>, Correlator) {
        let sessions = Arc::new(SessionRegistry::new(16));
        let correlator = Correlator::new(sessions.clone(), Duration::from_secs(60));
        (sessions, correlator)
    }

    fn rewritten(submission: &Submission) -> i64 {
        match submission.message.id() {
            Some(RequestId::Number(n)) => *n,
            other => panic!("unexpected id {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_round_trip_restores_original_id() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();

        let submission = correlator
            .submit(session.id(), Message::request("abc", "ping", None))
            .unwrap();
        let rid = rewritten(&submission);
        assert_eq!(submission.rewritten_id, Some(rid));

        let dispatch = correlator.on_backend_message(Message::response(rid, json!("pong")));
        assert_eq!(dispatch, Dispatch::Delivered);
        assert_eq!(correlator.pending_count(), 0);

        let delivered = session.next_message().await.unwrap();
        assert_eq!(delivered, Message::response("abc", json!("pong")));
    }

    #[test]
    fn test_colliding_client_ids_get_distinct_rewrites() {
        let (sessions, correlator) = setup();
        let a = sessions.create_session();
        let b = sessions.create_session();

        let first = correlator.submit(a.id(), Message::request(1i64, "x", None)).unwrap();
        let second = correlator.submit(b.id(), Message::request(1i64, "x", None)).unwrap();
        assert_ne!(rewritten(&first), rewritten(&second));

        correlator.on_backend_message(Message::response(rewritten(&second), json!("b")));
        correlator.on_backend_message(Message::response(rewritten(&first), json!("a")));
        assert_eq!(a.queued(), 1);
        assert_eq!(b.queued(), 1);
    }

    #[test]
    fn test_second_resolution_is_unroutable() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        let rid = rewritten(
            &correlator
                .submit(session.id(), Message::request(1i64, "x", None))
                .unwrap(),
        );
        assert_eq!(
            correlator.on_backend_message(Message::response(rid, json!(1))),
            Dispatch::Delivered
        );
        assert_eq!(
            correlator.on_backend_message(Message::response(rid, json!(2))),
            Dispatch::Unroutable
        );
        assert_eq!(session.queued(), 1);
    }

    #[test]
    fn test_notifications_pass_through_and_broadcast() {
        let (sessions, correlator) = setup();
        let a = sessions.create_session();
        sessions.create_session();

        let submission = correlator
            .submit(a.id(), Message::notification("initialized", None))
            .unwrap();
        assert_eq!(submission.rewritten_id, None);
        assert_eq!(correlator.pending_count(), 0);

        let dispatch = correlator.on_backend_message(Message::notification("tick", None));
        assert_eq!(dispatch, Dispatch::Broadcast(2));
    }

    #[test]
    fn test_fail_all_reaches_every_owner() {
        let (sessions, correlator) = setup();
        let a = sessions.create_session();
        let b = sessions.create_session();
        for i in 0..3i64 {
            correlator.submit(a.id(), Message::request(i, "x", None)).unwrap();
        }
        correlator.submit(b.id(), Message::request(5i64, "x", None)).unwrap();

        assert_eq!(correlator.fail_all("backend unavailable"), 4);
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(a.queued(), 3);
        assert_eq!(b.queued(), 1);
    }

    async fn error_ids(session: &crate::session::Session, count: usize) -> Vec<RequestId> {
        let mut ids = Vec::new();
        for _ in 0..count {
            match session.next_message().await.unwrap() {
                Message::Error(e) => ids.push(e.id.unwrap()),
                other => panic!("expected error, got {:?}", other),
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_fail_all_keeps_submission_order() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        for i in 0..32i64 {
            correlator.submit(session.id(), Message::request(i, "x", None)).unwrap();
        }

        assert_eq!(correlator.fail_all("backend unavailable"), 32);
        let expected: Vec<RequestId> = (0..32).map(RequestId::Number).collect();
        assert_eq!(error_ids(&session, 32).await, expected);
    }

    #[tokio::test]
    async fn test_timeouts_keep_submission_order() {
        let sessions = Arc::new(SessionRegistry::new(16));
        let correlator = Correlator::new(sessions.clone(), Duration::from_millis(10));
        let session = sessions.create_session();
        for i in 0..32i64 {
            correlator.submit(session.id(), Message::request(i, "slow", None)).unwrap();
        }

        let later = Instant::now() + Duration::from_millis(50);
        assert_eq!(correlator.expire_timed_out(later), 32);
        let expected: Vec<RequestId> = (0..32).map(RequestId::Number).collect();
        assert_eq!(error_ids(&session, 32).await, expected);
    }

    #[tokio::test]
    async fn test_fail_all_error_shape() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        correlator.submit(session.id(), Message::request(5i64, "x", None)).unwrap();
        correlator.fail_all("backend unavailable");

        match session.next_message().await.unwrap() {
            Message::Error(ErrorResponse { id, error }) => {
                assert_eq!(id, Some(RequestId::Number(5)));
                assert_eq!(error.code, BACKEND_UNAVAILABLE);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_abandoned_reply_is_discarded() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        let rid = rewritten(
            &correlator
                .submit(session.id(), Message::request(1i64, "x", None))
                .unwrap(),
        );

        let (abandoned, replies) = correlator.abandon_session(session.id());
        assert_eq!(abandoned, 1);
        assert!(replies.is_empty());
        assert_eq!(correlator.outstanding(), 0);
        assert_eq!(correlator.pending_count(), 1);

        assert_eq!(
            correlator.on_backend_message(Message::response(rid, json!(1))),
            Dispatch::Discarded
        );
        assert_eq!(session.queued(), 0);
    }

    #[test]
    fn test_reply_to_closed_session_is_discarded() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        let rid = rewritten(
            &correlator
                .submit(session.id(), Message::request(1i64, "x", None))
                .unwrap(),
        );

        session.close();
        assert_eq!(
            correlator.on_backend_message(Message::response(rid, json!(1))),
            Dispatch::Discarded
        );
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_server_request_to_closed_session_is_refused() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        session.close();

        match correlator.on_backend_message(Message::request("srv-2", "sampling", None)) {
            Dispatch::ReplyToBackend(Message::Error(e)) => {
                assert_eq!(e.id, Some(RequestId::from("srv-2")));
            }
            other => panic!("unexpected dispatch {:?}", other),
        }
        let (_, owed) = correlator.abandon_session(session.id());
        assert!(owed.is_empty());
    }

    #[test]
    fn test_timeout_resolves_with_error() {
        let sessions = Arc::new(SessionRegistry::new(16));
        let correlator = Correlator::new(sessions.clone(), Duration::from_millis(10));
        let session = sessions.create_session();
        correlator.submit(session.id(), Message::request(1i64, "slow", None)).unwrap();

        assert_eq!(correlator.expire_timed_out(Instant::now()), 0);
        let later = Instant::now() + Duration::from_millis(50);
        assert_eq!(correlator.expire_timed_out(later), 1);
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(session.queued(), 1);
    }

    #[test]
    fn test_server_request_round_trip() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        let other = sessions.create_session();
        session.try_attach_stream();

        let dispatch = correlator.on_backend_message(Message::request("srv-1", "sampling", None));
        assert_eq!(dispatch, Dispatch::Delivered);
        assert_eq!(session.queued(), 1);

        let reply = Message::response("srv-1", json!({ "ok": true }));
        assert!(correlator.submit(other.id(), reply.clone()).is_err());

        let submission = correlator.submit(session.id(), reply.clone()).unwrap();
        assert_eq!(submission.message, reply);
        assert!(correlator.submit(session.id(), reply).is_err());
    }

    #[test]
    fn test_server_request_without_sessions_is_refused() {
        let (_sessions, correlator) = setup();
        match correlator.on_backend_message(Message::request("srv-1", "sampling", None)) {
            Dispatch::ReplyToBackend(Message::Error(e)) => {
                assert_eq!(e.id, Some(RequestId::from("srv-1")));
                assert_eq!(e.error.code, INTERNAL_ERROR);
            }
            other => panic!("unexpected dispatch {:?}", other),
        }
    }

    #[test]
    fn test_abandon_returns_owed_server_replies() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        correlator.on_backend_message(Message::request("srv-9", "roots/list", None));
        let (_, replies) = correlator.abandon_session(session.id());
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id(), Some(&RequestId::from("srv-9")));
    }

    #[test]
    fn test_withdraw() {
        let (sessions, correlator) = setup();
        let session = sessions.create_session();
        let submission = correlator
            .submit(session.id(), Message::request(1i64, "x", None))
            .unwrap();
        let entry = correlator.withdraw(submission.rewritten_id.unwrap()).unwrap();
        assert_eq!(entry.original_id, RequestId::Number(1));
        assert_eq!(correlator.pending_count(), 0);
    }
}
