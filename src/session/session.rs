//! A single client session and its outbound queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::jsonrpc::Message;

/// What happened to a message handed to [`Session::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue was full; the oldest queued notification was evicted.
    ReplacedOldest,
    /// Queue was full of non-notifications; the notification was dropped.
    Dropped,
    /// The session is closed.
    Closed,
}

impl EnqueueOutcome {
    pub fn lost_notification(self) -> bool {
        matches!(self, EnqueueOutcome::ReplacedOldest | EnqueueOutcome::Dropped)
    }
}

#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    queue: Mutex<VecDeque<Message>>,
    capacity: usize,
    ready: Notify,
    stream_attached: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: String, capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_activity: Mutex::new(now),
            queue: Mutex::new(VecDeque::new()),
            capacity,
            ready: Notify::new(),
            stream_attached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since last activity; zero while a stream is attached.
    pub fn idle_for(&self, now: Instant) -> Duration {
        if self.has_stream() {
            return Duration::ZERO;
        }
        now.saturating_duration_since(self.last_activity())
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Append a message without blocking.
    ///
    /// Notifications are capped at `capacity`: a full queue evicts its
    /// oldest notification, or drops the new one when it holds none.
    /// Responses, errors and server requests are always appended.
    pub fn enqueue(&self, message: Message) -> EnqueueOutcome {
        if self.is_closed() {
            return EnqueueOutcome::Closed;
        }

        let outcome = {
            let mut queue = self.queue.lock();
            let is_notification = matches!(message, Message::Notification(_));
            if !is_notification || queue.len() < self.capacity {
                queue.push_back(message);
                EnqueueOutcome::Queued
            } else {
                let oldest = queue
                    .iter()
                    .position(|m| matches!(m, Message::Notification(_)));
                match oldest {
                    Some(index) => {
                        queue.remove(index);
                        queue.push_back(message);
                        EnqueueOutcome::ReplacedOldest
                    }
                    None => EnqueueOutcome::Dropped,
                }
            }
        };

        if outcome != EnqueueOutcome::Dropped {
            self.ready.notify_one();
        }
        outcome
    }

    /// Wait for the next outbound message.
    ///
    /// Messages queued before [`Session::close`] are still handed out;
    /// `None` once the queue is empty and the session is closed.
    pub async fn next_message(&self) -> Option<Message> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.queue.lock().pop_front() {
                return Some(message);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Claim the single stream slot.
    pub fn try_attach_stream(&self) -> bool {
        let attached = self
            .stream_attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if attached {
            self.touch();
        }
        attached
    }

    pub fn detach_stream(&self) {
        self.touch();
        self.stream_attached.store(false, Ordering::SeqCst);
    }

    pub fn has_stream(&self) -> bool {
        self.stream_attached.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
