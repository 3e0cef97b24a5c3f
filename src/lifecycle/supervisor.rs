//! Backend supervision loop.
//!
//! # Responsibilities
//! - Bring the backend up at startup under the restart policy
//! - Demultiplex backend output into sessions, in order, from one task
//! - Turn exits and framing failures into fail-pending plus restart
//! - Drive the periodic session and timeout sweep
//!
//! # Design Decisions
//! - One consumer for all backend events; ordering falls out of that
//! - Events carry the child generation; a superseded child is ignored
//! - Exhausted restarts leave the backend fatal; the loop keeps sweeping
//! - The sweep keeps ticking while a restart backs off

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Interval, MissedTickBehavior};

use crate::backend::{BackendEvent, ProcessHandle};
use crate::bridge::Bridge;
use crate::error::Result;
use crate::observability::metrics;
use crate::resilience::RestartPolicy;

const CRASH_REASON: &str = "backend unavailable";

pub struct Supervisor {
    bridge: Arc<Bridge>,
    events: mpsc::Receiver<BackendEvent>,
    policy: RestartPolicy,
    sweep_interval: Duration,
}

impl Supervisor {
    pub fn new(
        bridge: Arc<Bridge>,
        events: mpsc::Receiver<BackendEvent>,
        policy: RestartPolicy,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            bridge,
            events,
            policy,
            sweep_interval,
        }
    }

    /// Start the backend, retrying with backoff.
    ///
    /// Returns once the backend is Running; an exhausted policy marks the
    /// backend fatal and returns the last start error.
    pub async fn startup(&mut self) -> Result<()> {
        let backend = self.bridge.backend().clone();
        loop {
            let error = match backend.start().await {
                Ok(generation) => {
                    tracing::info!(generation, "Backend ready");
                    return Ok(());
                }
                Err(e) => e,
            };

            match self.policy.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        error = %error,
                        attempt = self.policy.attempts(),
                        delay = ?delay,
                        "Backend failed to start, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    metrics::record_backend_restart();
                }
                None => {
                    tracing::error!(error = %error, attempts = self.policy.attempts(), "Backend failed to start, giving up");
                    backend.set_fatal(self.policy.attempts());
                    return Err(error);
                }
            }
        }
    }

    /// Process events until `stop` fires.
    pub async fn run(mut self, mut stop: broadcast::Receiver<()>) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                event = self.events.recv() => match event {
                    Some(event) => {
                        if !self.handle(event, &mut stop, &mut sweep).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => self.bridge.sweep(Instant::now()).await,
            }
        }
        tracing::debug!("Supervisor stopped");
    }

    /// Returns `false` when a stop arrived mid-recovery.
    async fn handle(
        &mut self,
        event: BackendEvent,
        stop: &mut broadcast::Receiver<()>,
        sweep: &mut Interval,
    ) -> bool {
        let backend = self.bridge.backend().clone();
        match event {
            BackendEvent::Message { generation, message } => {
                if backend.is_current(generation) {
                    self.bridge.dispatch(message).await;
                } else {
                    tracing::debug!(generation, kind = message.kind(), "Dropping output of superseded backend");
                }
                true
            }
            BackendEvent::FramingFailure { generation, consecutive } => {
                let Some(handle) = backend.mark_crashed(generation).await else {
                    return true;
                };
                tracing::error!(generation, consecutive, "Backend output unreadable, treating as crash");
                let uptime = handle.uptime();
                tokio::spawn(ProcessHandle::terminate(handle));
                self.recover(uptime, "framing", stop, sweep).await
            }
            BackendEvent::Exited { generation, status } => {
                let Some(handle) = backend.mark_crashed(generation).await else {
                    tracing::debug!(generation, status = %status, "Exit of retired backend");
                    return true;
                };
                tracing::error!(generation, status = %status, uptime = ?handle.uptime(), "Backend crashed");
                let uptime = handle.uptime();
                handle.terminate().await;
                self.recover(uptime, "exit", stop, sweep).await
            }
        }
    }

    async fn recover(
        &mut self,
        uptime: Duration,
        reason: &'static str,
        stop: &mut broadcast::Receiver<()>,
        sweep: &mut Interval,
    ) -> bool {
        metrics::record_backend_crash(reason);
        self.bridge.fail_pending(CRASH_REASON);
        self.policy.record_exit(uptime);

        let backend = self.bridge.backend().clone();
        loop {
            let Some(delay) = self.policy.next_delay() else {
                tracing::error!(attempts = self.policy.attempts(), "Restart attempts exhausted, backend is fatal");
                backend.set_fatal(self.policy.attempts());
                return true;
            };

            tracing::info!(attempt = self.policy.attempts(), delay = ?delay, "Restarting backend");
            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    _ = stop.recv() => return false,
                    _ = &mut backoff => break,
                    _ = sweep.tick() => self.bridge.sweep(Instant::now()).await,
                }
            }

            metrics::record_backend_restart();
            match backend.start().await {
                Ok(generation) => {
                    tracing::info!(generation, "Backend restarted");
                    return true;
                }
                Err(e) => tracing::warn!(error = %e, "Backend restart failed"),
            }
        }
    }
}
