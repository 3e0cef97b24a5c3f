//! Backend process manager.
//!
//! # Responsibilities
//! - Own at most one live child at a time
//! - Drive the [`ProcessState`] machine
//! - Serialize writes against restarts (the process lock)
//!
//! # Design Decisions
//! - Writers hold a read guard while queuing; crash handling takes the
//!   write guard, so no write can target a child that has been declared dead
//! - Every child gets a new generation; stale events are filtered by it

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tokio::sync::{mpsc, watch, RwLock, RwLockReadGuard};

use crate::backend::process::{self, BackendEvent, ProcessHandle};
use crate::backend::{CommandSpec, ProcessState};
use crate::config::BackendConfig;
use crate::error::{BridgeError, Result};
use crate::jsonrpc::Message;
use crate::observability::metrics;

pub struct BackendManager {
    spec: CommandSpec,
    config: BackendConfig,
    tmpdir: Option<PathBuf>,
    events: mpsc::Sender<BackendEvent>,
    state: watch::Sender<ProcessState>,
    process: RwLock<Option<ProcessHandle>>,
    next_generation: AtomicU64,
    current_generation: AtomicU64,
    fatal: AtomicBool,
    failed_attempts: AtomicU32,
}

impl BackendManager {
    pub fn new(
        spec: CommandSpec,
        config: BackendConfig,
        tmpdir: Option<PathBuf>,
        events: mpsc::Sender<BackendEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ProcessState::Stopped);
        Self {
            spec,
            config,
            tmpdir,
            events,
            state,
            process: RwLock::new(None),
            next_generation: AtomicU64::new(0),
            current_generation: AtomicU64::new(0),
            fatal: AtomicBool::new(false),
            failed_attempts: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Generation of the most recently spawned child.
    pub fn generation(&self) -> u64 {
        self.current_generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Enter the fatal state: the restart policy gave up.
    pub fn set_fatal(&self, attempts: u32) {
        self.failed_attempts.store(attempts, Ordering::SeqCst);
        self.fatal.store(true, Ordering::SeqCst);
    }

    fn transition(&self, next: ProcessState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                tracing::debug!(from = %state, to = %next, "Backend state change");
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            metrics::set_backend_state(next);
        } else {
            tracing::warn!(from = %self.state(), to = %next, "Rejected backend state transition");
        }
        changed
    }

    /// Spawn a child: Stopped/Crashed → Starting → Running.
    ///
    /// Returns the generation of the new child. A child that is already
    /// running is left alone.
    pub async fn start(&self) -> Result<u64> {
        let mut slot = self.process.write().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.generation());
        }
        if !self.transition(ProcessState::Starting) {
            return Err(BridgeError::BackendUnavailable(format!(
                "cannot start backend while {}",
                self.state()
            )));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.current_generation.store(generation, Ordering::SeqCst);

        match process::spawn(
            generation,
            &self.spec,
            &self.config,
            self.tmpdir.as_deref(),
            self.events.clone(),
        )
        .await
        {
            Ok(handle) => {
                *slot = Some(handle);
                self.transition(ProcessState::Running);
                tracing::info!(generation, "Backend running");
                Ok(generation)
            }
            Err(e) => {
                self.transition(ProcessState::Crashed);
                Err(e)
            }
        }
    }

    /// Declare the child of `generation` dead and take its handle.
    ///
    /// Returns `None` when that child was already retired (stopped, or a
    /// second event for the same exit), which callers treat as a no-op.
    pub async fn mark_crashed(&self, generation: u64) -> Option<ProcessHandle> {
        let mut slot = self.process.write().await;
        match slot.as_ref() {
            Some(handle) if handle.generation() == generation => {}
            _ => return None,
        }
        let handle = slot.take();
        self.transition(ProcessState::Crashed);
        handle
    }

    /// Terminate the child: → Stopping → Stopped.
    pub async fn stop(&self) {
        let handle = {
            let mut slot = self.process.write().await;
            if self.state() == ProcessState::Stopped {
                return;
            }
            self.transition(ProcessState::Stopping);
            slot.take()
        };
        if let Some(handle) = handle {
            tracing::info!(generation = handle.generation(), pid = ?handle.pid(), "Stopping backend");
            handle.terminate().await;
        }
        self.transition(ProcessState::Stopped);
    }

    fn unavailable(&self) -> BridgeError {
        if self.is_fatal() {
            BridgeError::BackendFatal {
                attempts: self.failed_attempts.load(Ordering::SeqCst),
            }
        } else {
            BridgeError::BackendUnavailable(format!("backend is {}", self.state()))
        }
    }

    /// Acquire the write path to the running child.
    ///
    /// Fails fast while the backend is not Running; never waits for a
    /// restart.
    pub async fn writer(&self) -> Result<BackendWriter<'_>> {
        if self.is_fatal() || self.state() != ProcessState::Running {
            return Err(self.unavailable());
        }
        let guard = self.process.read().await;
        if guard.is_none() || self.state() != ProcessState::Running {
            return Err(self.unavailable());
        }
        Ok(BackendWriter { guard })
    }
}

/// Write access to the running child; holds the process lock shared.
pub struct BackendWriter<'a> {
    guard: RwLockReadGuard<'a, Option<ProcessHandle>>,
}

impl BackendWriter<'_> {
    fn handle(&self) -> Result<&ProcessHandle> {
        self.guard
            .as_ref()
            .ok_or_else(|| BridgeError::BackendUnavailable("backend is not running".to_string()))
    }

    pub fn generation(&self) -> u64 {
        self.guard.as_ref().map_or(0, ProcessHandle::generation)
    }

    /// Queue a message for the writer task, waiting for queue space.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.handle()?
            .writer()
            .send(message)
            .await
            .map_err(|_| BridgeError::BackendUnavailable("backend stdin is closed".to_string()))
    }

    /// Queue a message without waiting; used from the read loop.
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.handle()?
            .writer()
            .try_send(message)
            .map_err(|e| BridgeError::BackendUnavailable(format!("backend stdin unavailable: {}", e)))
    }
}
