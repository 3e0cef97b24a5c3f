//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration
//! - Bring the backend up before any traffic is served
//! - Start the supervisor and the HTTP server tasks
//!
//! # Design Decisions
//! - Fail fast: a backend that never comes up is a startup error
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{BackendManager, CommandSpec};
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::correlator::Correlator;
use crate::error::Result;
use crate::http::HttpServer;
use crate::lifecycle::{ScratchSpace, Shutdown, Supervisor};
use crate::resilience::RestartPolicy;
use crate::session::SessionRegistry;

/// Capacity of the channel between child tasks and the supervisor.
const EVENT_QUEUE: usize = 1024;

/// A bridge that is up and serving.
pub struct RunningBridge {
    pub(crate) bridge: Arc<Bridge>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) drain_timeout: Duration,
    pub(crate) http_shutdown: Shutdown,
    pub(crate) supervisor_stop: Shutdown,
    pub(crate) server: JoinHandle<std::io::Result<()>>,
    pub(crate) supervisor: JoinHandle<()>,
    pub(crate) scratch: ScratchSpace,
}

impl RunningBridge {
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Start the backend, then serve `listener`.
pub async fn launch(config: BridgeConfig, listener: TcpListener) -> Result<RunningBridge> {
    let local_addr = listener.local_addr()?;
    let scratch = ScratchSpace::create(config.backend.isolate_tmpdir)?;
    let spec = CommandSpec::parse(&config.backend.command)?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let backend = Arc::new(BackendManager::new(
        spec,
        config.backend.clone(),
        scratch.path().map(|p| p.to_path_buf()),
        events_tx,
    ));
    let sessions = Arc::new(SessionRegistry::new(config.sessions.queue_capacity));
    let correlator = Correlator::new(sessions.clone(), config.timeouts.request());
    let bridge = Arc::new(Bridge::new(
        config.server.name.clone(),
        backend.clone(),
        sessions,
        correlator,
        config.sessions.open_method.clone(),
        config.sessions.idle_timeout(),
        Duration::from_secs(config.server.submit_timeout_secs),
    ));

    let mut supervisor = Supervisor::new(
        bridge.clone(),
        events_rx,
        RestartPolicy::new(config.restart.clone()),
        config.sessions.sweep_interval(),
    );
    if let Err(e) = supervisor.startup().await {
        backend.stop().await;
        scratch.cleanup();
        return Err(e);
    }

    let supervisor_stop = Shutdown::new();
    let supervisor = tokio::spawn(supervisor.run(supervisor_stop.subscribe()));

    let http_shutdown = Shutdown::new();
    let server = HttpServer::new(&config.server, bridge.clone());
    let server = tokio::spawn(server.run(listener, http_shutdown.subscribe()));

    tracing::info!(
        name = %config.server.name,
        address = %local_addr,
        path = %config.server.path,
        "Bridge ready"
    );

    Ok(RunningBridge {
        bridge,
        local_addr,
        drain_timeout: config.timeouts.drain(),
        http_shutdown,
        supervisor_stop,
        server,
        supervisor,
        scratch,
    })
}
