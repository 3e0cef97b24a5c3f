//! Shutdown coordination for the bridge.

use tokio::sync::broadcast;

use crate::lifecycle::RunningBridge;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that long-running tasks subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningBridge {
    /// Orderly stop: refuse new work, drain, fail leftovers, close streams,
    /// stop the backend, remove the scratch directory.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.bridge.stop_accepting();
        self.http_shutdown.trigger();

        let leftover = self.bridge.drain(self.drain_timeout).await;
        if leftover > 0 {
            tracing::warn!(leftover, "Drain deadline reached");
            self.bridge.fail_pending("proxy shutting down");
        }

        // Ends every SSE stream once its queue is flushed.
        self.bridge.sessions().close_all();

        self.supervisor_stop.trigger();
        if let Err(e) = self.supervisor.await {
            tracing::error!(error = %e, "Supervisor task failed");
        }
        self.bridge.backend().stop().await;

        match tokio::time::timeout(self.drain_timeout, self.server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server error"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
            Err(_) => tracing::warn!("HTTP server did not stop before the deadline"),
        }

        self.scratch.cleanup();
        tracing::info!("Shutdown complete");
    }
}
