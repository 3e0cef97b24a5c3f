//! stdio-bridge
//!
//! Serves one stdio JSON-RPC backend to many HTTP clients.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────┐
//!                     │                   STDIO BRIDGE                    │
//!   POST /mcp         │  ┌────────┐   ┌──────────┐   ┌────────────┐       │
//!  ───────────────────┼─▶│  http  │──▶│  bridge  │──▶│ correlator │──┐    │
//!                     │  └────────┘   └──────────┘   └────────────┘  │    │
//!                     │       ▲                                      ▼    │   stdin
//!   GET /mcp (SSE)    │  ┌────────┐                           ┌─────────┐ │──────────▶
//!  ◀──────────────────┼──│session │◀──── supervisor loop ◀────│ backend │ │  child
//!                     │  │ queues │                           │ process │ │◀──────────
//!                     │  └────────┘                           └─────────┘ │   stdout
//!                     │                                                   │
//!                     │  config · lifecycle · resilience · observability  │
//!                     └───────────────────────────────────────────────────┘
//! ```

use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use stdio_bridge::cli::Cli;
use stdio_bridge::lifecycle::{launch, shutdown_signal};
use stdio_bridge::observability::{init_logging, init_metrics};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("stdio-bridge: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("stdio-bridge: failed to initialize logging: {}", e);
    }

    tracing::info!(
        name = %config.server.name,
        backend = %config.backend.command,
        request_timeout_ms = config.timeouts.request_ms,
        idle_timeout_ms = config.sessions.idle_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let bind_address = config.server.bind_address();
    let listener = match TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_address, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        "Starting {} proxy on http://{}{}",
        config.server.name,
        bind_address,
        config.server.path
    );

    let running = match launch(config, listener).await {
        Ok(running) => running,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    shutdown_signal().await;
    running.shutdown().await;
    ExitCode::SUCCESS
}
