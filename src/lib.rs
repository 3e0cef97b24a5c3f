//! Bridge a stdio JSON-RPC server to streaming HTTP clients.

// Core subsystems
pub mod backend;
pub mod bridge;
pub mod correlator;
pub mod jsonrpc;
pub mod session;

// Outer surfaces
pub mod cli;
pub mod config;
pub mod http;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use bridge::{Bridge, HealthReport};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use http::HttpServer;
pub use lifecycle::{launch, RunningBridge, Shutdown};
