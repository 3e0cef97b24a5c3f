//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (session token, request id)
//!     → handlers.rs (parse body, call the bridge)
//!     → response.rs (error → status + JSON-RPC error)
//!     → Send to client (202, SSE stream, 204, health JSON)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{SESSION_HEADER, X_REQUEST_ID};
pub use server::HttpServer;
