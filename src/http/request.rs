//! Request header helpers.

use axum::http::{HeaderMap, HeaderName};

use crate::error::{BridgeError, Result};

/// Session token header, as used by MCP streamable HTTP.
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

/// Request id header set by the middleware stack.
pub const X_REQUEST_ID: &str = "x-request-id";

/// The session token, if the client sent one.
///
/// A header that is present but not valid text names no session.
pub fn session_header(headers: &HeaderMap) -> Result<Option<String>> {
    match headers.get(&SESSION_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|id| Some(id.trim().to_string()))
            .map_err(|_| BridgeError::UnknownSession("<non-ascii token>".to_string())),
    }
}

/// The request id assigned by the middleware, for log correlation.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}
