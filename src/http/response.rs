//! Error mapping for HTTP responses.
//!
//! Every [`BridgeError`] reaching a handler becomes an HTTP status plus a
//! JSON-RPC error body carrying the client's id when it is known.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::BridgeError;
use crate::jsonrpc::message::{
    BACKEND_UNAVAILABLE, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR, SESSION_NOT_FOUND,
};
use crate::jsonrpc::{Message, RequestId};

/// HTTP status and JSON-RPC error code for an error.
pub fn classify(error: &BridgeError) -> (StatusCode, i64) {
    match error {
        BridgeError::BackendUnavailable(_)
        | BridgeError::BackendBusy(_)
        | BridgeError::BackendFatal { .. }
        | BridgeError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, BACKEND_UNAVAILABLE),
        BridgeError::UnknownSession(_) => (StatusCode::NOT_FOUND, SESSION_NOT_FOUND),
        BridgeError::MissingSession(_) => (StatusCode::BAD_REQUEST, SESSION_NOT_FOUND),
        BridgeError::StreamAlreadyOpen(_) => (StatusCode::CONFLICT, INVALID_REQUEST),
        BridgeError::Parse(_) => (StatusCode::BAD_REQUEST, PARSE_ERROR),
        BridgeError::InvalidMessage(_) => (StatusCode::BAD_REQUEST, INVALID_REQUEST),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR),
    }
}

pub fn error_response(error: &BridgeError, id: Option<RequestId>) -> Response {
    let (status, code) = classify(error);
    if status.is_server_error() {
        tracing::warn!(status = %status, code, error = %error, "Rejecting request");
    } else {
        tracing::debug!(status = %status, code, error = %error, "Rejecting request");
    }
    (status, Json(Message::error(id, code, error.to_string()))).into_response()
}
