//! Endpoint handlers.
//!
//! # Endpoints
//! - `POST {path}`: submit one JSON-RPC message, 202 once queued
//! - `GET {path}`: the session's SSE stream
//! - `DELETE {path}`: end the session
//! - `GET /health`: backend and session summary

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use serde_json::Value;

use crate::error::BridgeError;
use crate::http::request::{request_id, session_header, SESSION_HEADER};
use crate::http::response::error_response;
use crate::http::server::AppState;
use crate::jsonrpc::{Message, RequestId};
use crate::session::Session;

pub async fn submit(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return error_response(&BridgeError::Parse(e.to_string()), None),
    };
    if value.is_array() {
        return error_response(
            &BridgeError::InvalidMessage("batch requests are not supported".to_string()),
            None,
        );
    }

    let id_hint = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
    let message = match Message::from_value(value) {
        Ok(message) => message,
        Err(e) => return error_response(&BridgeError::InvalidMessage(e.to_string()), id_hint),
    };
    let id = message.id().cloned();

    let session_id = match session_header(&headers) {
        Ok(session_id) => session_id,
        Err(e) => return error_response(&e, id),
    };

    tracing::debug!(
        request_id = %request_id(&headers),
        session_id = session_id.as_deref().unwrap_or("-"),
        kind = message.kind(),
        method = message.method().unwrap_or("-"),
        "Client message"
    );

    let result = match session_id {
        Some(session_id) => state
            .bridge
            .submit(&session_id, message)
            .await
            .map(|()| session_id),
        None => state
            .bridge
            .open(message)
            .await
            .map(|session| session.id().to_string()),
    };

    match result {
        Ok(session_id) => with_session_header(StatusCode::ACCEPTED.into_response(), &session_id),
        Err(e) => error_response(&e, id),
    }
}

pub async fn stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match required_session(&state, &headers) {
        Ok(session) => session,
        Err(e) => return error_response(&e, None),
    };
    if !session.try_attach_stream() {
        return error_response(&BridgeError::StreamAlreadyOpen(session.id().to_string()), None);
    }
    tracing::info!(session_id = %session.id(), request_id = %request_id(&headers), "Stream opened");

    let session_id = session.id().to_string();
    let guard = StreamGuard { session };
    let events = stream::unfold(guard, |guard| async move {
        let message = guard.session.next_message().await?;
        guard.session.touch();
        let event = match Event::default().event("message").json_data(&message) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(session_id = %guard.session.id(), error = %e, "Failed to encode event");
                Event::default().comment("encode error")
            }
        };
        Some((Ok::<_, Infallible>(event), guard))
    });

    let response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.keep_alive))
        .into_response();
    with_session_header(response, &session_id)
}

pub async fn terminate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = match session_header(&headers) {
        Ok(Some(session_id)) => session_id,
        Ok(None) => return error_response(&state.bridge.missing_session(), None),
        Err(e) => return error_response(&e, None),
    };
    match state.bridge.terminate(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e, None),
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.bridge.health();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

fn required_session(state: &AppState, headers: &HeaderMap) -> Result<Arc<Session>, BridgeError> {
    let session_id = session_header(headers)?.ok_or_else(|| state.bridge.missing_session())?;
    state.bridge.sessions().lookup(&session_id)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Releases the session's stream slot when the client goes away.
struct StreamGuard {
    session: Arc<Session>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.session.detach_stream();
        tracing::info!(session_id = %self.session.id(), "Stream closed");
    }
}
