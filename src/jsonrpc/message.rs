//! JSON-RPC 2.0 envelope.
//!
//! The bridge only inspects the envelope (`id`, `method`, `result`,
//! `error`); `params`, `result` and `error.data` are carried as opaque
//! [`serde_json::Value`]s.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid envelope.
pub const INVALID_REQUEST: i64 = -32600;
/// Internal error.
pub const INTERNAL_ERROR: i64 = -32603;
/// The backend process is not available (crashed, restarting, fatal).
pub const BACKEND_UNAVAILABLE: i64 = -32000;
/// No backend reply within the request timeout.
pub const REQUEST_TIMEOUT: i64 = -32001;
/// Missing, unknown or expired session.
pub const SESSION_NOT_FOUND: i64 = -32002;

/// A request identifier: JSON-RPC allows numbers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Value,
}

/// The `error` member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// `None` when the id could not be determined (serialized as `null`).
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// One JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub enum Message {
    Request(Request),
    Response(Response),
    Error(ErrorResponse),
    Notification(Notification),
}

impl Message {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(Request {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    pub fn response(id: impl Into<RequestId>, result: Value) -> Self {
        Message::Response(Response {
            id: id.into(),
            result,
        })
    }

    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Message::Error(ErrorResponse {
            id,
            error: ErrorObject::new(code, message),
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Parse a message from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The identifier, for requests and responses.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Response(r) => Some(&r.id),
            Message::Error(e) => e.id.as_ref(),
            Message::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::Error(_) => "error",
            Message::Notification(_) => "notification",
        }
    }

    /// Replace the identifier of a request or response.
    pub fn with_id(self, id: RequestId) -> Self {
        match self {
            Message::Request(r) => Message::Request(Request { id, ..r }),
            Message::Response(r) => Message::Response(Response { id, ..r }),
            Message::Error(e) => Message::Error(ErrorResponse { id: Some(id), ..e }),
            other => other,
        }
    }
}

/// Wire shape used to (de)serialize [`Message`].
///
/// `id` and `result` use [`present`] so that an explicit `null` is kept
/// apart from an absent member.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn parse_id(value: Value) -> Result<Option<RequestId>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(RequestId::String(s))),
        Value::Number(n) => n
            .as_i64()
            .map(|n| Some(RequestId::Number(n)))
            .ok_or_else(|| format!("unsupported numeric id {}", n)),
        other => Err(format!("id must be a string or integer, got {}", other)),
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = String;

    fn try_from(raw: RawMessage) -> Result<Self, String> {
        if let Some(version) = raw.jsonrpc.as_deref() {
            if version != JSONRPC_VERSION {
                return Err(format!("unsupported jsonrpc version {:?}", version));
            }
        }

        let id = raw.id.map(parse_id).transpose()?.flatten();

        match (raw.method, raw.result, raw.error) {
            (Some(method), None, None) => Ok(match id {
                Some(id) => Message::Request(Request {
                    id,
                    method,
                    params: raw.params,
                }),
                None => Message::Notification(Notification {
                    method,
                    params: raw.params,
                }),
            }),
            (None, Some(result), None) => {
                let id = id.ok_or("response without id")?;
                Ok(Message::Response(Response { id, result }))
            }
            (None, None, Some(error)) => Ok(Message::Error(ErrorResponse { id, error })),
            (None, None, None) => Err("message has neither method, result nor error".to_string()),
            _ => Err("message mixes method, result and error members".to_string()),
        }
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        let id_value = |id: RequestId| match id {
            RequestId::Number(n) => Value::from(n),
            RequestId::String(s) => Value::String(s),
        };
        let mut raw = RawMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            ..RawMessage::default()
        };
        match message {
            Message::Request(r) => {
                raw.id = Some(id_value(r.id));
                raw.method = Some(r.method);
                raw.params = r.params;
            }
            Message::Response(r) => {
                raw.id = Some(id_value(r.id));
                raw.result = Some(r.result);
            }
            Message::Error(e) => {
                raw.id = Some(e.id.map(id_value).unwrap_or(Value::Null));
                raw.error = Some(e.error);
            }
            Message::Notification(n) => {
                raw.method = Some(n.method);
                raw.params = n.params;
            }
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Message, serde_json::Error> {
        Message::from_value(value)
    }

    #[test]
    fn test_classifies_envelopes() {
        assert!(matches!(
            parse(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap(),
            Message::Request(_)
        ));
        assert!(matches!(
            parse(json!({"id": "a", "result": {"ok": true}})).unwrap(),
            Message::Response(_)
        ));
        assert!(matches!(
            parse(json!({"id": 3, "error": {"code": -1, "message": "no"}})).unwrap(),
            Message::Error(_)
        ));
        assert!(matches!(
            parse(json!({"method": "notifications/progress", "params": {}})).unwrap(),
            Message::Notification(_)
        ));
    }

    #[test]
    fn test_null_result_is_a_response() {
        let message = parse(json!({"jsonrpc": "2.0", "id": 9, "result": null})).unwrap();
        assert_eq!(message, Message::response(9i64, Value::Null));
    }

    #[test]
    fn test_error_with_null_id() {
        let message = parse(json!({"id": null, "error": {"code": -32700, "message": "bad"}})).unwrap();
        assert_eq!(message.id(), None);
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["id"], Value::Null);
    }

    #[test]
    fn test_rejects_invalid_envelopes() {
        assert!(parse(json!({"jsonrpc": "1.0", "id": 1, "method": "x"})).is_err());
        assert!(parse(json!({"id": 1})).is_err());
        assert!(parse(json!({"result": 1})).is_err());
        assert!(parse(json!({"id": 1, "method": "x", "result": 1})).is_err());
        assert!(parse(json!({"id": 1.5, "method": "x"})).is_err());
        assert!(parse(json!([{"id": 1, "method": "x"}])).is_err());
    }

    #[test]
    fn test_serializes_with_version_and_without_absent_members() {
        let encoded = serde_json::to_value(Message::request(1i64, "ping", None)).unwrap();
        assert_eq!(encoded, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}));

        let encoded = serde_json::to_value(Message::notification("tick", Some(json!([1])))).unwrap();
        assert_eq!(encoded, json!({"jsonrpc": "2.0", "method": "tick", "params": [1]}));
    }

    #[test]
    fn test_with_id_rewrites_requests_and_outcomes() {
        let request = Message::request("client-1", "ping", None).with_id(RequestId::Number(42));
        assert_eq!(request.id(), Some(&RequestId::Number(42)));

        let error = Message::error(None, INTERNAL_ERROR, "x").with_id(RequestId::from("a"));
        assert_eq!(error.id(), Some(&RequestId::from("a")));
    }
}
