//! End-to-end behaviour of the bridge against the mock backend.

use serde_json::{json, Value};

mod common;

use common::{start, test_config, WAIT};

fn has_id(id: Value) -> impl Fn(&Value) -> bool {
    move |v| v.get("id") == Some(&id) && (v.get("result").is_some() || v.get("error").is_some())
}

#[tokio::test]
async fn test_ping_round_trip() {
    let bridge = start(test_config()).await;
    let session = bridge.initialize(json!(1)).await;
    let mut stream = bridge.open_stream(&session).await;

    let init = stream.until(WAIT, has_id(json!(1))).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "mock-backend");

    let response = bridge.request(&session, json!(2), "ping", json!({})).await;
    assert_eq!(response.status(), 202);
    assert_eq!(response.headers()[common::SESSION_HEADER], session.as_str());

    let pong = stream.until(WAIT, has_id(json!(2))).await;
    assert_eq!(pong, json!({ "jsonrpc": "2.0", "id": 2, "result": "pong" }));

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_colliding_ids_across_sessions() {
    let bridge = start(test_config()).await;
    let a = bridge.initialize(json!(1)).await;
    let b = bridge.initialize(json!(1)).await;
    assert_ne!(a, b);
    let mut stream_a = bridge.open_stream(&a).await;
    let mut stream_b = bridge.open_stream(&b).await;
    stream_a.until(WAIT, has_id(json!(1))).await;
    stream_b.until(WAIT, has_id(json!(1))).await;

    bridge.request(&a, json!(1), "echo", json!({ "from": "a" })).await;
    bridge.request(&b, json!(1), "echo", json!({ "from": "b" })).await;

    let from_a = stream_a.until(WAIT, has_id(json!(1))).await;
    let from_b = stream_b.until(WAIT, has_id(json!(1))).await;
    assert_eq!(from_a["result"], json!({ "from": "a" }));
    assert_eq!(from_b["result"], json!({ "from": "b" }));

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_string_ids_are_restored() {
    let bridge = start(test_config()).await;
    let session = bridge.initialize(json!("init-x")).await;
    let mut stream = bridge.open_stream(&session).await;
    let init = stream.until(WAIT, has_id(json!("init-x"))).await;
    assert!(init.get("result").is_some());
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_session_errors() {
    let bridge = start(test_config()).await;

    // Unknown token.
    let response = bridge
        .request("not-a-session", json!(1), "ping", json!({}))
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32002);
    assert_eq!(body["id"], 1);

    // No token and not an initialize request.
    let response = bridge
        .post(None, json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" }))
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32002);

    // Stream without token.
    let response = bridge.client.get(bridge.url("/mcp")).send().await.unwrap();
    assert_eq!(response.status(), 400);

    // Second concurrent stream.
    let session = bridge.initialize(json!(1)).await;
    let _stream = bridge.open_stream(&session).await;
    let response = bridge
        .client
        .get(bridge.url("/mcp"))
        .header(common::SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    assert_eq!(bridge.health().await.1["sessions"], 1);
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_malformed_bodies() {
    let bridge = start(test_config()).await;
    let session = bridge.initialize(json!(1)).await;

    let response = bridge.post_raw(Some(&session), "{not json".to_string()).await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);

    let response = bridge
        .post(Some(&session), json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }]))
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);

    let response = bridge
        .post(Some(&session), json!({ "jsonrpc": "1.0", "id": 9, "method": "ping" }))
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], 9);

    // A reply to a server request that was never sent.
    let response = bridge
        .post(Some(&session), json!({ "jsonrpc": "2.0", "id": "srv-404", "result": true }))
        .await;
    assert_eq!(response.status(), 400);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_notifications_are_broadcast() {
    let bridge = start(test_config()).await;
    let a = bridge.initialize(json!(1)).await;
    let b = bridge.initialize(json!(1)).await;
    let mut stream_a = bridge.open_stream(&a).await;
    let mut stream_b = bridge.open_stream(&b).await;

    bridge.request(&a, json!(2), "notify", json!("hello")).await;

    let is_note = |v: &Value| v["method"] == "notifications/message";
    let note_a = stream_a.until(WAIT, is_note).await;
    let note_b = stream_b.until(WAIT, is_note).await;
    assert_eq!(note_a["params"]["data"], "hello");
    assert_eq!(note_a, note_b);

    let reply = stream_a.until(WAIT, has_id(json!(2))).await;
    assert_eq!(reply["result"], "notified");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_client_notifications_are_accepted() {
    let bridge = start(test_config()).await;
    let session = bridge.initialize(json!(1)).await;
    let response = bridge
        .post(
            Some(&session),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
    assert_eq!(response.status(), 202);
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_server_request_round_trip() {
    let bridge = start(test_config()).await;
    let session = bridge.initialize(json!(1)).await;
    let mut stream = bridge.open_stream(&session).await;

    bridge.request(&session, json!(9), "ask", json!({ "q": "?" })).await;
    let server_request = stream.until(WAIT, |v| v["method"] == "sampling/createMessage").await;
    assert_eq!(server_request["id"], "srv-1");

    let response = bridge
        .post(Some(&session), json!({ "jsonrpc": "2.0", "id": "srv-1", "result": "yes" }))
        .await;
    assert_eq!(response.status(), 202);

    let answer = stream.until(WAIT, has_id(json!(9))).await;
    assert_eq!(answer["result"], json!({ "answer": "yes" }));

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_garbage_line_is_skipped() {
    let bridge = start(test_config()).await;
    let session = bridge.initialize(json!(1)).await;
    let mut stream = bridge.open_stream(&session).await;

    bridge.request(&session, json!(4), "garbage", json!({})).await;
    let reply = stream.until(WAIT, has_id(json!(4))).await;
    assert_eq!(reply["result"], "after garbage");

    let (status, health) = bridge.health().await;
    assert_eq!(status, 200);
    assert_eq!(health["generation"], 1);
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_delete_ends_session() {
    let bridge = start(test_config()).await;
    let session = bridge.initialize(json!(1)).await;
    let mut stream = bridge.open_stream(&session).await;
    stream.until(WAIT, has_id(json!(1))).await;

    let response = bridge
        .client
        .delete(bridge.url("/mcp"))
        .header(common::SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    assert!(stream.next(WAIT).await.is_none());
    let response = bridge.request(&session, json!(2), "ping", json!({})).await;
    assert_eq!(response.status(), 404);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_health_report() {
    let bridge = start(test_config()).await;
    let (status, body) = bridge.health().await;
    assert_eq!(status, 200);
    assert_eq!(body["name"], "test");
    assert_eq!(body["state"], "running");
    assert_eq!(body["fatal"], false);
    assert_eq!(body["pending"], 0);

    let response = bridge.client.get(bridge.url("/health")).send().await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_any_request_opens_when_open_method_unset() {
    let mut config = test_config();
    config.sessions.open_method = None;
    let bridge = start(config).await;

    let response = bridge
        .post(None, json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .await;
    assert_eq!(response.status(), 202);
    assert!(response.headers().contains_key(common::SESSION_HEADER));
    bridge.shutdown().await;
}
