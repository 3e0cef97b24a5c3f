//! Scripted stdio JSON-RPC server used by the integration tests.
//!
//! Methods:
//! - `initialize` → server info
//! - `ping` → `"pong"`
//! - `echo` → the params
//! - `sleep {"ms": n}` → replies after `n` ms, concurrently with later requests
//! - `crash` → exits with status 3 without replying
//! - `notify` → emits `notifications/message`, then replies
//! - `garbage` → writes a non-JSON line, then replies
//! - `ask` → sends server request `srv-1`, replies with the client's answer
//! - `whoami` → the process id
//!
//! `MOCK_BACKEND_CRASH_ON_START=1` makes it exit immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

#[tokio::main]
async fn main() {
    if std::env::var_os("MOCK_BACKEND_CRASH_ON_START").is_some() {
        eprintln!("mock-backend: crashing on start");
        std::process::exit(1);
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.write_all(b"\n").await;
            let _ = stdout.flush().await;
        }
    });

    // Client `ask` requests waiting on the answer to `srv-1`.
    let asks: Arc<Mutex<HashMap<String, Value>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("mock-backend: ready (pid {})", std::process::id());

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock-backend: unparseable input");
            continue;
        };
        let id = message.get("id").cloned();
        let method = message.get("method").and_then(Value::as_str).map(str::to_string);

        let Some(method) = method else {
            // A reply to one of our server requests.
            if let Some(Value::String(server_id)) = &id {
                if let Some(ask_id) = asks.lock().await.remove(server_id) {
                    let answer = message.get("result").cloned().unwrap_or(Value::Null);
                    send(&out_tx, json!({ "jsonrpc": "2.0", "id": ask_id, "result": { "answer": answer } }));
                }
            }
            continue;
        };
        let Some(id) = id else {
            // Client notification.
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method.as_str() {
            "initialize" => reply(&out_tx, id, json!({
                "protocolVersion": "2025-03-26",
                "serverInfo": { "name": "mock-backend", "version": "0.1.0" },
                "capabilities": {}
            })),
            "ping" => reply(&out_tx, id, json!("pong")),
            "echo" => reply(&out_tx, id, params),
            "whoami" => reply(&out_tx, id, json!({ "pid": std::process::id() })),
            "sleep" => {
                let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(100);
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    reply(&out_tx, id, json!({ "slept": ms }));
                });
            }
            "crash" => {
                eprintln!("mock-backend: crashing on request");
                std::process::exit(3);
            }
            "notify" => {
                send(&out_tx, json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": { "level": "info", "data": params }
                }));
                reply(&out_tx, id, json!("notified"));
            }
            "garbage" => {
                let _ = out_tx.send("this is not json".to_string());
                reply(&out_tx, id, json!("after garbage"));
            }
            "ask" => {
                asks.lock().await.insert("srv-1".to_string(), id);
                send(&out_tx, json!({
                    "jsonrpc": "2.0",
                    "id": "srv-1",
                    "method": "sampling/createMessage",
                    "params": params
                }));
            }
            other => send(&out_tx, json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {}", other) }
            })),
        }
    }

    drop(out_tx);
    let _ = writer.await;
}

fn reply(out: &mpsc::UnboundedSender<String>, id: Value, result: Value) {
    send(out, json!({ "jsonrpc": "2.0", "id": id, "result": result }));
}

fn send(out: &mpsc::UnboundedSender<String>, message: Value) {
    let _ = out.send(message.to_string());
}
