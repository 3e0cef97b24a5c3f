//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use stdio_bridge::config::BridgeConfig;
use stdio_bridge::lifecycle::{launch, RunningBridge};
use stdio_bridge::Result;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shell command that runs the scripted mock backend.
pub fn mock_backend_command() -> String {
    let path = env!("CARGO_BIN_EXE_mock-backend");
    shlex::try_quote(path).unwrap().into_owned()
}

/// Config tuned for fast tests: loopback, short delays.
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.server.name = "test".to_string();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.keep_alive_secs = 1;
    config.backend.command = mock_backend_command();
    config.backend.ready_delay_ms = 50;
    config.backend.stop_grace_ms = 500;
    config.restart.base_delay_ms = 50;
    config.restart.max_delay_ms = 200;
    config.sessions.sweep_interval_ms = 50;
    config.timeouts.drain_ms = 1000;
    config
}

pub async fn try_start(config: BridgeConfig) -> Result<TestBridge> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let running = launch(config, listener).await?;
    let base = format!("http://{}", running.local_addr());
    let client = reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap();
    Ok(TestBridge {
        running,
        client,
        base,
    })
}

pub async fn start(config: BridgeConfig) -> TestBridge {
    try_start(config).await.unwrap()
}

pub struct TestBridge {
    pub running: RunningBridge,
    pub client: reqwest::Client,
    pub base: String,
}

impl TestBridge {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// POST a raw body, optionally on a session.
    pub async fn post_raw(&self, session: Option<&str>, body: String) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/mcp"))
            .header("content-type", "application/json")
            .body(body);
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        request.send().await.unwrap()
    }

    pub async fn post(&self, session: Option<&str>, message: Value) -> reqwest::Response {
        self.post_raw(session, message.to_string()).await
    }

    pub async fn request(&self, session: &str, id: Value, method: &str, params: Value) -> reqwest::Response {
        self.post(
            Some(session),
            json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }),
        )
        .await
    }

    /// Open a session with `initialize` and return its token.
    pub async fn initialize(&self, id: Value) -> String {
        let response = self
            .post(
                None,
                json!({ "jsonrpc": "2.0", "id": id, "method": "initialize", "params": {} }),
            )
            .await;
        assert_eq!(response.status(), 202);
        response
            .headers()
            .get(SESSION_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    pub async fn open_stream(&self, session: &str) -> SseStream {
        let response = self
            .client
            .get(self.url("/mcp"))
            .header(SESSION_HEADER, session)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        SseStream::new(response)
    }

    pub async fn health(&self) -> (u16, Value) {
        let response = self.client.get(self.url("/health")).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    /// Poll `/health` until it reports `status`.
    pub async fn wait_for_health(&self, status: u16, timeout: Duration) -> Value {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (current, body) = self.health().await;
            if current == status {
                return body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "health stayed {} ({})",
                current,
                body
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub async fn shutdown(self) {
        self.running.shutdown().await;
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Minimal Server-Sent-Events reader yielding the `data` of `message` events.
pub struct SseStream {
    body: ByteStream,
    buffer: String,
}

impl SseStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            body: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    /// Next message, or `None` when the stream ended.
    pub async fn next(&mut self, timeout: Duration) -> Option<Value> {
        tokio::time::timeout(timeout, self.next_inner())
            .await
            .expect("timed out waiting for SSE message")
    }

    async fn next_inner(&mut self) -> Option<Value> {
        loop {
            if let Some(value) = self.take_event() {
                return Some(value);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                _ => return None,
            }
        }
    }

    /// Pop one complete event with data from the buffer.
    fn take_event(&mut self) -> Option<Value> {
        loop {
            let end = self.buffer.find("\n\n")?;
            let block: String = self.buffer.drain(..end + 2).collect();
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            if data.is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&data.join("\n")).unwrap());
        }
    }

    /// Collect messages until one matches `pred`.
    pub async fn until(&mut self, timeout: Duration, pred: impl Fn(&Value) -> bool) -> Value {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let value = self.next(remaining).await.expect("stream ended");
            if pred(&value) {
                return value;
            }
        }
    }
}

pub const WAIT: Duration = Duration::from_secs(5);
