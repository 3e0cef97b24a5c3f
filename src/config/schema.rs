//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// HTTP listener and transport settings.
    pub server: ServerConfig,

    /// Backend process definition.
    pub backend: BackendConfig,

    /// Session registry settings.
    pub sessions: SessionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Restart policy for the backend process.
    pub restart: RestartConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name reported in logs and on `/health`.
    pub name: String,

    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Path of the streaming endpoint.
    pub path: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,

    /// How long a submit may wait for room on the backend writer queue.
    pub submit_timeout_secs: u64,

    /// Interval between keep-alive comments on open streams.
    pub keep_alive_secs: u64,
}

impl ServerConfig {
    /// `host:port`, bracketing IPv6 literals.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "ProxyServer".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            path: "/mcp".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
            submit_timeout_secs: 30,
            keep_alive_secs: 15,
        }
    }
}

/// Backend process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Shell-syntax command line (e.g., "uvx mcp-server-time").
    pub command: String,

    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,

    /// Give the child a private scratch directory as `TMPDIR`.
    pub isolate_tmpdir: bool,

    /// How long the child must stay alive after spawn to count as started.
    pub ready_delay_ms: u64,

    /// Grace period for each termination step (stdin close, SIGTERM).
    pub stop_grace_ms: u64,

    /// Capacity of the stdin writer queue.
    pub writer_queue: usize,

    /// Longest accepted stdout line.
    pub max_line_bytes: usize,

    /// Consecutive malformed lines tolerated before the child is restarted.
    pub max_consecutive_parse_errors: u32,
}

impl BackendConfig {
    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            env: BTreeMap::new(),
            working_dir: None,
            isolate_tmpdir: true,
            ready_delay_ms: 100,
            stop_grace_ms: 2_000,
            writer_queue: 64,
            max_line_bytes: 16 * 1024 * 1024,
            max_consecutive_parse_errors: 16,
        }
    }
}

/// Session registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions without an attached stream are expired after this long.
    pub idle_timeout_ms: u64,

    /// Maximum queued notifications per session.
    pub queue_capacity: usize,

    /// Interval of the idle-session and request-timeout sweep.
    pub sweep_interval_ms: u64,

    /// Method that may open a session when no session header is present.
    /// `None` or `"*"` lets any request open one.
    pub open_method: Option<String>,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30 * 60 * 1_000,
            queue_capacity: 256,
            sweep_interval_ms: 1_000,
            open_method: Some("initialize".to_string()),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// A request with no backend reply after this long fails.
    pub request_ms: u64,

    /// Upper bound on waiting for in-flight requests during shutdown.
    pub drain_ms: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 120_000,
            drain_ms: 10_000,
        }
    }
}

/// Backend restart policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Restart attempts before the proxy gives up.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Uptime after which the attempt counter resets.
    pub stable_after_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
            stable_after_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.name, "ProxyServer");
        assert_eq!(config.server.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.server.path, "/mcp");
        assert_eq!(config.sessions.open_method.as_deref(), Some("initialize"));
    }

    #[test]
    fn test_ipv6_bind_address() {
        let server = ServerConfig {
            host: "::1".into(),
            port: 8080,
            ..ServerConfig::default()
        };
        assert_eq!(server.bind_address(), "[::1]:8080");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [backend]
            command = "uvx mcp-server-time"

            [backend.env]
            TZ = "Europe/Vienna"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.command, "uvx mcp-server-time");
        assert_eq!(config.backend.env.get("TZ").map(String::as_str), Some("Europe/Vienna"));
        assert_eq!(config.backend.stop_grace_ms, 2_000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.restart.max_attempts, 5);
    }
}
