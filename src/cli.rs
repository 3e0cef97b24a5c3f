//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{read_config, ConfigError};
use crate::config::validation::validate_config;
use crate::config::BridgeConfig;

#[derive(Debug, Parser)]
#[command(name = "stdio-bridge")]
#[command(about = "Expose a stdio JSON-RPC server as a streaming HTTP endpoint", long_about = None)]
pub struct Cli {
    /// Backend command as a shell string (e.g. "uvx mcp-server-time --local-timezone=Europe/Vienna")
    #[arg(long)]
    pub backend_command: Option<String>,

    /// Display name of the proxy
    #[arg(long)]
    pub server_name: Option<String>,

    /// Bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port
    #[arg(long)]
    pub port: Option<u16>,

    /// TOML file with the remaining settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Merge the optional file with the flags, then validate.
    pub fn into_config(self) -> Result<BridgeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => BridgeConfig::default(),
        };

        if let Some(command) = self.backend_command {
            config.backend.command = command;
        }
        if let Some(name) = self.server_name {
            config.server.name = name;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}
