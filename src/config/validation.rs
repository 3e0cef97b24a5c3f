//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacities > 0)
//! - Check that the backend command splits into an argv
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::backend::CommandSpec;
use crate::config::schema::BridgeConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = CommandSpec::parse(&config.backend.command) {
        errors.push(ValidationError::new("backend.command", e.to_string()));
    }
    if config.server.name.trim().is_empty() {
        errors.push(ValidationError::new("server.name", "must not be empty"));
    }
    if !config.server.path.starts_with('/') {
        errors.push(ValidationError::new("server.path", "must start with '/'"));
    }
    if config.server.path == "/health" {
        errors.push(ValidationError::new("server.path", "'/health' is reserved"));
    }
    if config.server.max_body_bytes == 0 {
        errors.push(ValidationError::new("server.max_body_bytes", "must be > 0"));
    }
    if config.server.submit_timeout_secs == 0 {
        errors.push(ValidationError::new("server.submit_timeout_secs", "must be > 0"));
    }
    if config.backend.writer_queue == 0 {
        errors.push(ValidationError::new("backend.writer_queue", "must be > 0"));
    }
    if config.backend.max_line_bytes == 0 {
        errors.push(ValidationError::new("backend.max_line_bytes", "must be > 0"));
    }
    if config.backend.max_consecutive_parse_errors == 0 {
        errors.push(ValidationError::new(
            "backend.max_consecutive_parse_errors",
            "must be > 0",
        ));
    }
    if config.sessions.queue_capacity == 0 {
        errors.push(ValidationError::new("sessions.queue_capacity", "must be > 0"));
    }
    if config.sessions.idle_timeout_ms == 0 {
        errors.push(ValidationError::new("sessions.idle_timeout_ms", "must be > 0"));
    }
    if config.sessions.sweep_interval_ms == 0 {
        errors.push(ValidationError::new("sessions.sweep_interval_ms", "must be > 0"));
    }
    if matches!(config.sessions.open_method.as_deref(), Some(m) if m.trim().is_empty()) {
        errors.push(ValidationError::new(
            "sessions.open_method",
            "must not be empty when set",
        ));
    }
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be > 0"));
    }
    if config.restart.base_delay_ms > config.restart.max_delay_ms {
        errors.push(ValidationError::new(
            "restart.base_delay_ms",
            "must not exceed restart.max_delay_ms",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
