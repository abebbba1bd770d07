//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Fail fast when the upstream origin is missing
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
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

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_upstream_base(&config.upstream.base_url, &mut errors);

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    for (field, value) in [
        ("upstream.connect_timeout_secs", config.upstream.connect_timeout_secs),
        ("upstream.response_timeout_secs", config.upstream.response_timeout_secs),
        ("timeouts.read_secs", config.timeouts.read_secs),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if config.timeouts.stream_deadline_secs == Some(0) {
        errors.push(ValidationError::new(
            "timeouts.stream_deadline_secs",
            "must be greater than 0 when set",
        ));
    }

    if config.transcoder.program.trim().is_empty() {
        errors.push(ValidationError::new("transcoder.program", "must not be empty"));
    }
    if config.transcoder.output_chunk_size == 0 {
        errors.push(ValidationError::new("transcoder.output_chunk_size", "must be greater than 0"));
    }
    if config.transcoder.output_queue_depth == 0 {
        errors.push(ValidationError::new("transcoder.output_queue_depth", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_upstream_base(base: &str, errors: &mut Vec<ValidationError>) {
    const FIELD: &str = "upstream.base_url";

    if base.is_empty() {
        errors.push(ValidationError::new(
            FIELD,
            "is not set; pass --upstream, set REMOTE_HOST, or configure [upstream] base_url",
        ));
        return;
    }

    match Url::parse(base) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            if url.query().is_some() || url.fragment().is_some() {
                errors.push(ValidationError::new(FIELD, "must not carry a query or fragment"));
            }
        }
        Ok(url) => errors.push(ValidationError::new(
            FIELD,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(FIELD, format!("'{}' is not a URL: {}", base, e))),
    }

    // Request paths always start with '/', so the base must not end with one.
    if base.ends_with('/') {
        errors.push(ValidationError::new(FIELD, "must not end with '/'"));
    }
}
