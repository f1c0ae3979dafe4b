//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, TTL within bounds, buffer sizes)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// Longest hostname lifetime the resolver cache may be configured with.
pub const MAX_RESOLVER_TTL_SECS: u64 = 30;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_ip `{0}` is not an IP address")]
    BindIp(String),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("resolver.ttl_secs must not exceed {MAX_RESOLVER_TTL_SECS} (got {0})")]
    TtlTooLong(u64),

    #[error("client.max_head_bytes ({max_head}) is smaller than client.read_buffer_bytes ({read_buffer})")]
    HeadLimitBelowBuffer { max_head: usize, read_buffer: usize },
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_ip.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::BindIp(config.listener.bind_ip.clone()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let nonzero = [
        ("upstream.port", config.upstream.port as u64),
        ("upstream.read_buffer_bytes", config.upstream.read_buffer_bytes as u64),
        ("client.max_head_bytes", config.client.max_head_bytes as u64),
        ("client.read_buffer_bytes", config.client.read_buffer_bytes as u64),
        ("resolver.ttl_secs", config.resolver.ttl_secs),
        ("resolver.sweep_interval_secs", config.resolver.sweep_interval_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
    ];
    for (field, value) in nonzero {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.resolver.ttl_secs > MAX_RESOLVER_TTL_SECS {
        errors.push(ValidationError::TtlTooLong(config.resolver.ttl_secs));
    }

    if config.client.max_head_bytes < config.client.read_buffer_bytes {
        errors.push(ValidationError::HeadLimitBelowBuffer {
            max_head: config.client.max_head_bytes,
            read_buffer: config.client.read_buffer_bytes,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
