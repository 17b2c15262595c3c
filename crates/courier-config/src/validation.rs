// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as non-zero concurrency, ratio bounds, and URL schemes.

use crate::diagnostic::ConfigError;
use crate::model::{CourierConfig, QueueSettings};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &CourierConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        fail(format!(
            "logging.level `{}` must be one of {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        ));
    }

    let host = config.server.host.trim();
    if host.is_empty() {
        fail("server.host must not be empty".to_string());
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        fail(format!(
            "server.host `{host}` is not a valid IP address or hostname"
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let sessions = &config.sessions;
    if sessions.auth_dir.trim().is_empty() {
        fail("sessions.auth_dir must not be empty".to_string());
    }
    if sessions.max_accounts == 0 {
        fail("sessions.max_accounts must be at least 1".to_string());
    }
    if sessions.connect_timeout_secs == 0 {
        fail("sessions.connect_timeout_secs must be at least 1".to_string());
    }
    if sessions.message_cache_size == 0 {
        fail("sessions.message_cache_size must be at least 1".to_string());
    }
    if sessions.history_autosave_secs == 0 {
        fail("sessions.history_autosave_secs must be at least 1".to_string());
    }
    if sessions.max_reconnect_delay_ms < sessions.reconnect_delay_ms {
        fail(format!(
            "sessions.max_reconnect_delay_ms ({}) must not be below sessions.reconnect_delay_ms ({})",
            sessions.max_reconnect_delay_ms, sessions.reconnect_delay_ms
        ));
    }
    if sessions.event_bus_capacity == 0 {
        fail("sessions.event_bus_capacity must be at least 1".to_string());
    }

    for (name, settings) in [
        ("inbound", &config.queue.inbound),
        ("outbound", &config.queue.outbound),
    ] {
        for message in queue_settings_errors(name, settings) {
            fail(message);
        }
    }
    if config.queue.poll_interval_ms == 0 {
        fail("queue.poll_interval_ms must be at least 1".to_string());
    }

    let ratio = config.health.min_connected_ratio;
    if !(0.0..=1.0).contains(&ratio) {
        fail(format!(
            "health.min_connected_ratio must be between 0 and 1, got {ratio}"
        ));
    }
    if config.health.interval_secs == 0 {
        fail("health.interval_secs must be at least 1".to_string());
    }

    if config.send.timeout_secs == 0 {
        fail("send.timeout_secs must be at least 1".to_string());
    }

    let url = config.bridge.url.trim();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        fail(format!("bridge.url `{url}` must start with ws:// or wss://"));
    }
    if config.bridge.event_buffer == 0 {
        fail("bridge.event_buffer must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn queue_settings_errors(name: &str, settings: &QueueSettings) -> Vec<String> {
    let mut out = Vec::new();
    if settings.concurrency == 0 {
        out.push(format!("queue.{name}.concurrency must be at least 1"));
    }
    if settings.rate_limit.max == 0 {
        out.push(format!("queue.{name}.rate_limit.max must be at least 1"));
    }
    if settings.rate_limit.window_ms == 0 {
        out.push(format!("queue.{name}.rate_limit.window_ms must be at least 1"));
    }
    if settings.attempts == 0 {
        out.push(format!("queue.{name}.attempts must be at least 1"));
    }
    out
}
