// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Courier session gateway.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Courier configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP surface settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite job store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Connection manager settings.
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Inbound and outbound queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Health probe thresholds and schedule.
    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub send: SendConfig,

    /// Protocol sidecar connection settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Whether `courier serve` starts the HTTP listener.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3100
}

fn default_true() -> bool {
    true
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file holding the job tables.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn data_path(file: &str) -> String {
    dirs::data_dir()
        .map(|p| p.join("courier").join(file))
        .unwrap_or_else(|| std::path::PathBuf::from(file))
        .to_string_lossy()
        .into_owned()
}

fn default_database_path() -> String {
    data_path("courier.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Connection manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Root directory for per-account credential and history files.
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,

    /// Maximum number of accounts held in the connection pool.
    #[serde(default = "default_max_accounts")]
    pub max_accounts: usize,

    /// How long `connect` waits for the first QR challenge or open event.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Automatic reconnects allowed since the last successful connection.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay before the first reconnect, doubled on each further attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Recent messages kept per account.
    #[serde(default = "default_message_cache_size")]
    pub message_cache_size: usize,

    #[serde(default = "default_history_autosave_secs")]
    pub history_autosave_secs: u64,

    #[serde(default = "default_group_cache_ttl_secs")]
    pub group_cache_ttl_secs: u64,

    #[serde(default = "default_group_cache_size")]
    pub group_cache_size: usize,

    /// Upper bound for closing one session during shutdown.
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Reconnect every account with stored credentials at startup.
    #[serde(default = "default_true")]
    pub restore_on_start: bool,

    /// Capacity of the domain event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_dir: default_auth_dir(),
            max_accounts: default_max_accounts(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            message_cache_size: default_message_cache_size(),
            history_autosave_secs: default_history_autosave_secs(),
            group_cache_ttl_secs: default_group_cache_ttl_secs(),
            group_cache_size: default_group_cache_size(),
            close_timeout_secs: default_close_timeout_secs(),
            restore_on_start: true,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

fn default_auth_dir() -> String {
    data_path("sessions")
}

fn default_max_accounts() -> usize {
    500
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_max_reconnect_delay_ms() -> u64 {
    60_000
}

fn default_message_cache_size() -> usize {
    1000
}

fn default_history_autosave_secs() -> u64 {
    10
}

fn default_group_cache_ttl_secs() -> u64 {
    300
}

fn default_group_cache_size() -> usize {
    1000
}

fn default_close_timeout_secs() -> u64 {
    5
}

fn default_event_bus_capacity() -> usize {
    1024
}

/// Rolling-window limit on job starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Jobs allowed to start within one window.
    pub max: u32,
    pub window_ms: u64,
}

/// Settings for one queue direction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    /// Jobs processed at once.
    pub concurrency: usize,
    pub rate_limit: RateLimitConfig,
    /// Total tries per job before it moves to the failed set.
    pub attempts: u32,
    /// Base retry delay, doubled per attempt.
    pub backoff_ms: u64,
}

impl QueueSettings {
    pub fn inbound() -> Self {
        Self {
            concurrency: 10,
            rate_limit: RateLimitConfig {
                max: 100,
                window_ms: 1000,
            },
            attempts: 3,
            backoff_ms: 2000,
        }
    }

    pub fn outbound() -> Self {
        Self {
            concurrency: 5,
            rate_limit: RateLimitConfig {
                max: 20,
                window_ms: 1000,
            },
            attempts: 3,
            backoff_ms: 5000,
        }
    }
}

/// Message queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "QueueSettings::inbound")]
    pub inbound: QueueSettings,

    #[serde(default = "QueueSettings::outbound")]
    pub outbound: QueueSettings,

    /// Completed jobs retained per queue; older ones are pruned.
    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,

    /// Upper bound on how long an idle worker sleeps before re-checking the store.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long shutdown waits for in-flight jobs.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inbound: QueueSettings::inbound(),
            outbound: QueueSettings::outbound(),
            keep_completed: default_keep_completed(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_keep_completed() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

/// Health and recovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Run the periodic probe loop.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    /// Connected/total ratio below which the connection probe is degraded.
    #[serde(default = "default_min_connected_ratio")]
    pub min_connected_ratio: f64,

    #[serde(default = "default_job_threshold")]
    pub max_failed_jobs: u64,

    #[serde(default = "default_job_threshold")]
    pub max_active_jobs: u64,

    /// Attempt recovery automatically when a probe round is not healthy.
    /// Off by default; recovery is otherwise triggered through the API.
    #[serde(default)]
    pub auto_recover: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval_secs(),
            min_connected_ratio: default_min_connected_ratio(),
            max_failed_jobs: default_job_threshold(),
            max_active_jobs: default_job_threshold(),
            auto_recover: false,
        }
    }
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_min_connected_ratio() -> f64 {
    0.5
}

fn default_job_threshold() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendConfig {
    /// How long send operations wait for the outbound job to finish.
    #[serde(default = "default_send_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_send_timeout_secs(),
        }
    }
}

fn default_send_timeout_secs() -> u64 {
    30
}

/// Protocol sidecar configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// WebSocket base URL; one socket per account is opened at `<url>/sessions/<accountId>`.
    #[serde(default = "default_bridge_url")]
    pub url: String,

    #[serde(default = "default_bridge_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_bridge_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Capacity of the per-account raw event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            connect_timeout_secs: default_bridge_connect_timeout_secs(),
            request_timeout_secs: default_bridge_request_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:8787".to_string()
}

fn default_bridge_connect_timeout_secs() -> u64 {
    10
}

fn default_bridge_request_timeout_secs() -> u64 {
    15
}

fn default_event_buffer() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CourierConfig::default();
        assert_eq!(config.sessions.max_reconnect_attempts, 5);
        assert_eq!(config.sessions.message_cache_size, 1000);
        assert_eq!(config.health.interval_secs, 30);
        assert_eq!(config.health.min_connected_ratio, 0.5);
        assert_eq!(config.health.max_failed_jobs, 100);
        assert_eq!(config.health.max_active_jobs, 100);
        assert_eq!(config.send.timeout_secs, 30);
        assert_eq!(config.queue.outbound.attempts, 3);
    }

    #[test]
    fn partial_queue_section_keeps_other_direction() {
        let config: CourierConfig = toml::from_str(
            r#"
[queue.outbound]
concurrency = 2
rate_limit = { max = 5, window_ms = 2000 }
attempts = 4
backoff_ms = 100
"#,
        )
        .unwrap();
        assert_eq!(config.queue.outbound.concurrency, 2);
        assert_eq!(config.queue.outbound.rate_limit.window_ms, 2000);
        assert_eq!(config.queue.inbound, QueueSettings::inbound());
    }

    #[test]
    fn unknown_queue_key_is_rejected() {
        let result: Result<CourierConfig, _> = toml::from_str(
            r#"
[queue]
keep_complete = 10
"#,
        );
        assert!(result.is_err());
    }
}
