// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./courier.toml` > `~/.config/courier/courier.toml` > `/etc/courier/courier.toml`
//! with environment variable overrides via `COURIER_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::CourierConfig;

pub(crate) const SYSTEM_CONFIG: &str = "/etc/courier/courier.toml";
pub(crate) const LOCAL_CONFIG: &str = "courier.toml";

/// Env key prefixes mapped to their dotted config paths, longest first so
/// `queue_outbound_` wins over `queue_`.
const SECTION_PREFIXES: &[(&str, &str)] = &[
    ("queue_inbound_rate_limit_", "queue.inbound.rate_limit."),
    ("queue_outbound_rate_limit_", "queue.outbound.rate_limit."),
    ("queue_inbound_", "queue.inbound."),
    ("queue_outbound_", "queue.outbound."),
    ("logging_", "logging."),
    ("server_", "server."),
    ("storage_", "storage."),
    ("sessions_", "sessions."),
    ("queue_", "queue."),
    ("health_", "health."),
    ("send_", "send."),
    ("bridge_", "bridge."),
];

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("courier/courier.toml"))
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/courier/courier.toml` (system-wide)
/// 3. `~/.config/courier/courier.toml` (user XDG config)
/// 4. `./courier.toml` (local directory)
/// 5. `COURIER_*` environment variables
pub fn load_config() -> Result<CourierConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<CourierConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CourierConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CourierConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CourierConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(CourierConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// Maps a lowercased, prefix-stripped env key to its dotted config path.
///
/// Explicit section mapping instead of `Env::split("_")`, since key names
/// contain underscores: `COURIER_SESSIONS_MAX_ACCOUNTS` must become
/// `sessions.max_accounts`, not `sessions.max.accounts`.
pub fn map_env_key(key: &str) -> String {
    SECTION_PREFIXES
        .iter()
        .find_map(|(prefix, dotted)| {
            key.strip_prefix(prefix)
                .map(|rest| format!("{dotted}{rest}"))
        })
        .unwrap_or_else(|| key.to_string())
}

fn env_provider() -> Env {
    Env::prefixed("COURIER_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("server_port"), "server.port");
        assert_eq!(map_env_key("sessions_max_accounts"), "sessions.max_accounts");
        assert_eq!(map_env_key("queue_keep_completed"), "queue.keep_completed");
        assert_eq!(
            map_env_key("queue_outbound_concurrency"),
            "queue.outbound.concurrency"
        );
        assert_eq!(
            map_env_key("queue_inbound_rate_limit_window_ms"),
            "queue.inbound.rate_limit.window_ms"
        );
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }

    #[test]
    fn env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[server]\nport = 4000\n")?;
            jail.set_env("COURIER_SERVER_PORT", "4100");
            jail.set_env("COURIER_QUEUE_OUTBOUND_ATTEMPTS", "7");
            let config = load_config_from_path(Path::new("custom.toml"))?;
            assert_eq!(config.server.port, 4100);
            assert_eq!(config.queue.outbound.attempts, 7);
            assert_eq!(config.queue.outbound.concurrency, 5);
            Ok(())
        });
    }
}
