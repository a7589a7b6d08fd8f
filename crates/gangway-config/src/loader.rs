// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./gangway.toml` > `~/.config/gangway/gangway.toml` > `/etc/gangway/gangway.toml`
//! with environment variable overrides via `GANGWAY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::GangwayConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/gangway/gangway.toml` (system-wide)
/// 3. `~/.config/gangway/gangway.toml` (user XDG config)
/// 4. `./gangway.toml` (local directory)
/// 5. `GANGWAY_*` environment variables
pub fn load_config() -> Result<GangwayConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<GangwayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(GangwayConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<GangwayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(GangwayConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(GangwayConfig::default()))
        .merge(Toml::file("/etc/gangway/gangway.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("gangway/gangway.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("gangway.toml"))
        .merge(env_provider())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names. For example, `GANGWAY_SESSIONS_MAX_SESSIONS`
/// must map to `sessions.max_sessions`, not `sessions.max.sessions`.
fn env_provider() -> Env {
    Env::prefixed("GANGWAY_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: GANGWAY_PROVIDER_MODEL -> "provider_model"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("gateway_", "gateway.", 1)
            .replacen("provider_", "provider.", 1)
            .replacen("sessions_", "sessions.", 1)
            .replacen("safety_", "safety.", 1)
            .replacen("limits_", "limits.", 1)
            .replacen("cron_", "cron.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn load_from_str_merges_defaults() {
        let config = load_config_from_str(
            r#"
[gateway]
name = "gatebot"
"#,
        )
        .unwrap();
        assert_eq!(config.gateway.name, "gatebot");
        // Untouched sections keep their defaults.
        assert_eq!(config.sessions.max_sessions, 100);
    }

    #[test]
    fn load_from_str_rejects_unknown_section_key() {
        let result = load_config_from_str(
            r#"
[sessions]
max_sesions = 5
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn env_override_maps_sections() {
        unsafe { std::env::set_var("GANGWAY_PROVIDER_MODEL", "claude-haiku-4") };
        let config: GangwayConfig = build_figment().extract().unwrap();
        assert_eq!(config.provider.model, "claude-haiku-4");
        unsafe { std::env::remove_var("GANGWAY_PROVIDER_MODEL") };
    }

    #[test]
    #[serial]
    fn env_override_handles_underscore_keys() {
        unsafe { std::env::set_var("GANGWAY_SESSIONS_MAX_SESSIONS", "7") };
        let config: GangwayConfig = build_figment().extract().unwrap();
        assert_eq!(config.sessions.max_sessions, 7);
        unsafe { std::env::remove_var("GANGWAY_SESSIONS_MAX_SESSIONS") };
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gangway.toml");
        std::fs::write(&path, "[cron]\nfile = \"jobs.yaml\"\n").unwrap();
        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.cron.file, "jobs.yaml");
    }
}
