// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Gangway gateway.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Gangway configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GangwayConfig {
    /// Gateway identity and behavior settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider selection and model settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Session management settings.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Tool-input safety settings.
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Inbound request rate limiting.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Cron scheduler settings.
    #[serde(default)]
    pub cron: CronConfig,
}

/// Gateway identity and behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Service name. Used for the /tmp hand-off file prefix and workdir
    /// alias isolation.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Tenant id stamped onto routes derived from inbound chat messages.
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Chat id of the primary allowed user, for boot/shutdown and cron
    /// notifications. `None` disables those notifications.
    #[serde(default)]
    pub primary_chat_id: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            tenant: default_tenant(),
            primary_chat_id: None,
        }
    }
}

fn default_service_name() -> String {
    "gangway".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tenant() -> String {
    "default".to_string()
}

/// Provider selection and model configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Id of the primary provider backend.
    #[serde(default = "default_primary_provider")]
    pub primary: String,

    /// Optional fallback backend used after the primary fails permanently.
    #[serde(default)]
    pub fallback: Option<String>,

    /// Default model for general queries.
    #[serde(default = "default_model")]
    pub model: String,

    /// Model override for summarization queries. Falls back to `model`.
    #[serde(default)]
    pub summary_model: Option<String>,

    /// Model override for cron queries. Falls back to `model`.
    #[serde(default)]
    pub cron_model: Option<String>,

    /// Thinking-token budget passed to the backend.
    #[serde(default)]
    pub max_thinking_tokens: Option<u32>,

    /// Substring of a provider failure that marks the stored provider
    /// session id as stale upstream. Triggers one reset-and-retry.
    #[serde(default = "default_stale_session_marker")]
    pub stale_session_marker: String,

    /// Inline JSON map of per-provider retry policies:
    /// `{"<provider-id>": {"max_retries": 2, "base_backoff_ms": 500}}`.
    #[serde(default)]
    pub retry_policies: Option<String>,

    /// Explicit path to the provider executable, when the backend shells
    /// out to one.
    #[serde(default)]
    pub path_to_executable: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_provider(),
            fallback: None,
            model: default_model(),
            summary_model: None,
            cron_model: None,
            max_thinking_tokens: None,
            stale_session_marker: default_stale_session_marker(),
            retry_policies: None,
            path_to_executable: None,
        }
    }
}

fn default_primary_provider() -> String {
    "claude-agent".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_stale_session_marker() -> String {
    "No conversation found".to_string()
}

/// Session management configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsConfig {
    /// Directory for flat-file state (session snapshots, pending forms).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Canonical working directory handed to the provider.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Root under which per-thread workdir alias symlinks are created.
    #[serde(default = "default_alias_root")]
    pub workdir_alias_root: String,

    /// Maximum number of resident sessions (LRU beyond this).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle session eviction threshold in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Assumed context-window size until the provider reports one.
    #[serde(default = "default_context_window")]
    pub context_window: u64,

    /// Queries to suppress re-warning after a context restore.
    #[serde(default = "default_warning_cooldown")]
    pub warning_cooldown_queries: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            working_dir: default_working_dir(),
            workdir_alias_root: default_alias_root(),
            max_sessions: default_max_sessions(),
            ttl_hours: default_ttl_hours(),
            context_window: default_context_window(),
            warning_cooldown_queries: default_warning_cooldown(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_working_dir() -> String {
    ".".to_string()
}

fn default_alias_root() -> String {
    "/tmp/gangway-workdirs".to_string()
}

fn default_max_sessions() -> usize {
    100
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_context_window() -> u64 {
    200_000
}

fn default_warning_cooldown() -> u32 {
    50
}

/// Tool-input safety configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// Directories tools may touch, in addition to the working directory.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

/// Inbound request rate limiting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Requests allowed per window.
    #[serde(default = "default_rate_requests")]
    pub requests: u32,

    /// Window length in seconds.
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_requests(),
            window_secs: default_rate_window_secs(),
        }
    }
}

fn default_rate_requests() -> u32 {
    20
}

fn default_rate_window_secs() -> u64 {
    60
}

/// Cron scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CronConfig {
    /// Schedule file path, relative to the working directory.
    #[serde(default = "default_cron_file")]
    pub file: String,

    /// Maximum allowed prompt length per schedule.
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,

    /// Executions allowed within any rolling hour.
    #[serde(default = "default_max_jobs_per_hour")]
    pub max_jobs_per_hour: usize,

    /// Pending queue capacity (head-drop beyond this).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Queue drain tick in seconds.
    #[serde(default = "default_drain_tick_secs")]
    pub drain_tick_secs: u64,

    /// Schedule file mtime poll interval in seconds.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// Reload debounce in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Directories a schedule file may live in. Empty means only the
    /// working directory.
    #[serde(default)]
    pub allowed_config_dirs: Vec<String>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            file: default_cron_file(),
            max_prompt_length: default_max_prompt_length(),
            max_jobs_per_hour: default_max_jobs_per_hour(),
            queue_capacity: default_queue_capacity(),
            drain_tick_secs: default_drain_tick_secs(),
            poll_secs: default_poll_secs(),
            debounce_ms: default_debounce_ms(),
            allowed_config_dirs: Vec::new(),
        }
    }
}

fn default_cron_file() -> String {
    "cron.yaml".to_string()
}

fn default_max_prompt_length() -> usize {
    10_000
}

fn default_max_jobs_per_hour() -> usize {
    60
}

fn default_queue_capacity() -> usize {
    100
}

fn default_drain_tick_secs() -> u64 {
    2
}

fn default_poll_secs() -> u64 {
    2
}

fn default_debounce_ms() -> u64 {
    100
}
