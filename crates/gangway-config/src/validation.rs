// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as non-empty names and positive caps.

use thiserror::Error;

use crate::model::GangwayConfig;

/// A configuration validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment deserialization failed.
    #[error("{0}")]
    Load(#[from] Box<figment::Error>),

    /// A semantic constraint on a config value failed.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &GangwayConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let mut require = |ok: bool, message: String| {
        if !ok {
            errors.push(ConfigError::Validation { message });
        }
    };

    require(
        !config.gateway.name.trim().is_empty(),
        "gateway.name must not be empty".to_string(),
    );
    require(
        !config.gateway.tenant.trim().is_empty()
            && !config.gateway.tenant.contains(':')
            && !config.gateway.tenant.contains('/'),
        format!(
            "gateway.tenant `{}` must be non-empty and free of ':' and '/'",
            config.gateway.tenant
        ),
    );
    require(
        config.sessions.max_sessions > 0,
        "sessions.max_sessions must be positive".to_string(),
    );
    require(
        config.sessions.context_window > 0,
        "sessions.context_window must be positive".to_string(),
    );
    require(
        config.sessions.ttl_hours > 0,
        "sessions.ttl_hours must be positive".to_string(),
    );
    require(
        config.limits.requests > 0 && config.limits.window_secs > 0,
        "limits.requests and limits.window_secs must be positive".to_string(),
    );
    require(
        config.cron.max_prompt_length > 0,
        "cron.max_prompt_length must be positive".to_string(),
    );
    require(
        config.cron.max_jobs_per_hour > 0,
        "cron.max_jobs_per_hour must be positive".to_string(),
    );
    require(
        !config.provider.primary.trim().is_empty(),
        "provider.primary must not be empty".to_string(),
    );
    if let Some(ref fallback) = config.provider.fallback {
        require(
            fallback != &config.provider.primary,
            "provider.fallback must differ from provider.primary".to_string(),
        );
    }
    if let Some(ref policies) = config.provider.retry_policies {
        require(
            serde_json::from_str::<serde_json::Value>(policies).is_ok(),
            "provider.retry_policies must be a valid JSON object".to_string(),
        );
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Load from the standard hierarchy and validate in one step.
pub fn load_and_validate() -> Result<GangwayConfig, Vec<ConfigError>> {
    let config = crate::loader::load_config()
        .map_err(|e| vec![ConfigError::Load(Box::new(e))])?;
    validate_config(&config)?;
    Ok(config)
}

/// Render validation errors to stderr, one per line.
pub fn render_errors(errors: &[ConfigError]) {
    for error in errors {
        eprintln!("gangway: config error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = GangwayConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_gateway_name_fails() {
        let mut config = GangwayConfig::default();
        config.gateway.name = "  ".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("gateway.name"))
        ));
    }

    #[test]
    fn tenant_with_separator_fails() {
        let mut config = GangwayConfig::default();
        config.gateway.tenant = "a:b".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn fallback_equal_to_primary_fails() {
        let mut config = GangwayConfig::default();
        config.provider.fallback = Some(config.provider.primary.clone());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn invalid_retry_policy_json_fails() {
        let mut config = GangwayConfig::default();
        config.provider.retry_policies = Some("not json".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = GangwayConfig::default();
        config.gateway.name = String::new();
        config.sessions.max_sessions = 0;
        config.cron.max_prompt_length = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 3);
    }
}
