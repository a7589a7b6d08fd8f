// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-provider retry policy and transient error classification.
//!
//! The policy table is loaded from a process-wide JSON map keyed by
//! provider id. Classification drives retry-vs-fallback only; the rest of
//! the core depends on the transient/permanent distinction, not on the
//! taxonomy.

use std::collections::HashMap;
use std::time::Duration;

use gangway_core::GangwayError;
use serde::{Deserialize, Serialize};

/// Retry posture for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_backoff_ms() -> u64 {
    500
}

impl RetryPolicy {
    /// Exponential backoff before retry `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Provider-id keyed policy map with a default for unlisted providers.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, RetryPolicy>,
}

impl PolicyTable {
    /// Parses the process-wide JSON map:
    /// `{"claude-agent": {"max_retries": 3, "base_backoff_ms": 250}}`.
    pub fn from_json(json: &str) -> Result<Self, GangwayError> {
        let policies: HashMap<String, RetryPolicy> = serde_json::from_str(json)
            .map_err(|e| GangwayError::Config(format!("invalid retry policy map: {e}")))?;
        Ok(Self { policies })
    }

    pub fn for_provider(&self, provider_id: &str) -> RetryPolicy {
        self.policies
            .get(provider_id)
            .copied()
            .unwrap_or_default()
    }
}

/// Failure classes the orchestrator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimit,
    Network,
    TransientServer,
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// Classifies a provider failure for retry purposes.
pub fn classify(error: &GangwayError) -> ErrorClass {
    match error {
        GangwayError::Timeout { .. } => ErrorClass::Network,
        GangwayError::Provider { message, .. } => {
            let msg = message.to_lowercase();
            if msg.contains("rate limit")
                || msg.contains("429")
                || msg.contains("overloaded")
                || msg.contains("529")
            {
                ErrorClass::RateLimit
            } else if msg.contains("connection")
                || msg.contains("network")
                || msg.contains("timed out")
                || msg.contains("timeout")
                || msg.contains("dns")
            {
                ErrorClass::Network
            } else if msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("internal server")
            {
                ErrorClass::TransientServer
            } else {
                ErrorClass::Permanent
            }
        }
        _ => ErrorClass::Permanent,
    }
}
