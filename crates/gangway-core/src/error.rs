// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Gangway gateway.

use thiserror::Error;

/// The primary error type used across all Gangway crates.
#[derive(Debug, Error)]
pub enum GangwayError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// A session key string did not parse back into a valid identity.
    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    /// Provider backend errors (transport failure, bad response, model not found).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Session lifecycle errors (concurrent query attempt, restore mismatch).
    #[error("session error: {0}")]
    Session(String),

    /// Steering buffer validation errors (empty content, bad message id).
    #[error("steering error: {0}")]
    Steering(String),

    /// A tool invocation was rejected by safety validation.
    #[error("unsafe tool input: {0}")]
    UnsafeToolInput(String),

    /// A tool tried to touch a path outside the configured allow-list.
    #[error("path outside allow-list: {path}")]
    PathOutsideAllowlist { path: String },

    /// Scheduler errors (bad cron expression, invalid schedule file).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Flat-file persistence errors (snapshot read/write, form store).
    #[error("persistence error: {source}")]
    Persistence {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// A caller-initiated stop terminated the query. Recovered silently.
    #[error("query aborted by stop request")]
    Aborted,

    /// A kill invalidated the in-flight query. Recovered silently.
    #[error("stale query generation")]
    GenerationMismatch,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GangwayError {
    /// True for the error kinds a query loop swallows rather than propagates:
    /// user-initiated stop and kill-invalidated generation.
    pub fn is_expected_abort(&self) -> bool {
        matches!(
            self,
            GangwayError::Aborted | GangwayError::GenerationMismatch
        )
    }
}
