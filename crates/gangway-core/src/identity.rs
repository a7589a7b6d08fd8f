// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session identity and derived routing keys.
//!
//! A conversation is addressed by the tuple `(tenant, channel, thread)`.
//! Two renderings are derived from it: the colon-joined session key used
//! for in-memory routing, and the slash-joined partition key used for the
//! on-disk layout. Scheduler jobs live under a reserved tenant/channel
//! pair with a sanitized job name as the thread id.

use crate::error::GangwayError;

/// Thread sentinel for channels that have no thread concept.
pub const MAIN_THREAD: &str = "main";

/// Reserved tenant for scheduler-owned sessions.
pub const CRON_TENANT: &str = "cron";

/// Reserved channel for scheduler-owned sessions.
pub const SCHEDULER_CHANNEL: &str = "scheduler";

/// Canonical identity of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    tenant: String,
    channel: String,
    thread: String,
}

impl SessionIdentity {
    /// Constructs an identity, validating each component.
    ///
    /// Components must be non-empty and must not contain `:` (session key
    /// separator) or `/` (partition key separator).
    pub fn new(
        tenant: impl Into<String>,
        channel: impl Into<String>,
        thread: impl Into<String>,
    ) -> Result<Self, GangwayError> {
        let tenant = tenant.into();
        let channel = channel.into();
        let thread = thread.into();

        for (label, value) in [
            ("tenant", &tenant),
            ("channel", &channel),
            ("thread", &thread),
        ] {
            if value.is_empty() {
                return Err(GangwayError::InvalidSessionKey(format!(
                    "empty {label} component"
                )));
            }
            if value.contains(':') || value.contains('/') {
                return Err(GangwayError::InvalidSessionKey(format!(
                    "{label} component '{value}' contains a reserved separator"
                )));
            }
        }

        Ok(Self {
            tenant,
            channel,
            thread,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn thread(&self) -> &str {
        &self.thread
    }

    /// Colon-joined routing key: `tenant:channel:thread`.
    pub fn session_key(&self) -> String {
        format!("{}:{}:{}", self.tenant, self.channel, self.thread)
    }

    /// Slash-joined storage partition key: `tenant/channel/thread`.
    ///
    /// Safe as a filesystem path fragment because `/` is banned inside
    /// components.
    pub fn partition_key(&self) -> String {
        format!("{}/{}/{}", self.tenant, self.channel, self.thread)
    }

    /// File stem used for per-session snapshot files:
    /// `tenant_channel_thread`.
    pub fn storage_file_stem(&self) -> String {
        format!("{}_{}_{}", self.tenant, self.channel, self.thread)
    }

    /// Directory name for the per-thread workdir alias: the partition key
    /// with slashes escaped to double underscores.
    pub fn alias_dir_name(&self) -> String {
        self.partition_key().replace('/', "__")
    }

    /// Inverse of [`session_key`](Self::session_key).
    pub fn parse_key(key: &str) -> Result<Self, GangwayError> {
        let mut parts = key.split(':');
        let (Some(tenant), Some(channel), Some(thread), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(GangwayError::InvalidSessionKey(format!(
                "expected tenant:channel:thread, got '{key}'"
            )));
        };
        Self::new(tenant, channel, thread)
    }

    /// True for sessions owned by the cron scheduler.
    pub fn is_scheduler(&self) -> bool {
        self.tenant == CRON_TENANT && self.channel == SCHEDULER_CHANNEL
    }
}

impl std::fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.session_key())
    }
}

/// Derives the route for an inbound chat message.
///
/// Thread ids are channel-specific and coerced to string by the transport;
/// a missing thread id maps to the [`MAIN_THREAD`] sentinel.
pub fn derive_route(
    tenant: &str,
    chat_id: &str,
    thread_id: Option<&str>,
) -> Result<SessionIdentity, GangwayError> {
    SessionIdentity::new(tenant, chat_id, thread_id.unwrap_or(MAIN_THREAD))
}

/// Derives the session identity for a named scheduler job.
///
/// The job name is sanitized into a thread id: lowercased, runs of
/// non-alphanumeric characters collapsed to `-`, leading/trailing dashes
/// trimmed. An empty result falls back to `job`.
pub fn scheduler_route(job_name: &str) -> Result<SessionIdentity, GangwayError> {
    SessionIdentity::new(CRON_TENANT, SCHEDULER_CHANNEL, sanitize_job_name(job_name))
}

/// Sanitizes a cron job name into a thread-id-safe token.
pub fn sanitize_job_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "job".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_round_trips() {
        let id = SessionIdentity::new("acme", "telegram", "42").unwrap();
        assert_eq!(id.session_key(), "acme:telegram:42");
        assert_eq!(id.partition_key(), "acme/telegram/42");

        let parsed = SessionIdentity::parse_key(&id.session_key()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_reserved_separators() {
        assert!(SessionIdentity::new("a:b", "c", "d").is_err());
        assert!(SessionIdentity::new("a", "c/d", "e").is_err());
        assert!(SessionIdentity::new("", "c", "d").is_err());
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        assert!(SessionIdentity::parse_key("a:b").is_err());
        assert!(SessionIdentity::parse_key("a:b:c:d").is_err());
        assert!(SessionIdentity::parse_key("").is_err());
    }

    #[test]
    fn derive_route_defaults_to_main_thread() {
        let id = derive_route("acme", "12345", None).unwrap();
        assert_eq!(id.thread(), MAIN_THREAD);

        let id = derive_route("acme", "12345", Some("77")).unwrap();
        assert_eq!(id.thread(), "77");
    }

    #[test]
    fn scheduler_route_uses_reserved_tenant() {
        let id = scheduler_route("Nightly Backup!").unwrap();
        assert_eq!(id.tenant(), CRON_TENANT);
        assert_eq!(id.channel(), SCHEDULER_CHANNEL);
        assert_eq!(id.thread(), "nightly-backup");
        assert!(id.is_scheduler());
    }

    #[test]
    fn sanitize_collapses_runs_and_falls_back() {
        assert_eq!(sanitize_job_name("Daily  Report #3"), "daily-report-3");
        assert_eq!(sanitize_job_name("___"), "job");
        assert_eq!(sanitize_job_name(""), "job");
        assert_eq!(sanitize_job_name("--x--"), "x");
    }

    #[test]
    fn alias_dir_name_escapes_slashes() {
        let id = SessionIdentity::new("acme", "telegram", "42").unwrap();
        assert_eq!(id.alias_dir_name(), "acme__telegram__42");
    }
}
