// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session snapshot files.
//!
//! One JSON file per session under the sessions directory, named
//! `tenant_channel_thread.json`. Written atomically whenever the provider
//! session id becomes known and at shutdown; loaded lazily on first access.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gangway_core::{GangwayError, SessionIdentity};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::atomic::{persistence, read_json, write_json_atomic};

/// Persisted per-session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Provider conversation id, when one was established.
    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,

    pub working_dir: String,

    #[serde(
        rename = "contextWindowUsage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context_window_usage: Option<u64>,

    #[serde(
        rename = "contextWindowSize",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context_window_size: Option<u64>,

    #[serde(
        rename = "totalInputTokens",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_input_tokens: Option<u64>,

    #[serde(
        rename = "totalOutputTokens",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_output_tokens: Option<u64>,

    #[serde(
        rename = "totalQueries",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_queries: Option<u64>,

    #[serde(
        rename = "sessionStartTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_start_time: Option<DateTime<Utc>>,
}

/// Flat-file store for session snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, identity: &SessionIdentity) -> PathBuf {
        self.dir
            .join(format!("{}.json", identity.storage_file_stem()))
    }

    pub async fn save(
        &self,
        identity: &SessionIdentity,
        snapshot: &SessionSnapshot,
    ) -> Result<(), GangwayError> {
        let mut stamped = snapshot.clone();
        stamped.saved_at = Some(Utc::now());
        write_json_atomic(&self.path_for(identity), &stamped).await?;
        debug!(session_key = %identity, "session snapshot saved");
        Ok(())
    }

    pub async fn load(
        &self,
        identity: &SessionIdentity,
    ) -> Result<Option<SessionSnapshot>, GangwayError> {
        read_json(&self.path_for(identity)).await
    }

    pub async fn delete(&self, identity: &SessionIdentity) -> Result<(), GangwayError> {
        match tokio::fs::remove_file(self.path_for(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence(e)),
        }
    }

    /// Loads every snapshot in the directory.
    ///
    /// File stems split as `tenant_channel_thread`; tenant and channel are
    /// expected to be underscore-free (thread ids may contain underscores).
    /// Unparseable files are skipped with a warning, never trusted.
    pub async fn load_all(
        &self,
    ) -> Result<Vec<(SessionIdentity, SessionSnapshot)>, GangwayError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(persistence(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(persistence)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(identity) = parse_file_stem(stem) else {
                warn!(file = %path.display(), "skipping snapshot with unparseable name");
                continue;
            };
            match read_json::<SessionSnapshot>(&path).await {
                Ok(Some(snapshot)) => out.push((identity, snapshot)),
                Ok(None) => {}
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable snapshot");
                }
            }
        }
        Ok(out)
    }
}

fn parse_file_stem(stem: &str) -> Option<SessionIdentity> {
    let mut parts = stem.splitn(3, '_');
    let tenant = parts.next()?;
    let channel = parts.next()?;
    let thread = parts.next()?;
    SessionIdentity::new(tenant, channel, thread).ok()
}
