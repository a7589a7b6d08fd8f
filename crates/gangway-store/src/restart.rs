// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Restart hand-off files.
//!
//! Graceful shutdown leaves three kinds of breadcrumbs for the next boot:
//! buffered steering messages (under /tmp, keyed by service name), a
//! restart-announcement marker with an optional verification task, and a
//! restart-context markdown under the working directory. Boot consumes them
//! in [`FileRestartStore::take_restart_context`] order: an explicit
//! `.last-save-id` wins over the newest restart-context file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gangway_core::{GangwayError, RestartStore, ShutdownContext, VerificationTask};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atomic::{persistence, read_json, write_atomic, write_json_atomic};

/// Save ids written by the save workflow: `YYYYMMDD_HHMMSS`.
fn save_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{8}_\d{6}$").unwrap_or_else(|_| unreachable!()))
}

/// Steering messages drained to disk at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSteeringCarryover {
    pub count: usize,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Restart announcement hand-off: which chat message to update after the
/// process comes back, plus the optional verification task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartMarker {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationTask>,
}

/// Flat-file implementation of the restart hand-off.
#[derive(Debug, Clone)]
pub struct FileRestartStore {
    service: String,
    workdir: PathBuf,
    tmp_dir: PathBuf,
}

impl FileRestartStore {
    /// `service` keys the /tmp files so concurrent gateway instances on one
    /// host do not collide.
    pub fn new(service: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            service: service.into(),
            workdir: workdir.into(),
            tmp_dir: std::env::temp_dir(),
        }
    }

    /// Overrides the /tmp location. Used by tests.
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    fn steering_path(&self) -> PathBuf {
        self.tmp_dir
            .join(format!("{}-pending-steering.json", self.service))
    }

    fn marker_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("{}-restart.json", self.service))
    }

    fn save_dir(&self) -> PathBuf {
        self.workdir.join("docs/tasks/save")
    }

    fn last_save_id_path(&self) -> PathBuf {
        self.workdir.join(".last-save-id")
    }

    /// Persists steering messages that were still buffered at shutdown.
    pub async fn save_pending_steering(
        &self,
        carryover: &PendingSteeringCarryover,
    ) -> Result<(), GangwayError> {
        write_json_atomic(&self.steering_path(), carryover).await?;
        info!(count = carryover.count, "pending steering drained to disk");
        Ok(())
    }

    /// Returns and deletes the steering carry-over, if present.
    pub async fn take_pending_steering(
        &self,
    ) -> Result<Option<PendingSteeringCarryover>, GangwayError> {
        let path = self.steering_path();
        let carryover = read_json::<PendingSteeringCarryover>(&path).await?;
        if carryover.is_some() {
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(carryover)
    }

    /// Writes the restart announcement marker.
    pub async fn write_restart_marker(&self, marker: &RestartMarker) -> Result<(), GangwayError> {
        write_json_atomic(&self.marker_path(), marker).await
    }

    /// Returns and deletes the restart marker, if present.
    pub async fn take_restart_marker(&self) -> Result<Option<RestartMarker>, GangwayError> {
        let path = self.marker_path();
        let marker = read_json::<RestartMarker>(&path).await?;
        if marker.is_some() {
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(marker)
    }

    /// Returns the newest restart-context markdown, if any.
    async fn latest_restart_context(&self) -> Result<Option<String>, GangwayError> {
        let dir = self.save_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence(e)),
        };

        let mut newest: Option<PathBuf> = None;
        while let Some(entry) = entries.next_entry().await.map_err(persistence)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("restart-context-") && name.ends_with(".md") {
                let path = entry.path();
                // Timestamped names sort lexicographically in time order.
                if newest.as_ref().is_none_or(|n| path > *n) {
                    newest = Some(path);
                }
            }
        }

        match newest {
            Some(path) => {
                let text = tokio::fs::read_to_string(&path).await.map_err(persistence)?;
                debug!(file = %path.display(), "restart context loaded");
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Checks `.last-save-id`; a well-formed id yields a load directive and
    /// the file is deleted after verification. Malformed ids are ignored.
    async fn take_save_directive(&self) -> Result<Option<String>, GangwayError> {
        let path = self.last_save_id_path();
        let id = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence(e)),
        };

        if !save_id_pattern().is_match(&id) {
            warn!(save_id = %id, "ignoring malformed .last-save-id");
            return Ok(None);
        }

        let _ = tokio::fs::remove_file(&path).await;
        Ok(Some(format!(
            "Load the saved session state {id} from docs/tasks/save/{id} and \
             continue the work recorded there."
        )))
    }
}

#[async_trait]
impl RestartStore for FileRestartStore {
    async fn take_restart_context(&self) -> Result<Option<String>, GangwayError> {
        if let Some(directive) = self.take_save_directive().await? {
            return Ok(Some(directive));
        }
        self.latest_restart_context().await
    }

    async fn write_shutdown_context(
        &self,
        payload: &ShutdownContext,
    ) -> Result<(), GangwayError> {
        let stamp = payload.written_at.format("%Y-%m-%dT%H-%M-%S");
        let path = self.save_dir().join(format!("restart-context-{stamp}.md"));

        let mut body = format!(
            "# Restart context\n\nWritten: {}\n\n{}\n",
            payload.written_at.to_rfc3339(),
            payload.summary
        );
        if let Some(ref task) = payload.verification {
            body.push_str(&format!(
                "\n## Verification\n\n- task: {}\n- command: `{}`\n- {}\n",
                task.task_id, task.command, task.description
            ));
        }

        write_atomic(&path, body.as_bytes()).await
    }
}
