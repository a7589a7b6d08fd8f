// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cron schedule file parsing and validation.
//!
//! The schedule file lives under the working directory as YAML:
//!
//! ```yaml
//! schedules:
//!   - name: nightly-digest
//!     cron: "0 3 * * *"
//!     prompt: Summarize yesterday's activity.
//!     enabled: true
//!     notify: true
//! ```
//!
//! Validation happens at load time, never at run time: missing fields,
//! unparseable cron expressions, and over-long prompts are all rejected
//! before any job is scheduled.

use std::path::{Path, PathBuf};

use gangway_core::GangwayError;
use serde::{Deserialize, Serialize};

/// The schedule file shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleFile {
    #[serde(default)]
    pub schedules: Vec<CronScheduleDef>,
}

/// One named cron job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronScheduleDef {
    pub name: String,
    pub cron: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<bool>,
}

impl CronScheduleDef {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn wants_notify(&self) -> bool {
        self.notify.unwrap_or(false)
    }
}

/// Parses and validates a schedule file.
pub fn parse_schedule_file(
    yaml: &str,
    max_prompt_length: usize,
) -> Result<ScheduleFile, GangwayError> {
    let file: ScheduleFile = serde_yaml::from_str(yaml)
        .map_err(|e| GangwayError::Scheduler(format!("invalid schedule file: {e}")))?;

    for def in &file.schedules {
        if def.name.trim().is_empty() {
            return Err(GangwayError::Scheduler("schedule with empty name".into()));
        }
        croner::Cron::new(&def.cron).parse().map_err(|e| {
            GangwayError::Scheduler(format!(
                "schedule '{}' has invalid cron expression '{}': {e}",
                def.name, def.cron
            ))
        })?;
        if def.prompt.trim().is_empty() {
            return Err(GangwayError::Scheduler(format!(
                "schedule '{}' has an empty prompt",
                def.name
            )));
        }
        if def.prompt.len() > max_prompt_length {
            return Err(GangwayError::Scheduler(format!(
                "schedule '{}' prompt exceeds {max_prompt_length} characters",
                def.name
            )));
        }
    }
    Ok(file)
}

/// Rejects schedule file paths outside the working directory and the
/// configured extra directories.
pub fn validate_schedule_path(
    path: &Path,
    workdir: &Path,
    allowed_dirs: &[PathBuf],
) -> Result<(), GangwayError> {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let workdir = std::fs::canonicalize(workdir).unwrap_or_else(|_| workdir.to_path_buf());

    if resolved.starts_with(&workdir) {
        return Ok(());
    }
    for dir in allowed_dirs {
        let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.clone());
        if resolved.starts_with(&dir) {
            return Ok(());
        }
    }
    Err(GangwayError::Scheduler(format!(
        "schedule file '{}' is outside the allowed directories",
        path.display()
    )))
}
