// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool-input safety validation.
//!
//! Runs before every tool execution. `Bash` commands are screened against a
//! small set of destructive patterns, and `rm` targets must resolve inside
//! the allow-list. File-touching tools (`Read`/`Write`/`Edit`) have their
//! `file_path` resolved to a real path (following symlinks) and checked
//! against the allow-list; `Read` is additionally permitted on the
//! well-known temporary directories.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use gangway_core::GangwayError;
use regex::Regex;
use tracing::debug;

/// Shell command separators used to split compound command lines.
const COMMAND_SEPARATORS: [&str; 4] = ["&&", "||", ";", "|"];

fn blocked_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Global recursive removal.
            r"rm\s+(-\w+\s+)*-\w*[rR]\w*\s+(/|/\*)(\s|$)",
            // Fork bomb.
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;?\s*:",
            // Writes to raw block devices.
            r"dd\s+[^;|&]*of=/dev/(sd|hd|nvme|vd)",
            r">\s*/dev/(sd|hd|nvme|vd)",
            // Filesystem creation / partition table zeroing.
            r"mkfs(\.\w+)?\s",
            r"wipefs\s",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Validates tool inputs against the path allow-list and blocked-command
/// patterns.
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    allowed_roots: Vec<PathBuf>,
}

impl SafetyValidator {
    /// The first root doubles as the base for relative paths.
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        let allowed_roots = allowed_roots
            .into_iter()
            .map(|root| std::fs::canonicalize(&root).unwrap_or(root))
            .collect();
        Self { allowed_roots }
    }

    /// Validates one tool invocation. `Ok(())` means the tool may run.
    pub fn validate(
        &self,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> Result<(), GangwayError> {
        match tool_name {
            "Bash" => {
                let command = input
                    .get("command")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default();
                self.validate_bash(command)
            }
            "Read" | "Write" | "Edit" => {
                let Some(path) = input.get("file_path").and_then(|p| p.as_str()) else {
                    return Ok(());
                };
                self.validate_file_access(tool_name, Path::new(path))
            }
            _ => Ok(()),
        }
    }

    fn validate_bash(&self, command: &str) -> Result<(), GangwayError> {
        for pattern in blocked_patterns() {
            if pattern.is_match(command) {
                return Err(GangwayError::UnsafeToolInput(format!(
                    "blocked command pattern: {command}"
                )));
            }
        }

        // Every rm target must resolve inside the allow-list.
        for segment in split_compound(command) {
            let mut words = segment.split_whitespace();
            let Some(first) = words.next() else { continue };
            let is_rm = first == "rm" || (first == "sudo" && words.clone().next() == Some("rm"));
            if !is_rm {
                continue;
            }
            for word in words {
                if word.starts_with('-') || word == "rm" {
                    continue;
                }
                let resolved = self.resolve(Path::new(word));
                if !self.is_allowed(&resolved) {
                    return Err(GangwayError::PathOutsideAllowlist {
                        path: word.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_file_access(&self, tool_name: &str, path: &Path) -> Result<(), GangwayError> {
        let resolved = self.resolve(path);

        if self.is_allowed(&resolved) {
            return Ok(());
        }
        if tool_name == "Read" && is_temp_path(&resolved) {
            debug!(path = %resolved.display(), "read permitted in temp directory");
            return Ok(());
        }
        Err(GangwayError::PathOutsideAllowlist {
            path: path.display().to_string(),
        })
    }

    /// Resolves to a real path, following symlinks where the target (or its
    /// parent, for not-yet-existing files) exists; falls back to lexical
    /// normalization.
    fn resolve(&self, path: &Path) -> PathBuf {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.allowed_roots
                .first()
                .map(|root| root.join(path))
                .unwrap_or_else(|| path.to_path_buf())
        };

        if let Ok(real) = std::fs::canonicalize(&absolute) {
            return real;
        }
        if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name())
            && let Ok(real_parent) = std::fs::canonicalize(parent)
        {
            return real_parent.join(name);
        }
        normalize_lexically(&absolute)
    }

    fn is_allowed(&self, resolved: &Path) -> bool {
        self.allowed_roots
            .iter()
            .any(|root| resolved.starts_with(root))
    }
}

/// Splits a compound shell command on `&&`, `||`, `;`, and `|`.
fn split_compound(command: &str) -> Vec<String> {
    let mut segments = vec![command.to_string()];
    for sep in COMMAND_SEPARATORS {
        segments = segments
            .iter()
            .flat_map(|s| s.split(sep).map(str::to_string))
            .collect();
    }
    segments
}

/// Removes `.` and folds `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn is_temp_path(path: &Path) -> bool {
    path.starts_with("/tmp")
        || path.starts_with("/var/tmp")
        || path.starts_with(std::env::temp_dir())
}
