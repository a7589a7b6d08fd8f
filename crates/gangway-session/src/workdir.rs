// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-thread working-directory aliases.
//!
//! Each session gets a stable symlink `<alias root>/<service key>/<escaped
//! partition key>` pointing at its canonical working directory, so the
//! provider's notion of "current directory" is pinned per thread without
//! touching the process cwd. The service key is the base name of the
//! canonical working directory, which keeps multiple gateway instances on
//! one host from colliding.

use std::path::{Path, PathBuf};

use gangway_core::{GangwayError, SessionIdentity};
use tracing::{debug, warn};

/// Maintains workdir alias symlinks under one root.
#[derive(Debug, Clone)]
pub struct WorkdirAliases {
    alias_root: PathBuf,
}

impl WorkdirAliases {
    /// `alias_root` is the configured base; `canonical_workdir` contributes
    /// its base name for per-service isolation.
    pub fn new(alias_root: &Path, canonical_workdir: &Path) -> Self {
        let service_key = canonical_workdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        Self {
            alias_root: alias_root.join(service_key),
        }
    }

    pub fn alias_path(&self, identity: &SessionIdentity) -> PathBuf {
        self.alias_root.join(identity.alias_dir_name())
    }

    /// Creates or repairs the alias for one session. An alias that exists
    /// but points elsewhere, or is broken, is unlinked and re-linked.
    #[cfg(unix)]
    pub async fn ensure(
        &self,
        identity: &SessionIdentity,
        target: &Path,
    ) -> Result<PathBuf, GangwayError> {
        let alias = self.alias_path(identity);
        tokio::fs::create_dir_all(&self.alias_root)
            .await
            .map_err(|e| GangwayError::Persistence {
                source: Box::new(e),
            })?;

        match tokio::fs::read_link(&alias).await {
            Ok(existing) if existing == target => {
                return Ok(alias);
            }
            Ok(existing) => {
                warn!(
                    alias = %alias.display(),
                    was = %existing.display(),
                    now = %target.display(),
                    "repairing workdir alias"
                );
                let _ = tokio::fs::remove_file(&alias).await;
            }
            Err(_) => {
                // Missing, or present but not a symlink; clear either way.
                let _ = tokio::fs::remove_file(&alias).await;
            }
        }

        tokio::fs::symlink(target, &alias)
            .await
            .map_err(|e| GangwayError::Persistence {
                source: Box::new(e),
            })?;
        debug!(alias = %alias.display(), target = %target.display(), "workdir alias linked");
        Ok(alias)
    }

    #[cfg(not(unix))]
    pub async fn ensure(
        &self,
        identity: &SessionIdentity,
        _target: &Path,
    ) -> Result<PathBuf, GangwayError> {
        // Symlink aliasing is a Unix deployment concern.
        Ok(self.alias_path(identity))
    }

    /// Removes the alias for one session, if present.
    pub async fn remove(&self, identity: &SessionIdentity) {
        let _ = tokio::fs::remove_file(self.alias_path(identity)).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn identity() -> SessionIdentity {
        SessionIdentity::new("acme", "telegram", "42").unwrap()
    }

    #[tokio::test]
    async fn creates_symlink_to_workdir() {
        let root = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();

        let aliases = WorkdirAliases::new(root.path(), workdir.path());
        let alias = aliases.ensure(&identity(), workdir.path()).await.unwrap();

        assert_eq!(std::fs::read_link(&alias).unwrap(), workdir.path());
        assert!(alias.to_string_lossy().contains("acme__telegram__42"));
    }

    #[tokio::test]
    async fn repairs_mispointed_alias() {
        let root = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let wrong = tempfile::tempdir().unwrap();

        let aliases = WorkdirAliases::new(root.path(), workdir.path());
        let alias = aliases.ensure(&identity(), wrong.path()).await.unwrap();
        assert_eq!(std::fs::read_link(&alias).unwrap(), wrong.path());

        let alias = aliases.ensure(&identity(), workdir.path()).await.unwrap();
        assert_eq!(std::fs::read_link(&alias).unwrap(), workdir.path());
    }

    #[tokio::test]
    async fn repairs_broken_alias() {
        let root = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();

        let aliases = WorkdirAliases::new(root.path(), workdir.path());
        let alias = aliases.ensure(&identity(), workdir.path()).await.unwrap();

        // Break the target, then repair.
        let ghost = root.path().join("gone");
        std::fs::remove_file(&alias).unwrap();
        std::os::unix::fs::symlink(&ghost, &alias).unwrap();

        let alias = aliases.ensure(&identity(), workdir.path()).await.unwrap();
        assert_eq!(std::fs::read_link(&alias).unwrap(), workdir.path());
    }

    #[tokio::test]
    async fn alias_root_is_keyed_on_workdir_basename() {
        let root = tempfile::tempdir().unwrap();
        let workdir = root.path().join("agent-a");
        std::fs::create_dir_all(&workdir).unwrap();

        let aliases = WorkdirAliases::new(root.path(), &workdir);
        let alias = aliases.alias_path(&identity());
        assert!(alias.starts_with(root.path().join("agent-a")));
    }

    #[tokio::test]
    async fn remove_deletes_alias() {
        let root = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();

        let aliases = WorkdirAliases::new(root.path(), workdir.path());
        let alias = aliases.ensure(&identity(), workdir.path()).await.unwrap();
        aliases.remove(&identity()).await;
        assert!(std::fs::symlink_metadata(&alias).is_err());
    }
}
