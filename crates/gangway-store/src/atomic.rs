// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atomic flat-file writes.
//!
//! Files whose corruption would matter (session snapshots, pending forms,
//! the skills registry) are written to a temporary sibling and renamed into
//! place. Rename is atomic on the same filesystem.

use std::path::Path;

use gangway_core::GangwayError;

/// Writes `contents` to `path` via write-tmp-then-rename.
///
/// The parent directory is created if missing.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), GangwayError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(persistence)?;
    }

    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, contents).await.map_err(persistence)?;

    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Leave no orphan behind on rename failure.
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(persistence(e))
        }
    }
}

/// Serializes a value as pretty JSON and writes it atomically.
pub async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), GangwayError> {
    let json = serde_json::to_vec_pretty(value).map_err(persistence)?;
    write_atomic(path, &json).await
}

/// Reads a JSON file, returning `None` when the file does not exist.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, GangwayError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(persistence)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(persistence(e)),
    }
}

pub(crate) fn persistence<E>(source: E) -> GangwayError
where
    E: std::error::Error + Send + Sync + 'static,
{
    GangwayError::Persistence {
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");

        write_json_atomic(&path, &serde_json::json!({"n": 42}))
            .await
            .unwrap();

        let value: serde_json::Value = read_json(&path).await.unwrap().unwrap();
        assert_eq!(value["n"], 42);
    }

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let value: Option<serde_json::Value> = read_json(&path).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn write_leaves_no_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"hello").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }

    #[tokio::test]
    async fn overwrite_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
