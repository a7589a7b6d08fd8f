// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pending choice/form state.
//!
//! Interactive forms (multiple-choice keyboards) outlive a single request:
//! the user may answer minutes later or after a restart. Records live in one
//! JSON array file with a 24 hour TTL, written atomically.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use gangway_core::GangwayError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atomic::{read_json, write_json_atomic};

/// Pending form records expire after this long.
const FORM_TTL_HOURS: i64 = 24;

/// One outstanding interactive form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingForm {
    pub id: String,
    pub form_id: String,
    pub session_key: String,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub message_ids: Vec<i64>,
    pub questions: Vec<String>,
    pub selections: Vec<Option<String>>,
    pub created_at: DateTime<Utc>,
}

impl PendingForm {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::hours(FORM_TTL_HOURS)
    }
}

/// Flat-file store for pending forms.
#[derive(Debug, Clone)]
pub struct FormStore {
    path: PathBuf,
}

impl FormStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads all unexpired forms, dropping expired ones.
    pub async fn load(&self) -> Result<Vec<PendingForm>, GangwayError> {
        let forms: Vec<PendingForm> = read_json(&self.path).await?.unwrap_or_default();
        let now = Utc::now();
        let (live, expired): (Vec<_>, Vec<_>) =
            forms.into_iter().partition(|f| !f.is_expired(now));
        if !expired.is_empty() {
            debug!(count = expired.len(), "dropped expired pending forms");
        }
        Ok(live)
    }

    /// Replaces the stored form set.
    pub async fn save(&self, forms: &[PendingForm]) -> Result<(), GangwayError> {
        write_json_atomic(&self.path, &forms).await
    }

    /// Adds one form and persists.
    pub async fn add(&self, form: PendingForm) -> Result<(), GangwayError> {
        let mut forms = self.load().await?;
        forms.push(form);
        self.save(&forms).await
    }

    /// Removes a form by id and persists. Returns the removed record.
    pub async fn remove(&self, id: &str) -> Result<Option<PendingForm>, GangwayError> {
        let mut forms = self.load().await?;
        let removed = forms
            .iter()
            .position(|f| f.id == id)
            .map(|i| forms.remove(i));
        if removed.is_some() {
            self.save(&forms).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(id: &str, created_at: DateTime<Utc>) -> PendingForm {
        PendingForm {
            id: id.to_string(),
            form_id: "choice".into(),
            session_key: "acme:telegram:42".into(),
            chat_id: "42".into(),
            thread_id: None,
            message_ids: vec![101],
            questions: vec!["Which branch?".into()],
            selections: vec![None],
            created_at,
        }
    }

    #[tokio::test]
    async fn add_load_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FormStore::new(dir.path().join("pending-forms.json"));

        store.add(form("f1", Utc::now())).await.unwrap();
        store.add(form("f2", Utc::now())).await.unwrap();

        let forms = store.load().await.unwrap();
        assert_eq!(forms.len(), 2);

        let removed = store.remove("f1").await.unwrap().unwrap();
        assert_eq!(removed.id, "f1");
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_forms_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FormStore::new(dir.path().join("pending-forms.json"));

        let stale = Utc::now() - Duration::hours(FORM_TTL_HOURS + 1);
        store.add(form("old", stale)).await.unwrap();
        store.add(form("new", Utc::now())).await.unwrap();

        let forms = store.load().await.unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].id, "new");
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FormStore::new(dir.path().join("pending-forms.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn form_file_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending-forms.json");
        let store = FormStore::new(&path);
        store.add(form("f1", Utc::now())).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        for key in ["formId", "sessionKey", "chatId", "messageIds", "createdAt"] {
            assert!(raw.contains(key), "missing key {key}: {raw}");
        }
    }
}
