// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status-callback sink collecting updates for assertions.

use std::sync::{Arc, Mutex};

use gangway_core::{StatusCallback, StatusKind, StatusUpdate};

/// Collects every status update a query emits.
#[derive(Clone, Default)]
pub struct StatusCollector {
    events: Arc<Mutex<Vec<StatusUpdate>>>,
}

impl StatusCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The callback to hand to a session.
    pub fn callback(&self) -> StatusCallback {
        let events = Arc::clone(&self.events);
        Arc::new(move |update| {
            if let Ok(mut guard) = events.lock() {
                guard.push(update);
            }
        })
    }

    pub fn events(&self) -> Vec<StatusUpdate> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<StatusKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: StatusKind) -> Vec<StatusUpdate> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }
}
