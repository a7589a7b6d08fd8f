// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status-callback vocabulary consumed by the chat transport.
//!
//! The transport registers one callback per query; the session and the
//! query runtime feed it typed updates which the transport renders as
//! edits, reactions, or new messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status update type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Thinking,
    Tool,
    Text,
    SegmentEnd,
    Done,
    SteeringPending,
    System,
}

/// One status update delivered to the transport.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub kind: StatusKind,
    pub content: String,
    /// Monotonic per-query text segment id, present for text-family events.
    pub segment_id: Option<u32>,
    pub metadata: Option<serde_json::Value>,
}

impl StatusUpdate {
    pub fn new(kind: StatusKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            segment_id: None,
            metadata: None,
        }
    }

    pub fn with_segment(mut self, segment_id: u32) -> Self {
        self.segment_id = Some(segment_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Shared status callback handle.
pub type StatusCallback = Arc<dyn Fn(StatusUpdate) + Send + Sync>;

/// A callback that drops every update, for callers with no transport.
pub fn null_status_callback() -> StatusCallback {
    Arc::new(|_| {})
}
