// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Restart/boot hand-off seam.
//!
//! Shutdown writes a context payload; the next boot takes it back and
//! attaches it to the primary session's next query. Kept behind a trait so
//! the flat-file layout stays an implementation detail of the store crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GangwayError;

/// A command the next boot runs to verify a pre-restart change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationTask {
    pub command: String,
    pub task_id: String,
    pub description: String,
}

/// Context written at graceful shutdown for the next boot to pick up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownContext {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationTask>,
    pub written_at: DateTime<Utc>,
}

/// Persistence seam for restart context.
#[async_trait]
pub trait RestartStore: Send + Sync {
    /// Returns and consumes the pending restart context, if any.
    async fn take_restart_context(&self) -> Result<Option<String>, GangwayError>;

    /// Writes the shutdown context for the next boot.
    async fn write_shutdown_context(&self, payload: &ShutdownContext)
    -> Result<(), GangwayError>;
}
