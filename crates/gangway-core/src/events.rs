// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider-neutral event vocabulary.
//!
//! Every provider backend, whatever its wire protocol, is surfaced to the
//! query runtime as an ordered stream of [`ProviderEvent`]s wrapped in an
//! [`EventEnvelope`] carrying provider id, query id, and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Tool lifecycle phase within a provider turn.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Start,
    End,
}

/// Why a query stream terminated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    Completed,
    Aborted,
    Failed,
}

/// Cumulative or incremental token usage reported by a provider.
///
/// Fields are merged "latest non-zero wins" by the runtime accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageUpdate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
    /// Context-window size, when the provider reports one.
    pub context_window: Option<u64>,
}

impl UsageUpdate {
    /// Approximate context occupancy implied by this usage report: input
    /// plus cache reads and writes.
    pub fn context_occupancy(&self) -> u64 {
        self.input_tokens + self.cache_read_input_tokens + self.cache_creation_input_tokens
    }
}

/// One event in a provider stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// The provider's conversation id, delivered once it is known.
    Session {
        provider_session_id: String,
        resumed: bool,
    },
    /// A tool entered or left execution.
    Tool {
        phase: ToolPhase,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    /// A chunk of assistant text.
    Text { delta: String },
    /// A chunk of extended-thinking output.
    Thinking { text: String },
    /// A usage report.
    Usage(UsageUpdate),
    /// Context-window occupancy report.
    Context { used_tokens: u64, max_tokens: u64 },
    /// Terminal event for the query.
    Done { reason: DoneReason },
}

/// A [`ProviderEvent`] with its delivery metadata.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub provider_id: String,
    pub query_id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: ProviderEvent,
}

impl EventEnvelope {
    pub fn new(provider_id: &str, query_id: uuid::Uuid, event: ProviderEvent) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            query_id,
            timestamp: Utc::now(),
            event,
        }
    }
}
