// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event sink consumed by the provider orchestrator.

use async_trait::async_trait;

use crate::error::GangwayError;
use crate::events::EventEnvelope;

/// Receives orchestrator events strictly in provider order.
///
/// Returning an error stops the orchestrator from emitting further events
/// for the current query. [`GangwayError::Aborted`] and
/// [`GangwayError::GenerationMismatch`] are the expected stop signals.
#[async_trait]
pub trait EventSink: Send {
    async fn deliver(&mut self, envelope: EventEnvelope) -> Result<(), GangwayError>;
}
