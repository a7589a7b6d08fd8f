// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Steering buffer: user messages received while a query is running.
//!
//! The active FIFO holds messages awaiting delivery. When the post-tool
//! hook injects them into the provider turn, they move to the injected
//! shadow list; if the query then ends without the provider honoring them
//! (a text-only response never reaches the hook), the next query restores
//! the shadow back into the FIFO so nothing is lost. All operations are
//! synchronous and never block.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Local, Utc};
use gangway_core::GangwayError;

/// Active FIFO capacity; enqueue beyond this drops the head.
pub const STEERING_CAPACITY: usize = 100;

/// Pending recovery offers expire after this long.
const RECOVERY_TTL_SECS: i64 = 60;

/// One buffered user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteeringMessage {
    pub content: String,
    pub message_id: i64,
    pub timestamp: DateTime<Utc>,
    /// Name of the tool that was executing when the message arrived.
    pub received_during_tool: Option<String>,
}

impl SteeringMessage {
    /// Validates and trims the content. Empty content and non-positive
    /// message ids are programmer errors surfaced as `Steering` errors.
    pub fn new(
        content: &str,
        message_id: i64,
        received_during_tool: Option<String>,
    ) -> Result<Self, GangwayError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(GangwayError::Steering("empty steering content".into()));
        }
        if message_id <= 0 {
            return Err(GangwayError::Steering(format!(
                "non-positive message id {message_id}"
            )));
        }
        Ok(Self {
            content: content.to_string(),
            message_id,
            timestamp: Utc::now(),
            received_during_tool,
        })
    }

    fn format_line(&self) -> String {
        let time = self.timestamp.with_timezone(&Local).format("%H:%M:%S");
        match &self.received_during_tool {
            Some(tool) => format!("[{time} (during {tool})] {}", self.content),
            None => format!("[{time}] {}", self.content),
        }
    }
}

/// State of a kill-recovery offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Awaiting,
    Resolved,
}

/// Messages extracted by a kill, offered back to the user for resend.
#[derive(Debug, Clone)]
pub struct PendingRecovery {
    pub messages: Vec<SteeringMessage>,
    pub prompted_at: DateTime<Utc>,
    pub state: RecoveryState,
    pub chat_id: String,
    pub bound_message_id: Option<i64>,
}

impl PendingRecovery {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.prompted_at > Duration::seconds(RECOVERY_TTL_SECS)
    }
}

/// Bounded buffer of steering messages plus the injected shadow list.
#[derive(Debug, Default)]
pub struct SteeringBuffer {
    active: VecDeque<SteeringMessage>,
    injected: Vec<SteeringMessage>,
    recovery: Option<PendingRecovery>,
}

impl SteeringBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn injected_len(&self) -> usize {
        self.injected.len()
    }

    /// Appends a message. Returns `true` when the head was evicted to make
    /// room, so the transport can tell the user the queue overflowed.
    pub fn enqueue(&mut self, message: SteeringMessage) -> bool {
        let evicted = if self.active.len() >= STEERING_CAPACITY {
            self.active.pop_front();
            true
        } else {
            false
        };
        self.active.push_back(message);
        evicted
    }

    /// Formats and drains the active FIFO. `None` when empty.
    pub fn consume(&mut self) -> Option<String> {
        let formatted = self.peek()?;
        self.active.clear();
        Some(formatted)
    }

    /// Formats the active FIFO without draining. `None` when empty.
    pub fn peek(&self) -> Option<String> {
        if self.active.is_empty() {
            return None;
        }
        Some(
            self.active
                .iter()
                .map(SteeringMessage::format_line)
                .collect::<Vec<_>>()
                .join("\n---\n"),
        )
    }

    /// Moves the active FIFO into the injected shadow list, recording that
    /// those messages were delivered via the post-tool hook. Returns the
    /// number moved.
    pub fn track_for_injection(&mut self) -> usize {
        let moved = self.active.len();
        self.injected.extend(self.active.drain(..));
        moved
    }

    /// Prepends the shadow list back into the active FIFO. Called at the
    /// start of a new query so messages the previous query never honored
    /// stay visible. Returns the number restored.
    pub fn restore_injected(&mut self) -> usize {
        let restored = self.injected.len();
        for message in self.injected.drain(..).rev() {
            self.active.push_front(message);
        }
        restored
    }

    /// Discards the shadow list once the next query has re-anchored the
    /// messages.
    pub fn clear_injected_tracking(&mut self) {
        self.injected.clear();
    }

    /// Drains and returns every active message. Used on kill.
    pub fn extract(&mut self) -> Vec<SteeringMessage> {
        self.active.drain(..).collect()
    }

    pub fn set_pending_recovery(&mut self, recovery: PendingRecovery) {
        self.recovery = Some(recovery);
    }

    /// Returns the recovery offer unless it has expired.
    pub fn pending_recovery(&mut self) -> Option<&PendingRecovery> {
        if let Some(ref recovery) = self.recovery
            && recovery.is_expired(Utc::now())
        {
            self.recovery = None;
        }
        self.recovery.as_ref()
    }

    /// Marks the offer resolved. Returns its messages, unless expired.
    pub fn resolve_pending_recovery(&mut self) -> Option<Vec<SteeringMessage>> {
        let now = Utc::now();
        match self.recovery.take() {
            Some(recovery) if !recovery.is_expired(now) => {
                let messages = recovery.messages.clone();
                self.recovery = Some(PendingRecovery {
                    state: RecoveryState::Resolved,
                    ..recovery
                });
                Some(messages)
            }
            _ => None,
        }
    }

    pub fn clear_pending_recovery(&mut self) {
        self.recovery = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn msg(content: &str, id: i64) -> SteeringMessage {
        SteeringMessage::new(content, id, None).unwrap()
    }

    #[test]
    fn rejects_empty_and_bad_ids() {
        assert!(SteeringMessage::new("", 1, None).is_err());
        assert!(SteeringMessage::new("   ", 1, None).is_err());
        assert!(SteeringMessage::new("ok", 0, None).is_err());
        assert!(SteeringMessage::new("ok", -5, None).is_err());
    }

    #[test]
    fn content_is_trimmed() {
        let m = SteeringMessage::new("  hello  ", 1, None).unwrap();
        assert_eq!(m.content, "hello");
    }

    #[test]
    fn enqueue_reports_eviction_at_capacity() {
        let mut buffer = SteeringBuffer::new();
        for i in 1..=STEERING_CAPACITY as i64 {
            assert!(!buffer.enqueue(msg(&format!("m{i}"), i)));
        }
        assert_eq!(buffer.len(), STEERING_CAPACITY);

        // One more evicts exactly the head.
        assert!(buffer.enqueue(msg("overflow", 999)));
        assert_eq!(buffer.len(), STEERING_CAPACITY);
        let extracted = buffer.extract();
        assert_eq!(extracted[0].content, "m2");
        assert_eq!(extracted.last().unwrap().content, "overflow");
    }

    #[test]
    fn consume_formats_and_drains() {
        let mut buffer = SteeringBuffer::new();
        buffer.enqueue(msg("first", 1));
        buffer.enqueue(
            SteeringMessage::new("second", 2, Some("Bash".into())).unwrap(),
        );

        let formatted = buffer.consume().unwrap();
        assert!(formatted.contains("first"));
        assert!(formatted.contains("(during Bash)] second"));
        assert!(formatted.contains("\n---\n"));
        assert!(buffer.is_empty());
        assert!(buffer.consume().is_none());
    }

    #[test]
    fn peek_is_non_destructive() {
        let mut buffer = SteeringBuffer::new();
        buffer.enqueue(msg("keep me", 1));
        assert!(buffer.peek().unwrap().contains("keep me"));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn injection_tracking_round_trips() {
        let mut buffer = SteeringBuffer::new();
        buffer.enqueue(msg("a", 1));
        buffer.enqueue(msg("b", 2));

        assert_eq!(buffer.track_for_injection(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.injected_len(), 2);

        // New message arrives, then the shadow is restored in front of it.
        buffer.enqueue(msg("c", 3));
        assert_eq!(buffer.restore_injected(), 2);
        assert_eq!(buffer.injected_len(), 0);
        let order: Vec<_> = buffer.extract().into_iter().map(|m| m.content).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn clear_injected_tracking_discards_shadow() {
        let mut buffer = SteeringBuffer::new();
        buffer.enqueue(msg("a", 1));
        buffer.track_for_injection();
        buffer.clear_injected_tracking();
        assert_eq!(buffer.restore_injected(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn pending_recovery_expires() {
        let mut buffer = SteeringBuffer::new();
        buffer.set_pending_recovery(PendingRecovery {
            messages: vec![msg("lost", 1)],
            prompted_at: Utc::now() - Duration::seconds(RECOVERY_TTL_SECS + 1),
            state: RecoveryState::Awaiting,
            chat_id: "42".into(),
            bound_message_id: None,
        });
        assert!(buffer.pending_recovery().is_none());
        assert!(buffer.resolve_pending_recovery().is_none());
    }

    #[test]
    fn pending_recovery_resolves_within_ttl() {
        let mut buffer = SteeringBuffer::new();
        buffer.set_pending_recovery(PendingRecovery {
            messages: vec![msg("lost", 1)],
            prompted_at: Utc::now(),
            state: RecoveryState::Awaiting,
            chat_id: "42".into(),
            bound_message_id: Some(7),
        });
        assert!(buffer.pending_recovery().is_some());

        let messages = buffer.resolve_pending_recovery().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            buffer.pending_recovery().map(|r| r.state),
            Some(RecoveryState::Resolved)
        );

        buffer.clear_pending_recovery();
        assert!(buffer.pending_recovery().is_none());
    }

    proptest! {
        #[test]
        fn active_never_exceeds_capacity(ops in prop::collection::vec(0u8..4, 0..400)) {
            let mut buffer = SteeringBuffer::new();
            let mut id = 1i64;
            for op in ops {
                match op {
                    0 => {
                        buffer.enqueue(msg("x", id));
                        id += 1;
                    }
                    1 => { buffer.consume(); }
                    2 => { buffer.track_for_injection(); }
                    _ => { buffer.restore_injected(); }
                }
                prop_assert!(buffer.len() <= STEERING_CAPACITY + buffer.injected_len());
                prop_assert!(buffer.len() <= STEERING_CAPACITY * 2);
            }
        }
    }
}
