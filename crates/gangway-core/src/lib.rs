// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Gangway gateway.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Gangway workspace: session identity and
//! routing keys, the provider-neutral event vocabulary, the provider/hook/
//! restart-store trait seams, the status-callback vocabulary, and the
//! token-bucket rate limiter.

pub mod error;
pub mod events;
pub mod identity;
pub mod ratelimit;
pub mod status;
pub mod traits;

// Re-export key items at crate root for ergonomic imports.
pub use error::GangwayError;
pub use events::{DoneReason, EventEnvelope, ProviderEvent, ToolPhase, UsageUpdate};
pub use identity::{SessionIdentity, derive_route, sanitize_job_name, scheduler_route};
pub use status::{StatusCallback, StatusKind, StatusUpdate, null_status_callback};
pub use traits::{
    EventSink, HookDecision, NoopHooks, PermissionMode, ProviderBackend, ProviderCapabilities,
    ProviderEventStream, ProviderInput, ProviderOptions, RestartStore, ShutdownContext,
    ToolHooks, VerificationTask,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_reexports_compose() {
        let id = scheduler_route("Weekly Digest").unwrap();
        let parsed = SessionIdentity::parse_key(&id.session_key()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn trait_objects_are_constructible() {
        fn _assert_backend<T: ProviderBackend>() {}
        fn _assert_hooks<T: ToolHooks>() {}
        fn _assert_sink<T: EventSink>() {}
        fn _assert_restart<T: RestartStore>() {}
    }
}
