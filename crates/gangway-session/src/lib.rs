// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation sessions for the Gangway gateway.
//!
//! A [`Session`] owns one provider conversation: its steering buffer,
//! state record, abort token, counters, and provider session id. The
//! [`SessionManager`] routes inbound traffic to sessions, persists and
//! evicts them, and maintains per-thread workdir aliases.

pub mod manager;
pub mod session;
pub mod state;
pub mod steering;
pub mod workdir;

pub use manager::{GlobalStats, ManagerConfig, SessionManager};
pub use session::{
    KillOutcome, ModelContext, ModelOverride, Session, SessionConfig, SessionStats, StopOutcome,
};
pub use state::{Activity, QueryPhase, RuntimeState};
pub use steering::{
    PendingRecovery, RecoveryState, STEERING_CAPACITY, SteeringBuffer, SteeringMessage,
};
pub use workdir::WorkdirAliases;
