// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query runtime for the Gangway gateway.
//!
//! Drives exactly one provider streaming call per invocation: wires the
//! tool hooks, enforces safety validation and generation fencing, translates
//! provider events into the transport's status vocabulary, and collects
//! tool and usage telemetry.

pub mod hooks;
pub mod query;
pub mod safety;

pub use hooks::RuntimeHooks;
pub use query::{QueryOutcome, QueryRequest, execute_query};
pub use safety::SafetyValidator;
