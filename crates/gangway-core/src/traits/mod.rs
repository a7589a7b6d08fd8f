// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the core and its collaborators.

pub mod hooks;
pub mod provider;
pub mod restart;
pub mod sink;

pub use hooks::{HookDecision, NoopHooks, ToolHooks};
pub use provider::{
    PermissionMode, ProviderBackend, ProviderCapabilities, ProviderEventStream, ProviderInput,
    ProviderOptions,
};
pub use restart::{RestartStore, ShutdownContext, VerificationTask};
pub use sink::EventSink;
