// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider backend trait for remote agent runtimes.
//!
//! A backend adapts one concrete agent runtime (an external process or
//! streaming RPC endpoint) to the unified event vocabulary. Backends are
//! registered with the orchestrator by id; the core never names a concrete
//! provider.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::GangwayError;
use crate::events::ProviderEvent;
use crate::traits::hooks::ToolHooks;

/// Tool permission posture passed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    #[default]
    Default,
    Bypass,
}

/// Recognized per-query options. Backends ignore options they cannot honor.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    pub model: String,
    pub working_dir: PathBuf,
    pub system_prompt: Option<String>,
    pub mcp_servers: Vec<String>,
    pub max_thinking_tokens: Option<u32>,
    pub additional_directories: Vec<PathBuf>,
    /// Provider conversation id to resume, when one exists.
    pub resume_session_id: Option<String>,
    pub path_to_executable: Option<PathBuf>,
    pub permission_mode: PermissionMode,
    pub allow_dangerously_skip_permissions: bool,
}

/// One streaming query handed to a backend.
#[derive(Clone)]
pub struct ProviderInput {
    pub prompt: String,
    pub options: ProviderOptions,
    /// Raised by the caller to cancel the stream.
    pub abort: CancellationToken,
    /// Hooks invoked by the backend around every tool execution.
    pub hooks: Option<Arc<dyn ToolHooks>>,
}

/// What a backend declares it can do. The orchestrator selects providers
/// by capability and policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub tool_use: bool,
    pub session_resume: bool,
}

/// Boxed event stream returned by a backend.
pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = Result<ProviderEvent, GangwayError>> + Send>>;

/// Adapter for one remote agent runtime.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Stable id used in configuration and event envelopes.
    fn id(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Starts one streaming query. The returned stream ends with a
    /// [`ProviderEvent::Done`] on orderly completion; transport failures
    /// surface as stream errors.
    async fn run(&self, input: ProviderInput) -> Result<ProviderEventStream, GangwayError>;
}
