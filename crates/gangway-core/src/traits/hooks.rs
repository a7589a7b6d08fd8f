// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool hooks invoked by provider backends around tool execution.
//!
//! Hooks are a trait rather than captured closures so the session can be
//! handed to the backend without back-references. Abort is a typed result,
//! not an exception: the backend translates it into its native
//! cancellation.

use async_trait::async_trait;

/// Outcome of a pre-tool hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Let the tool run unmodified.
    Continue,
    /// Fail this tool invocation; the provider sees a failed tool and the
    /// turn continues.
    Block { reason: String },
    /// Stop the whole query; the backend cancels the stream.
    Abort { reason: String },
}

/// Hooks installed on the provider for the duration of one query.
#[async_trait]
pub trait ToolHooks: Send + Sync {
    /// Fires before every tool execution.
    async fn pre_tool(&self, tool_name: &str, input: &serde_json::Value) -> HookDecision;

    /// Fires after every tool execution. A returned string is appended to
    /// the current provider turn as a system-message observation.
    async fn post_tool(&self, tool_name: &str, input: &serde_json::Value) -> Option<String>;
}

/// Hooks that never intervene. Useful as a default and in tests.
pub struct NoopHooks;

#[async_trait]
impl ToolHooks for NoopHooks {
    async fn pre_tool(&self, _tool_name: &str, _input: &serde_json::Value) -> HookDecision {
        HookDecision::Continue
    }

    async fn post_tool(&self, _tool_name: &str, _input: &serde_json::Value) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_hooks_continue_and_inject_nothing() {
        let hooks = NoopHooks;
        let input = serde_json::json!({});
        assert_eq!(hooks.pre_tool("Bash", &input).await, HookDecision::Continue);
        assert_eq!(hooks.post_tool("Bash", &input).await, None);
    }
}
