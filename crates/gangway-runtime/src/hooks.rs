// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook composition for one query.
//!
//! The backend sees a single [`ToolHooks`] implementation that layers
//! safety validation in front of the session's own hooks (stop check,
//! steering injection). A validation failure blocks the tool and surfaces
//! a `BLOCKED:` status event; the provider sees a failed tool and the turn
//! continues.

use std::sync::Arc;

use async_trait::async_trait;
use gangway_core::{HookDecision, StatusCallback, StatusKind, StatusUpdate, ToolHooks};
use tracing::warn;

use crate::safety::SafetyValidator;

pub struct RuntimeHooks {
    session_hooks: Arc<dyn ToolHooks>,
    validator: Arc<SafetyValidator>,
    status: StatusCallback,
}

impl RuntimeHooks {
    pub fn new(
        session_hooks: Arc<dyn ToolHooks>,
        validator: Arc<SafetyValidator>,
        status: StatusCallback,
    ) -> Self {
        Self {
            session_hooks,
            validator,
            status,
        }
    }
}

#[async_trait]
impl ToolHooks for RuntimeHooks {
    async fn pre_tool(&self, tool_name: &str, input: &serde_json::Value) -> HookDecision {
        if let Err(e) = self.validator.validate(tool_name, input) {
            let reason = e.to_string();
            warn!(tool = tool_name, reason = reason.as_str(), "tool input blocked");
            (self.status)(StatusUpdate::new(
                StatusKind::Tool,
                format!("BLOCKED: {reason}"),
            ));
            return HookDecision::Block { reason };
        }
        self.session_hooks.pre_tool(tool_name, input).await
    }

    async fn post_tool(&self, tool_name: &str, input: &serde_json::Value) -> Option<String> {
        self.session_hooks.post_tool(tool_name, input).await
    }
}
