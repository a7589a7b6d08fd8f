// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted mock provider backend for deterministic testing.
//!
//! Each query pops one script from a FIFO queue and replays it as a
//! unified event stream. `Tool` steps invoke the installed hooks the way a
//! real agent runtime would: pre-tool before execution, post-tool after,
//! with injected system payloads recorded for assertions. `WaitFor` steps
//! gate mid-stream, letting tests steer or kill a query while it runs.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use gangway_core::{
    DoneReason, GangwayError, HookDecision, ProviderBackend, ProviderCapabilities,
    ProviderEvent, ProviderEventStream, ProviderInput, ToolPhase, UsageUpdate,
};
use tokio::sync::{Mutex, Notify};

/// One step of a scripted query.
#[derive(Clone)]
pub enum ScriptStep {
    Session { id: String, resumed: bool },
    Text(String),
    Thinking(String),
    /// Executes a tool: pre-tool hook, start/end events, post-tool hook.
    Tool {
        name: String,
        input: serde_json::Value,
    },
    Usage(UsageUpdate),
    Context { used: u64, max: u64 },
    /// Parks the stream until the notify fires (or the query is aborted).
    WaitFor(Arc<Notify>),
    Done(DoneReason),
    /// Ends the stream with a provider error.
    Fail(String),
}

/// What the backend observed while replaying scripts.
#[derive(Debug, Default)]
pub struct MockObservations {
    /// System payloads returned by post-tool hooks.
    pub injected: Vec<String>,
    /// Reasons for tools rejected by pre-tool hooks.
    pub blocked: Vec<String>,
    /// Prompts received, in order.
    pub prompts: Vec<String>,
    /// Resume session ids received, in order.
    pub resumed_sessions: Vec<Option<String>>,
}

/// A mock provider backend replaying pre-configured scripts.
///
/// When the script queue is empty a default session + text + usage + done
/// sequence is replayed.
pub struct MockBackend {
    id: String,
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    observations: Arc<Mutex<MockObservations>>,
}

impl MockBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            scripts: Mutex::new(VecDeque::new()),
            observations: Arc::new(Mutex::new(MockObservations::default())),
        }
    }

    pub fn with_scripts(id: &str, scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            id: id.to_string(),
            scripts: Mutex::new(scripts.into()),
            observations: Arc::new(Mutex::new(MockObservations::default())),
        }
    }

    pub async fn push_script(&self, script: Vec<ScriptStep>) {
        self.scripts.lock().await.push_back(script);
    }

    pub fn observations(&self) -> Arc<Mutex<MockObservations>> {
        Arc::clone(&self.observations)
    }

    /// The canonical happy-path script.
    pub fn default_script(text: &str) -> Vec<ScriptStep> {
        vec![
            ScriptStep::Session {
                id: format!("mock-session-{}", session_suffix()),
                resumed: false,
            },
            ScriptStep::Text(text.to_string()),
            ScriptStep::Usage(UsageUpdate {
                input_tokens: 10,
                output_tokens: 20,
                ..Default::default()
            }),
            ScriptStep::Done(DoneReason::Completed),
        ]
    }
}

fn session_suffix() -> String {
    let nanos = u64::from(chrono::Utc::now().timestamp_subsec_nanos());
    format!("{:x}", u64::from(std::process::id()) ^ nanos)
}

#[async_trait]
impl ProviderBackend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_use: true,
            session_resume: true,
        }
    }

    async fn run(&self, input: ProviderInput) -> Result<ProviderEventStream, GangwayError> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Self::default_script("mock response"));

        {
            let mut observations = self.observations.lock().await;
            observations.prompts.push(input.prompt.clone());
            observations
                .resumed_sessions
                .push(input.options.resume_session_id.clone());
        }

        let observations = Arc::clone(&self.observations);
        let (tx, rx) = mpsc::unbounded::<Result<ProviderEvent, GangwayError>>();

        tokio::spawn(async move {
            for step in script {
                if input.abort.is_cancelled() {
                    let _ = tx.unbounded_send(Ok(ProviderEvent::Done {
                        reason: DoneReason::Aborted,
                    }));
                    return;
                }
                match step {
                    ScriptStep::Session { id, resumed } => {
                        let _ = tx.unbounded_send(Ok(ProviderEvent::Session {
                            provider_session_id: id,
                            resumed,
                        }));
                    }
                    ScriptStep::Text(delta) => {
                        let _ = tx.unbounded_send(Ok(ProviderEvent::Text { delta }));
                    }
                    ScriptStep::Thinking(text) => {
                        let _ = tx.unbounded_send(Ok(ProviderEvent::Thinking { text }));
                    }
                    ScriptStep::Tool { name, input: tool_input } => {
                        let Some(ref hooks) = input.hooks else {
                            let _ = tx.unbounded_send(Ok(ProviderEvent::Tool {
                                phase: ToolPhase::Start,
                                tool_name: name.clone(),
                                payload: Some(tool_input.clone()),
                            }));
                            let _ = tx.unbounded_send(Ok(ProviderEvent::Tool {
                                phase: ToolPhase::End,
                                tool_name: name,
                                payload: None,
                            }));
                            continue;
                        };
                        match hooks.pre_tool(&name, &tool_input).await {
                            HookDecision::Continue => {
                                let _ = tx.unbounded_send(Ok(ProviderEvent::Tool {
                                    phase: ToolPhase::Start,
                                    tool_name: name.clone(),
                                    payload: Some(tool_input.clone()),
                                }));
                                let _ = tx.unbounded_send(Ok(ProviderEvent::Tool {
                                    phase: ToolPhase::End,
                                    tool_name: name.clone(),
                                    payload: None,
                                }));
                                if let Some(payload) =
                                    hooks.post_tool(&name, &tool_input).await
                                {
                                    observations.lock().await.injected.push(payload);
                                }
                            }
                            HookDecision::Block { reason } => {
                                // The provider sees a failed tool and the
                                // turn continues.
                                observations.lock().await.blocked.push(reason);
                            }
                            HookDecision::Abort { reason } => {
                                observations.lock().await.blocked.push(reason);
                                let _ = tx.unbounded_send(Ok(ProviderEvent::Done {
                                    reason: DoneReason::Aborted,
                                }));
                                return;
                            }
                        }
                    }
                    ScriptStep::Usage(update) => {
                        let _ = tx.unbounded_send(Ok(ProviderEvent::Usage(update)));
                    }
                    ScriptStep::Context { used, max } => {
                        let _ = tx.unbounded_send(Ok(ProviderEvent::Context {
                            used_tokens: used,
                            max_tokens: max,
                        }));
                    }
                    ScriptStep::WaitFor(notify) => {
                        tokio::select! {
                            _ = notify.notified() => {}
                            _ = input.abort.cancelled() => {
                                let _ = tx.unbounded_send(Ok(ProviderEvent::Done {
                                    reason: DoneReason::Aborted,
                                }));
                                return;
                            }
                        }
                    }
                    ScriptStep::Done(reason) => {
                        let _ = tx.unbounded_send(Ok(ProviderEvent::Done { reason }));
                        return;
                    }
                    ScriptStep::Fail(message) => {
                        let _ = tx.unbounded_send(Err(GangwayError::Provider {
                            message,
                            source: None,
                        }));
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    fn input() -> ProviderInput {
        ProviderInput {
            prompt: "hello".into(),
            options: Default::default(),
            abort: CancellationToken::new(),
            hooks: None,
        }
    }

    #[tokio::test]
    async fn default_script_streams_expected_sequence() {
        let backend = MockBackend::new("mock");
        let mut stream = backend.run(input()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ProviderEvent::Session { .. }));
        assert!(matches!(events[1], ProviderEvent::Text { .. }));
        assert!(matches!(events[2], ProviderEvent::Usage(_)));
        assert!(matches!(
            events[3],
            ProviderEvent::Done {
                reason: DoneReason::Completed
            }
        ));
    }

    #[tokio::test]
    async fn scripts_replay_in_fifo_order() {
        let backend = MockBackend::with_scripts(
            "mock",
            vec![
                vec![
                    ScriptStep::Text("first".into()),
                    ScriptStep::Done(DoneReason::Completed),
                ],
                vec![
                    ScriptStep::Text("second".into()),
                    ScriptStep::Done(DoneReason::Completed),
                ],
            ],
        );

        for expected in ["first", "second"] {
            let mut stream = backend.run(input()).await.unwrap();
            let mut text = String::new();
            while let Some(event) = stream.next().await {
                if let Ok(ProviderEvent::Text { delta }) = event {
                    text.push_str(&delta);
                }
            }
            assert_eq!(text, expected);
        }
    }

    #[tokio::test]
    async fn abort_cuts_the_stream_at_a_gate() {
        let gate = Arc::new(Notify::new());
        let backend = MockBackend::with_scripts(
            "mock",
            vec![vec![
                ScriptStep::Text("before".into()),
                ScriptStep::WaitFor(Arc::clone(&gate)),
                ScriptStep::Text("after".into()),
                ScriptStep::Done(DoneReason::Completed),
            ]],
        );

        let query_input = input();
        let abort = query_input.abort.clone();
        let mut stream = backend.run(query_input).await.unwrap();

        // First event arrives, then abort while the stream is gated.
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ProviderEvent::Text { .. }));
        abort.cancel();

        let last = stream.next().await.unwrap().unwrap();
        assert!(matches!(
            last,
            ProviderEvent::Done {
                reason: DoneReason::Aborted
            }
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn fail_step_surfaces_provider_error() {
        let backend = MockBackend::with_scripts(
            "mock",
            vec![vec![ScriptStep::Fail("503 unavailable".into())]],
        );
        let mut stream = backend.run(input()).await.unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
