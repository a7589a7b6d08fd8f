// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One provider query from dispatch to terminal event.
//!
//! The runtime drives a single orchestrated call: it consumes the unified
//! event stream, enforces generation fencing and stop checks per event,
//! throttles text status updates, keeps the tool-duration ledger, merges
//! usage reports, and resolves the context-window occupancy with a
//! transcript-file fallback. Expected aborts (caller stop, kill fence)
//! return partial results instead of errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gangway_core::{
    DoneReason, EventEnvelope, EventSink, GangwayError, ProviderEvent, ProviderInput,
    ProviderOptions, StatusCallback, StatusKind, StatusUpdate, ToolHooks, ToolPhase,
    UsageUpdate,
};
use gangway_orchestrator::{OrchestratorQuery, ProviderOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hooks::RuntimeHooks;
use crate::safety::SafetyValidator;

/// Minimum interval between throttled text status events.
const TEXT_THROTTLE: Duration = Duration::from_millis(500);

/// A segment must exceed this length before the first text event fires.
const TEXT_MIN_CHARS: usize = 20;

/// Tool display strings are truncated to this length.
const TOOL_DISPLAY_MAX: usize = 120;

/// Everything one query execution needs from its session.
pub struct QueryRequest {
    pub prompt: String,
    pub options: ProviderOptions,
    pub primary_provider_id: String,
    pub fallback_provider_id: Option<String>,
    pub abort: CancellationToken,
    /// The session's hooks: stop check in pre-tool, steering injection in
    /// post-tool.
    pub hooks: Arc<dyn ToolHooks>,
    pub validator: Arc<SafetyValidator>,
    pub status: StatusCallback,
    /// Generation this query was started under.
    pub query_generation: u64,
    /// Live view of the session's generation counter.
    pub current_generation: Arc<AtomicU64>,
    pub should_stop: Arc<dyn Fn() -> bool + Send + Sync>,
    /// Invoked once, when the provider session id is first observed.
    pub on_session_id: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Best-effort context occupancy from the provider transcript file,
    /// consulted when the provider reported nothing.
    pub context_usage_fallback: Option<Arc<dyn Fn() -> Option<u64> + Send + Sync>>,
}

/// What one execution produced.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub text: String,
    pub usage: UsageUpdate,
    pub context_window_usage: Option<u64>,
    pub context_window_size: Option<u64>,
    pub provider_session_id: Option<String>,
    pub tool_durations: HashMap<String, Duration>,
    pub done_reason: Option<DoneReason>,
    pub provider_id: Option<String>,
    pub attempts: u32,
    /// False when the stream ended early (stop, kill, provider failure).
    pub completed: bool,
}

/// Executes one query against the orchestrator.
///
/// Expected aborts are swallowed: the outcome carries whatever text and
/// telemetry arrived before the stream stopped. Unexpected provider errors
/// propagate after the open tool interval is closed.
pub async fn execute_query(
    orchestrator: &ProviderOrchestrator,
    request: QueryRequest,
) -> Result<QueryOutcome, GangwayError> {
    let hooks: Arc<dyn ToolHooks> = Arc::new(RuntimeHooks::new(
        Arc::clone(&request.hooks),
        Arc::clone(&request.validator),
        Arc::clone(&request.status),
    ));

    let input = ProviderInput {
        prompt: request.prompt.clone(),
        options: request.options.clone(),
        abort: request.abort.clone(),
        hooks: Some(hooks),
    };

    let mut sink = RunSink::new(&request);
    let dispatch = orchestrator
        .execute(
            OrchestratorQuery {
                primary_provider_id: request.primary_provider_id.clone(),
                fallback_provider_id: request.fallback_provider_id.clone(),
                input,
            },
            &mut sink,
        )
        .await;

    match dispatch {
        Ok(dispatch) => {
            let mut outcome = sink.finish(request.context_usage_fallback.as_deref());
            outcome.provider_id = Some(dispatch.provider_id);
            outcome.attempts = dispatch.attempts;
            Ok(outcome)
        }
        Err(e) if e.is_expected_abort() => {
            debug!(error = %e, "query ended early, returning partial results");
            Ok(sink.finish(request.context_usage_fallback.as_deref()))
        }
        Err(e) => {
            sink.close_tool_interval();
            Err(e)
        }
    }
}

/// Per-query event-loop state. Implements the orchestrator's sink.
struct RunSink {
    status: StatusCallback,
    should_stop: Arc<dyn Fn() -> bool + Send + Sync>,
    query_generation: u64,
    current_generation: Arc<AtomicU64>,
    on_session_id: Option<Arc<dyn Fn(&str) + Send + Sync>>,

    text: String,
    segment: String,
    segment_id: u32,
    last_text_emit: Instant,

    open_tool: Option<(String, Instant)>,
    tool_durations: HashMap<String, Duration>,

    usage: UsageUpdate,
    last_usage: Option<UsageUpdate>,
    context_usage: Option<u64>,
    context_size: Option<u64>,

    session_id: Option<String>,
    done_reason: Option<DoneReason>,
    completed: bool,
}

impl RunSink {
    fn new(request: &QueryRequest) -> Self {
        Self {
            status: Arc::clone(&request.status),
            should_stop: Arc::clone(&request.should_stop),
            query_generation: request.query_generation,
            current_generation: Arc::clone(&request.current_generation),
            on_session_id: request.on_session_id.clone(),
            text: String::new(),
            segment: String::new(),
            segment_id: 0,
            last_text_emit: Instant::now() - TEXT_THROTTLE,
            open_tool: None,
            tool_durations: HashMap::new(),
            usage: UsageUpdate::default(),
            last_usage: None,
            context_usage: None,
            context_size: None,
            session_id: None,
            done_reason: None,
            completed: false,
        }
    }

    fn generation_is_stale(&self) -> bool {
        self.query_generation != self.current_generation.load(Ordering::SeqCst)
    }

    fn close_tool_interval(&mut self) {
        if let Some((name, started)) = self.open_tool.take() {
            *self.tool_durations.entry(name).or_default() += started.elapsed();
        }
    }

    /// Emits `segment_end` for a non-empty open segment and advances the
    /// segment id.
    fn flush_segment(&mut self) {
        if self.segment.is_empty() {
            return;
        }
        let content = std::mem::take(&mut self.segment);
        (self.status)(
            StatusUpdate::new(StatusKind::SegmentEnd, content).with_segment(self.segment_id),
        );
        self.segment_id += 1;
        self.last_text_emit = Instant::now() - TEXT_THROTTLE;
    }

    fn maybe_emit_text(&mut self) {
        if self.segment.len() > TEXT_MIN_CHARS
            && self.last_text_emit.elapsed() >= TEXT_THROTTLE
        {
            (self.status)(
                StatusUpdate::new(StatusKind::Text, self.segment.clone())
                    .with_segment(self.segment_id),
            );
            self.last_text_emit = Instant::now();
        }
    }

    fn merge_usage(&mut self, update: UsageUpdate) {
        // Latest non-zero fields win.
        if update.input_tokens > 0 {
            self.usage.input_tokens = update.input_tokens;
        }
        if update.output_tokens > 0 {
            self.usage.output_tokens = update.output_tokens;
        }
        if update.cache_read_input_tokens > 0 {
            self.usage.cache_read_input_tokens = update.cache_read_input_tokens;
        }
        if update.cache_creation_input_tokens > 0 {
            self.usage.cache_creation_input_tokens = update.cache_creation_input_tokens;
        }
        if let Some(window) = update.context_window
            && window > 0
        {
            self.context_size = Some(window);
        }
        self.last_usage = Some(update);
    }

    fn finish(
        mut self,
        context_fallback: Option<&(dyn Fn() -> Option<u64> + Send + Sync)>,
    ) -> QueryOutcome {
        self.close_tool_interval();
        self.flush_segment();

        // Context occupancy precedence: explicit context report, then the
        // last usage report, then the transcript-file fallback.
        let context_window_usage = self
            .context_usage
            .or_else(|| {
                self.last_usage
                    .map(|u| u.context_occupancy())
                    .filter(|&n| n > 0)
            })
            .or_else(|| context_fallback.and_then(|f| f()));

        QueryOutcome {
            text: self.text,
            usage: self.usage,
            context_window_usage,
            context_window_size: self.context_size,
            provider_session_id: self.session_id,
            tool_durations: self.tool_durations,
            done_reason: self.done_reason,
            provider_id: None,
            attempts: 0,
            completed: self.completed,
        }
    }
}

#[async_trait]
impl EventSink for RunSink {
    async fn deliver(&mut self, envelope: EventEnvelope) -> Result<(), GangwayError> {
        if (self.should_stop)() {
            return Err(GangwayError::Aborted);
        }

        match envelope.event {
            ProviderEvent::Session {
                provider_session_id,
                resumed,
            } => {
                // A kill between dispatch and this event invalidates the
                // query; the stale session id must not be recorded.
                if self.generation_is_stale() {
                    warn!("dropping provider session id observed after kill");
                    return Err(GangwayError::GenerationMismatch);
                }
                if self.session_id.is_none() {
                    debug!(
                        provider_session_id = provider_session_id.as_str(),
                        resumed, "provider session id recorded"
                    );
                    if let Some(ref callback) = self.on_session_id {
                        callback(&provider_session_id);
                    }
                    self.session_id = Some(provider_session_id);
                }
            }
            ProviderEvent::Tool {
                phase: ToolPhase::Start,
                tool_name,
                payload,
            } => {
                self.flush_segment();
                self.close_tool_interval();
                self.open_tool = Some((tool_name.clone(), Instant::now()));
                (self.status)(StatusUpdate::new(
                    StatusKind::Tool,
                    format_tool_display(&tool_name, payload.as_ref()),
                ));
            }
            ProviderEvent::Tool {
                phase: ToolPhase::End,
                ..
            } => {
                self.close_tool_interval();
            }
            ProviderEvent::Text { delta } => {
                self.close_tool_interval();
                self.segment.push_str(&delta);
                self.text.push_str(&delta);
                self.maybe_emit_text();
            }
            ProviderEvent::Thinking { text } => {
                (self.status)(StatusUpdate::new(StatusKind::Thinking, text));
            }
            ProviderEvent::Usage(update) => {
                self.merge_usage(update);
            }
            ProviderEvent::Context {
                used_tokens,
                max_tokens,
            } => {
                self.context_usage = Some(used_tokens);
                if max_tokens > 0 {
                    self.context_size = Some(max_tokens);
                }
            }
            ProviderEvent::Done { reason } => {
                self.close_tool_interval();
                self.flush_segment();
                self.done_reason = Some(reason);
                self.completed = reason == DoneReason::Completed;
            }
        }
        Ok(())
    }
}

/// Renders a tool invocation for the status line.
fn format_tool_display(tool_name: &str, payload: Option<&serde_json::Value>) -> String {
    let detail = payload.and_then(|p| match tool_name {
        "Bash" => p.get("command").and_then(|c| c.as_str()).map(String::from),
        "Read" | "Write" | "Edit" => p
            .get("file_path")
            .and_then(|f| f.as_str())
            .map(String::from),
        _ => p
            .as_object()
            .filter(|o| !o.is_empty())
            .map(|_| p.to_string()),
    });

    match detail {
        Some(detail) => {
            let detail: String = detail.chars().take(TOOL_DISPLAY_MAX).collect();
            format!("{tool_name}: {detail}")
        }
        None => tool_name.to_string(),
    }
}
