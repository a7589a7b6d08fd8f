// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One provider conversation.
//!
//! The session is the single boundary the transport layer sees. It owns
//! the steering buffer, the state record, the abort token, usage counters,
//! the tool-duration ledger, and the provider conversation id, and exposes
//! one streaming-query operation at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use gangway_core::ratelimit::TokenBucket;
use gangway_core::{
    GangwayError, HookDecision, ProviderOptions, SessionIdentity, StatusCallback, StatusKind,
    StatusUpdate, ToolHooks,
};
use gangway_orchestrator::ProviderOrchestrator;
use gangway_runtime::{QueryOutcome, QueryRequest, SafetyValidator, execute_query};
use gangway_store::{SessionSnapshot, SnapshotStore};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::{self, QueryPhase, RuntimeState};
use crate::steering::{PendingRecovery, SteeringBuffer, SteeringMessage};

/// How long `stop` waits for a running query to wind down.
const STOP_WAIT: StdDuration = StdDuration::from_secs(5);

/// Pending direct-input and choice states expire after this long.
const PENDING_INPUT_TTL_SECS: i64 = 300;

/// Text returned when the provider produced no textual output.
const EMPTY_RESPONSE: &str = "No response from Claude.";

/// Which prompt family a query belongs to; selects the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelContext {
    General,
    Summary,
    Cron,
}

/// Result of [`Session::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The query was told to stop (it may have taken the full wait).
    Stopped,
    /// Stop was recorded during `preparing`; the query will not start.
    Pending,
    /// Nothing was running.
    NotRunning,
}

/// What `kill` extracted.
#[derive(Debug, Clone)]
pub struct KillOutcome {
    pub count: usize,
    pub messages: Vec<SteeringMessage>,
}

/// A temporary model override with an expiry.
#[derive(Debug, Clone)]
pub struct ModelOverride {
    pub model: String,
    pub reset_at: DateTime<Utc>,
}

/// An expiring opaque payload (pending direct input, choice state).
#[derive(Debug, Clone)]
pub struct ExpiringInput {
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ExpiringInput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > Duration::seconds(PENDING_INPUT_TTL_SECS)
    }
}

/// Static per-session configuration, derived from the gateway config.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub primary_provider: String,
    pub fallback_provider: Option<String>,
    pub default_model: String,
    pub summary_model: Option<String>,
    pub cron_model: Option<String>,
    pub max_thinking_tokens: Option<u32>,
    pub path_to_executable: Option<PathBuf>,
    pub context_window: u64,
    pub warning_cooldown_queries: u32,
    pub stale_session_marker: String,
    pub allowed_paths: Vec<PathBuf>,
    pub rate_limit_requests: u32,
    pub rate_limit_window: StdDuration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            primary_provider: "claude-agent".to_string(),
            fallback_provider: None,
            default_model: "claude-sonnet-4-20250514".to_string(),
            summary_model: None,
            cron_model: None,
            max_thinking_tokens: None,
            path_to_executable: None,
            context_window: 200_000,
            warning_cooldown_queries: 50,
            stale_session_marker: "No conversation found".to_string(),
            allowed_paths: Vec::new(),
            rate_limit_requests: gangway_core::ratelimit::DEFAULT_CAPACITY,
            rate_limit_window: gangway_core::ratelimit::DEFAULT_WINDOW,
        }
    }
}

/// Cumulative usage and warning bookkeeping.
#[derive(Debug)]
struct Telemetry {
    total_input_tokens: u64,
    total_output_tokens: u64,
    cache_read_tokens: u64,
    cache_creation_tokens: u64,
    total_queries: u64,
    session_start: DateTime<Utc>,
    context_window_usage: Option<u64>,
    context_window_size: u64,
    tool_durations: HashMap<String, StdDuration>,
    warned_70: bool,
    warned_85: bool,
    warned_95: bool,
    warning_cooldown_remaining: u32,
    last_error: Option<String>,
}

impl Telemetry {
    fn new(context_window: u64) -> Self {
        Self {
            total_input_tokens: 0,
            total_output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            total_queries: 0,
            session_start: Utc::now(),
            context_window_usage: None,
            context_window_size: context_window,
            tool_durations: HashMap::new(),
            warned_70: false,
            warned_85: false,
            warned_95: false,
            warning_cooldown_remaining: 0,
            last_error: None,
        }
    }

    fn context_percent(&self) -> Option<f64> {
        let usage = self.context_window_usage?;
        if self.context_window_size == 0 {
            return None;
        }
        Some(usage as f64 * 100.0 / self.context_window_size as f64)
    }
}

/// Mutable control fields outside the state machine.
#[derive(Debug, Default)]
struct Control {
    last_activity: DateTime<Utc>,
    query_started: Option<DateTime<Utc>>,
    current_tool: Option<String>,
    next_query_context: Option<String>,
    model_override: Option<ModelOverride>,
    pending_direct_input: Option<ExpiringInput>,
    choice_state: Option<ExpiringInput>,
    provider_failure_count: u32,
}

/// Aggregated counters exposed to the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub total_queries: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub is_processing: bool,
}

pub struct Session {
    identity: SessionIdentity,
    working_dir: PathBuf,
    config: SessionConfig,
    orchestrator: Arc<ProviderOrchestrator>,
    snapshots: Option<Arc<SnapshotStore>>,
    validator: Arc<SafetyValidator>,

    state: Mutex<RuntimeState>,
    /// Lock-free mirrors of the state record, kept in sync by
    /// [`Session::apply_state`]; the query runtime's fence and stop checks
    /// read these without taking the state lock.
    generation: Arc<AtomicU64>,
    stop_flag: Arc<AtomicBool>,

    abort: Mutex<CancellationToken>,
    steering: Mutex<SteeringBuffer>,
    telemetry: Mutex<Telemetry>,
    control: Mutex<Control>,
    provider_session_id: Mutex<Option<String>>,
    rate: Mutex<TokenBucket>,
}

impl Session {
    pub fn new(
        identity: SessionIdentity,
        working_dir: PathBuf,
        config: SessionConfig,
        orchestrator: Arc<ProviderOrchestrator>,
        snapshots: Option<Arc<SnapshotStore>>,
    ) -> Self {
        let mut roots = vec![working_dir.clone()];
        roots.extend(config.allowed_paths.iter().cloned());
        let validator = Arc::new(SafetyValidator::new(roots));
        let context_window = config.context_window;
        let rate = TokenBucket::new(config.rate_limit_requests, config.rate_limit_window);

        Self {
            identity,
            working_dir,
            config,
            orchestrator,
            snapshots,
            validator,
            state: Mutex::new(RuntimeState::default()),
            generation: Arc::new(AtomicU64::new(0)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            abort: Mutex::new(CancellationToken::new()),
            steering: Mutex::new(SteeringBuffer::new()),
            telemetry: Mutex::new(Telemetry::new(context_window)),
            control: Mutex::new(Control {
                last_activity: Utc::now(),
                ..Control::default()
            }),
            provider_session_id: Mutex::new(None),
            rate: Mutex::new(rate),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Applies one pure transition and refreshes the lock-free mirrors.
    async fn apply_state(&self, f: impl FnOnce(RuntimeState) -> RuntimeState) -> RuntimeState {
        let mut st = self.state.lock().await;
        *st = f(*st);
        self.stop_flag.store(st.stop_requested, Ordering::SeqCst);
        self.generation.store(st.generation, Ordering::SeqCst);
        *st
    }

    pub async fn runtime_state(&self) -> RuntimeState {
        *self.state.lock().await
    }

    pub async fn is_processing(&self) -> bool {
        state::is_query_running(*self.state.lock().await)
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        self.control.lock().await.last_activity
    }

    pub async fn touch(&self) {
        self.control.lock().await.last_activity = Utc::now();
    }

    pub async fn provider_session_id(&self) -> Option<String> {
        self.provider_session_id.lock().await.clone()
    }

    pub async fn current_tool(&self) -> Option<String> {
        self.control.lock().await.current_tool.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let telemetry = self.telemetry.lock().await;
        SessionStats {
            total_queries: telemetry.total_queries,
            total_input_tokens: telemetry.total_input_tokens,
            total_output_tokens: telemetry.total_output_tokens,
            is_processing: self.is_processing().await,
        }
    }

    /// Takes one rate-limit token; `Err` carries the wait duration.
    pub async fn check_rate_limit(&self) -> Result<(), StdDuration> {
        self.rate.lock().await.try_acquire()
    }

    // --- Steering -------------------------------------------------------

    /// Buffers a user message received while a query runs. Returns `true`
    /// when the queue overflowed and the head was dropped.
    pub async fn enqueue_steering(
        &self,
        content: &str,
        message_id: i64,
    ) -> Result<bool, GangwayError> {
        let during_tool = self.current_tool().await;
        let message = SteeringMessage::new(content, message_id, during_tool)?;
        let evicted = self.steering.lock().await.enqueue(message);
        if evicted {
            warn!(session_key = %self.identity, "steering queue full, head dropped");
        }
        Ok(evicted)
    }

    pub async fn steering_len(&self) -> usize {
        self.steering.lock().await.len()
    }

    pub async fn peek_steering(&self) -> Option<String> {
        self.steering.lock().await.peek()
    }

    pub async fn set_pending_recovery(&self, recovery: PendingRecovery) {
        self.steering.lock().await.set_pending_recovery(recovery);
    }

    pub async fn pending_recovery(&self) -> Option<PendingRecovery> {
        self.steering.lock().await.pending_recovery().cloned()
    }

    pub async fn resolve_pending_recovery(&self) -> Option<Vec<SteeringMessage>> {
        self.steering.lock().await.resolve_pending_recovery()
    }

    pub async fn clear_pending_recovery(&self) {
        self.steering.lock().await.clear_pending_recovery();
    }

    // --- Interrupt flags ------------------------------------------------

    pub async fn mark_interrupt(&self) {
        self.apply_state(state::mark_interrupt_flag).await;
    }

    pub async fn consume_interrupt(&self) -> bool {
        let mut st = self.state.lock().await;
        let (was_interrupted, next) = state::consume_interrupt_flag(*st);
        *st = next;
        self.stop_flag.store(next.stop_requested, Ordering::SeqCst);
        was_interrupted
    }

    pub async fn begin_interrupt(&self) -> bool {
        let mut st = self.state.lock().await;
        let (started, next) = state::begin_interrupt(*st);
        *st = next;
        started
    }

    pub async fn end_interrupt(&self) {
        self.apply_state(state::end_interrupt).await;
    }

    // --- Pending inputs -------------------------------------------------

    pub async fn set_pending_direct_input(&self, payload: serde_json::Value) {
        self.control.lock().await.pending_direct_input = Some(ExpiringInput::new(payload));
    }

    pub async fn take_pending_direct_input(&self) -> Option<serde_json::Value> {
        let mut control = self.control.lock().await;
        match control.pending_direct_input.take() {
            Some(input) if !input.is_expired() => Some(input.payload),
            _ => None,
        }
    }

    pub async fn set_choice_state(&self, payload: serde_json::Value) {
        self.control.lock().await.choice_state = Some(ExpiringInput::new(payload));
    }

    pub async fn take_choice_state(&self) -> Option<serde_json::Value> {
        let mut control = self.control.lock().await;
        match control.choice_state.take() {
            Some(input) if !input.is_expired() => Some(input.payload),
            _ => None,
        }
    }

    pub async fn set_next_query_context(&self, context: String) {
        self.control.lock().await.next_query_context = Some(context);
    }

    pub async fn next_query_context(&self) -> Option<String> {
        self.control.lock().await.next_query_context.clone()
    }

    pub async fn set_model_override(&self, model: String, reset_at: DateTime<Utc>) {
        self.control.lock().await.model_override = Some(ModelOverride { model, reset_at });
    }

    // --- Context warnings ----------------------------------------------

    pub async fn needs_warning_70(&self) -> bool {
        self.check_warning(70.0, |t| &mut t.warned_70).await
    }

    pub async fn needs_warning_85(&self) -> bool {
        self.check_warning(85.0, |t| &mut t.warned_85).await
    }

    pub async fn needs_warning_95(&self) -> bool {
        self.check_warning(95.0, |t| &mut t.warned_95).await
    }

    async fn check_warning(
        &self,
        threshold: f64,
        flag: impl FnOnce(&mut Telemetry) -> &mut bool,
    ) -> bool {
        let mut telemetry = self.telemetry.lock().await;
        if telemetry.warning_cooldown_remaining > 0 {
            return false;
        }
        let Some(percent) = telemetry.context_percent() else {
            return false;
        };
        if percent < threshold {
            return false;
        }
        let fired = flag(&mut telemetry);
        if *fired {
            false
        } else {
            *fired = true;
            true
        }
    }

    /// Clears the warning flags after a context restore and suppresses
    /// re-warning for the configured number of queries.
    pub async fn mark_restored(&self) {
        let mut telemetry = self.telemetry.lock().await;
        telemetry.warned_70 = false;
        telemetry.warned_85 = false;
        telemetry.warned_95 = false;
        telemetry.warning_cooldown_remaining = self.config.warning_cooldown_queries;
        info!(session_key = %self.identity, "context restored, warnings reset");
    }

    pub async fn context_window_usage(&self) -> Option<u64> {
        self.telemetry.lock().await.context_window_usage
    }

    pub async fn context_window_size(&self) -> u64 {
        self.telemetry.lock().await.context_window_size
    }

    pub async fn last_error(&self) -> Option<String> {
        self.telemetry.lock().await.last_error.clone()
    }

    // --- Snapshots ------------------------------------------------------

    pub async fn snapshot(&self) -> SessionSnapshot {
        let telemetry = self.telemetry.lock().await;
        SessionSnapshot {
            session_id: self.provider_session_id.lock().await.clone(),
            saved_at: None,
            working_dir: self.working_dir.to_string_lossy().into_owned(),
            context_window_usage: telemetry.context_window_usage,
            context_window_size: Some(telemetry.context_window_size),
            total_input_tokens: Some(telemetry.total_input_tokens),
            total_output_tokens: Some(telemetry.total_output_tokens),
            total_queries: Some(telemetry.total_queries),
            session_start_time: Some(telemetry.session_start),
        }
    }

    /// Restores counters and the provider session id from a snapshot.
    /// Refuses a snapshot whose working directory no longer matches.
    pub async fn restore_from_data(&self, snapshot: &SessionSnapshot) -> Result<(), GangwayError> {
        let own_dir = self.working_dir.to_string_lossy();
        if snapshot.working_dir != own_dir {
            return Err(GangwayError::Session(format!(
                "refusing resume: stored working dir '{}' does not match '{}'",
                snapshot.working_dir, own_dir
            )));
        }

        *self.provider_session_id.lock().await = snapshot.session_id.clone();

        let mut telemetry = self.telemetry.lock().await;
        telemetry.total_input_tokens = snapshot.total_input_tokens.unwrap_or(0);
        telemetry.total_output_tokens = snapshot.total_output_tokens.unwrap_or(0);
        telemetry.total_queries = snapshot.total_queries.unwrap_or(0);
        telemetry.context_window_usage = snapshot.context_window_usage;
        if let Some(size) = snapshot.context_window_size
            && size > 0
        {
            telemetry.context_window_size = size;
        }
        if let Some(start) = snapshot.session_start_time {
            telemetry.session_start = start;
        }

        debug!(session_key = %self.identity, "session restored from snapshot");
        Ok(())
    }

    /// Loads the on-disk snapshot for this session, if one exists.
    pub async fn resume_last(&self) -> Result<bool, GangwayError> {
        let Some(ref store) = self.snapshots else {
            return Ok(false);
        };
        match store.load(&self.identity).await? {
            Some(snapshot) => {
                self.restore_from_data(&snapshot).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn persist_snapshot(&self) {
        if let Some(ref store) = self.snapshots {
            let snapshot = self.snapshot().await;
            if let Err(e) = store.save(&self.identity, &snapshot).await {
                // Persistence failure never aborts the in-flight request.
                warn!(session_key = %self.identity, error = %e, "snapshot write failed");
            }
        }
    }

    // --- Stop and kill --------------------------------------------------

    /// Stops a running query, waiting up to five seconds for it to wind
    /// down. During `preparing` the stop is recorded and the query will
    /// not start.
    pub async fn stop(&self) -> StopOutcome {
        let phase = self.state.lock().await.query;
        match phase {
            QueryPhase::Idle => StopOutcome::NotRunning,
            QueryPhase::Preparing => {
                self.apply_state(state::request_stop_during_preparing).await;
                info!(session_key = %self.identity, "stop requested during preparing");
                StopOutcome::Pending
            }
            _ => {
                self.apply_state(state::request_stop_during_running).await;
                self.abort.lock().await.cancel();

                let deadline = tokio::time::Instant::now() + STOP_WAIT;
                loop {
                    if !state::is_query_running(*self.state.lock().await) {
                        break;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        warn!(session_key = %self.identity, "stop timed out waiting for query");
                        break;
                    }
                    tokio::time::sleep(StdDuration::from_millis(100)).await;
                }
                StopOutcome::Stopped
            }
        }
    }

    /// Hard reset: advances the generation fence so in-flight events are
    /// dropped, aborts the query, extracts buffered steering, and clears
    /// every counter and the provider session id. Idempotent.
    pub async fn kill(&self) -> KillOutcome {
        self.apply_state(state::increment_generation).await;
        self.apply_state(|s| {
            if matches!(s.query, QueryPhase::Running | QueryPhase::Aborting) {
                state::request_stop_during_running(s)
            } else {
                state::request_stop_during_preparing(s)
            }
        })
        .await;
        self.abort.lock().await.cancel();

        let messages = {
            let mut steering = self.steering.lock().await;
            steering.clear_injected_tracking();
            steering.extract()
        };
        let count = messages.len();

        self.apply_state(state::reset_after_kill).await;
        *self.provider_session_id.lock().await = None;
        {
            let mut telemetry = self.telemetry.lock().await;
            *telemetry = Telemetry::new(self.config.context_window);
        }
        {
            let mut control = self.control.lock().await;
            *control = Control {
                last_activity: Utc::now(),
                ..Control::default()
            };
        }
        self.rate.lock().await.reset();

        info!(
            session_key = %self.identity,
            extracted = count,
            generation = self.generation.load(Ordering::SeqCst),
            "session killed"
        );
        KillOutcome { count, messages }
    }

    // --- The streaming query -------------------------------------------

    /// Sends one prompt to the provider and streams status back through
    /// `status_callback`. At most one query runs at a time; a second
    /// attempt while one is in flight is a programmer error.
    pub async fn send_message_streaming(
        self: &Arc<Self>,
        prompt: &str,
        model_context: ModelContext,
        status_callback: StatusCallback,
        chat_id: Option<&str>,
    ) -> Result<String, GangwayError> {
        {
            let mut st = self.state.lock().await;
            if state::is_query_running(*st) {
                return Err(GangwayError::Session(format!(
                    "query already in flight for {}",
                    self.identity
                )));
            }
            *st = state::start_processing(*st);
        }
        self.touch().await;

        let result = self
            .run_query(prompt, model_context, status_callback, chat_id)
            .await;

        self.apply_state(state::complete_query).await;
        self.apply_state(state::finalize_query).await;
        {
            let mut control = self.control.lock().await;
            control.query_started = None;
            control.current_tool = None;
            control.last_activity = Utc::now();
        }
        result
    }

    async fn run_query(
        self: &Arc<Self>,
        prompt: &str,
        model_context: ModelContext,
        status_callback: StatusCallback,
        _chat_id: Option<&str>,
    ) -> Result<String, GangwayError> {
        let assembled = self.assemble_prompt(prompt).await;

        // A stop recorded during `preparing` prevents the query from
        // starting at all.
        {
            let mut st = self.state.lock().await;
            if st.stop_requested {
                *st = state::clear_stop_requested(state::stop_processing(*st));
                self.stop_flag.store(false, Ordering::SeqCst);
                info!(session_key = %self.identity, "query cancelled before start");
                return Ok(String::new());
            }
            *st = state::start_query(*st);
            self.stop_flag.store(false, Ordering::SeqCst);
        }

        let abort = CancellationToken::new();
        *self.abort.lock().await = abort.clone();
        self.control.lock().await.query_started = Some(Utc::now());
        let query_generation = self.generation.load(Ordering::SeqCst);

        let mut attempted_session_reset = false;
        loop {
            // The runtime reports the provider session id through this slot
            // as soon as it is observed, so a later failure does not lose it.
            let session_id_slot = Arc::new(std::sync::Mutex::new(None::<String>));
            let outcome = self
                .execute_once(
                    &assembled,
                    model_context,
                    &status_callback,
                    abort.clone(),
                    Arc::clone(&session_id_slot),
                )
                .await;

            match outcome {
                Ok(outcome) => {
                    // A kill that completed mid-stream reset the session;
                    // the stale outcome must not repopulate it.
                    if self.generation.load(Ordering::SeqCst) != query_generation {
                        debug!(
                            session_key = %self.identity,
                            "discarding query outcome invalidated by kill"
                        );
                        return Ok(outcome.text);
                    }
                    let text = self.absorb_outcome(outcome, &status_callback).await;
                    return Ok(text);
                }
                Err(e) => {
                    let observed_id = session_id_slot.lock().ok().and_then(|g| g.clone());
                    if self.generation.load(Ordering::SeqCst) == query_generation
                        && let Some(id) = observed_id
                    {
                        let mut guard = self.provider_session_id.lock().await;
                        if guard.is_none() {
                            *guard = Some(id);
                        }
                    }
                    self.telemetry.lock().await.last_error = Some(e.to_string());
                    let stale = self.provider_session_id.lock().await.is_some()
                        && e.to_string().contains(&self.config.stale_session_marker);
                    if stale && !attempted_session_reset {
                        warn!(
                            session_key = %self.identity,
                            error = %e,
                            "stale provider session, resetting and retrying once"
                        );
                        *self.provider_session_id.lock().await = None;
                        self.control.lock().await.provider_failure_count += 1;
                        attempted_session_reset = true;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn execute_once(
        self: &Arc<Self>,
        prompt: &str,
        model_context: ModelContext,
        status_callback: &StatusCallback,
        abort: CancellationToken,
        session_id_slot: Arc<std::sync::Mutex<Option<String>>>,
    ) -> Result<QueryOutcome, GangwayError> {
        let resume_session_id = self.provider_session_id.lock().await.clone();
        let model = self.select_model(model_context).await;

        let options = ProviderOptions {
            model,
            working_dir: self.working_dir.clone(),
            system_prompt: None,
            mcp_servers: Vec::new(),
            max_thinking_tokens: self.config.max_thinking_tokens,
            additional_directories: self.config.allowed_paths.clone(),
            resume_session_id,
            path_to_executable: self.config.path_to_executable.clone(),
            permission_mode: Default::default(),
            allow_dangerously_skip_permissions: false,
        };

        let slot = Arc::clone(&session_id_slot);
        let on_session_id: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |id: &str| {
            if let Ok(mut guard) = slot.lock() {
                guard.get_or_insert_with(|| id.to_string());
            }
        });

        let stop_flag = Arc::clone(&self.stop_flag);
        let generation = self.generation.load(Ordering::SeqCst);

        let request = QueryRequest {
            prompt: prompt.to_string(),
            options,
            primary_provider_id: self.config.primary_provider.clone(),
            fallback_provider_id: self.config.fallback_provider.clone(),
            abort,
            hooks: Arc::clone(self) as Arc<dyn ToolHooks>,
            validator: Arc::clone(&self.validator),
            status: Arc::clone(status_callback),
            query_generation: generation,
            current_generation: Arc::clone(&self.generation),
            should_stop: Arc::new(move || stop_flag.load(Ordering::SeqCst)),
            on_session_id: Some(on_session_id),
            context_usage_fallback: None,
        };

        execute_query(&self.orchestrator, request).await
    }

    /// Folds a finished query's telemetry into the session and emits the
    /// terminal status events.
    async fn absorb_outcome(
        &self,
        outcome: QueryOutcome,
        status_callback: &StatusCallback,
    ) -> String {
        let context_percent;
        {
            let mut telemetry = self.telemetry.lock().await;
            if outcome.usage.input_tokens > 0 {
                telemetry.total_input_tokens += outcome.usage.input_tokens;
            }
            if outcome.usage.output_tokens > 0 {
                telemetry.total_output_tokens += outcome.usage.output_tokens;
            }
            telemetry.cache_read_tokens += outcome.usage.cache_read_input_tokens;
            telemetry.cache_creation_tokens += outcome.usage.cache_creation_input_tokens;
            telemetry.total_queries += 1;
            if telemetry.warning_cooldown_remaining > 0 {
                telemetry.warning_cooldown_remaining -= 1;
            }
            for (tool, duration) in &outcome.tool_durations {
                *telemetry.tool_durations.entry(tool.clone()).or_default() += *duration;
            }
            if outcome.context_window_usage.is_some() {
                telemetry.context_window_usage = outcome.context_window_usage;
            }
            if let Some(size) = outcome.context_window_size
                && size > 0
            {
                telemetry.context_window_size = size;
            }
            telemetry.last_error = None;
            context_percent = telemetry.context_percent();
        }

        // The provider session id is set at most once per conversation.
        let mut newly_known = false;
        if let Some(ref session_id) = outcome.provider_session_id {
            let mut guard = self.provider_session_id.lock().await;
            if guard.is_none() {
                *guard = Some(session_id.clone());
                newly_known = true;
            }
        }
        if newly_known {
            self.persist_snapshot().await;
        }

        let mut metadata = serde_json::json!({
            "inputTokens": outcome.usage.input_tokens,
            "outputTokens": outcome.usage.output_tokens,
            "attempts": outcome.attempts,
        });
        if let Some(percent) = context_percent {
            metadata["contextPercent"] = serde_json::json!(percent);
        }
        if let Some(ref provider_id) = outcome.provider_id {
            metadata["provider"] = serde_json::json!(provider_id);
        }
        if !outcome.tool_durations.is_empty() {
            let durations: serde_json::Map<String, serde_json::Value> = outcome
                .tool_durations
                .iter()
                .map(|(tool, spent)| (tool.clone(), serde_json::json!(spent.as_millis() as u64)))
                .collect();
            metadata["toolDurationsMs"] = serde_json::Value::Object(durations);
        }
        status_callback(
            StatusUpdate::new(
                StatusKind::Done,
                outcome
                    .done_reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "completed".to_string()),
            )
            .with_metadata(metadata),
        );

        // A text-only response never reaches the post-tool hook, so any
        // still-buffered steering is surfaced for the transport.
        let (pending_count, pending_content) = {
            let steering = self.steering.lock().await;
            (steering.len(), steering.peek())
        };
        if let Some(content) = pending_content {
            status_callback(
                StatusUpdate::new(StatusKind::SteeringPending, content)
                    .with_metadata(serde_json::json!({ "steeringCount": pending_count })),
            );
        }

        if outcome.text.is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            outcome.text
        }
    }

    async fn select_model(&self, model_context: ModelContext) -> String {
        // An expired temporary override is cleared and failure counters
        // reset before model selection.
        {
            let mut control = self.control.lock().await;
            if let Some(ref model_override) = control.model_override
                && model_override.reset_at <= Utc::now()
            {
                info!(session_key = %self.identity, "temporary model override expired");
                control.model_override = None;
                control.provider_failure_count = 0;
            }
            if let Some(ref model_override) = control.model_override {
                return model_override.model.clone();
            }
        }

        match model_context {
            ModelContext::General => self.config.default_model.clone(),
            ModelContext::Summary => self
                .config
                .summary_model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
            ModelContext::Cron => self
                .config
                .cron_model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
        }
    }

    /// Builds the outgoing prompt: shadow-tracked steering is restored and
    /// any buffered messages are drained into the previous-execution
    /// envelope, then boot context and the fresh-conversation date header
    /// are prepended.
    async fn assemble_prompt(&self, prompt: &str) -> String {
        let buffered = {
            let mut steering = self.steering.lock().await;
            let restored = steering.restore_injected();
            if restored > 0 {
                debug!(
                    session_key = %self.identity,
                    restored,
                    "restored shadow-tracked steering into the prompt"
                );
            }
            steering.consume()
        };

        let mut assembled = String::new();

        // Fresh conversations get the date header first.
        if self.provider_session_id.lock().await.is_none() {
            let now = Local::now().format("%A, %Y-%m-%d %H:%M:%S %Z");
            assembled.push_str(&format!("Current date and time: {now}\n\n"));
        }

        if let Some(context) = self.control.lock().await.next_query_context.take() {
            assembled.push_str(&context);
            assembled.push_str("\n\n");
        }

        if let Some(buffered) = buffered {
            assembled.push_str(&format!(
                "[MESSAGES SENT DURING PREVIOUS EXECUTION]\n{buffered}\n[END PREVIOUS MESSAGES]\n\n"
            ));
        }

        assembled.push_str(prompt);
        assembled
    }
}

#[async_trait]
impl ToolHooks for Session {
    /// Stop check: a pending stop request fails the tool so the provider
    /// winds down.
    async fn pre_tool(&self, tool_name: &str, _input: &serde_json::Value) -> HookDecision {
        self.control.lock().await.current_tool = Some(tool_name.to_string());
        if self.stop_flag.load(Ordering::SeqCst) {
            debug!(session_key = %self.identity, tool = tool_name, "aborting tool, stop requested");
            return HookDecision::Abort {
                reason: "stop requested".to_string(),
            };
        }
        HookDecision::Continue
    }

    /// Steering injection: buffered messages are formatted, moved to the
    /// shadow list, and returned as a system observation for the turn.
    async fn post_tool(&self, _tool_name: &str, _input: &serde_json::Value) -> Option<String> {
        self.control.lock().await.current_tool = None;
        let mut steering = self.steering.lock().await;
        let formatted = steering.peek()?;
        let moved = steering.track_for_injection();
        debug!(session_key = %self.identity, injected = moved, "steering injected into turn");
        Some(format!(
            "[USER SENT MESSAGE DURING EXECUTION]\n{formatted}\n[END USER MESSAGE]"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_orchestrator::PolicyTable;

    fn session() -> Arc<Session> {
        let orchestrator = Arc::new(ProviderOrchestrator::new(PolicyTable::default()));
        Arc::new(Session::new(
            SessionIdentity::new("acme", "telegram", "42").unwrap(),
            std::env::temp_dir(),
            SessionConfig::default(),
            orchestrator,
            None,
        ))
    }

    #[tokio::test]
    async fn kill_increments_generation_and_extracts_steering() {
        let session = session();
        session.enqueue_steering("pending one", 1).await.unwrap();
        session.enqueue_steering("pending two", 2).await.unwrap();

        let outcome = session.kill().await;
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.messages[0].content, "pending one");
        assert_eq!(session.runtime_state().await.generation, 1);
        assert_eq!(session.provider_session_id().await, None);
        assert_eq!(session.steering_len().await, 0);

        // Idempotent: a second kill extracts nothing and bumps again.
        let outcome = session.kill().await;
        assert_eq!(outcome.count, 0);
        assert_eq!(session.runtime_state().await.generation, 2);
    }

    #[tokio::test]
    async fn stop_when_idle_reports_not_running() {
        let session = session();
        assert_eq!(session.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn restore_refuses_workdir_mismatch() {
        let session = session();
        let snapshot = SessionSnapshot {
            session_id: Some("prov-1".into()),
            working_dir: "/somewhere/else".into(),
            ..Default::default()
        };
        assert!(session.restore_from_data(&snapshot).await.is_err());
        assert_eq!(session.provider_session_id().await, None);
    }

    #[tokio::test]
    async fn restore_applies_counters() {
        let session = session();
        let snapshot = SessionSnapshot {
            session_id: Some("prov-1".into()),
            working_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            total_input_tokens: Some(111),
            total_queries: Some(3),
            context_window_usage: Some(50_000),
            context_window_size: Some(150_000),
            ..Default::default()
        };
        session.restore_from_data(&snapshot).await.unwrap();
        assert_eq!(session.provider_session_id().await.as_deref(), Some("prov-1"));
        let stats = session.stats().await;
        assert_eq!(stats.total_input_tokens, 111);
        assert_eq!(stats.total_queries, 3);
        assert_eq!(session.context_window_size().await, 150_000);
    }

    #[tokio::test]
    async fn warnings_fire_once_per_threshold() {
        let session = session();
        session
            .restore_from_data(&SessionSnapshot {
                working_dir: std::env::temp_dir().to_string_lossy().into_owned(),
                context_window_usage: Some(180_000),
                context_window_size: Some(200_000),
                ..Default::default()
            })
            .await
            .unwrap();

        // 90% usage crosses 70 and 85 but not 95.
        assert!(session.needs_warning_70().await);
        assert!(!session.needs_warning_70().await);
        assert!(session.needs_warning_85().await);
        assert!(!session.needs_warning_85().await);
        assert!(!session.needs_warning_95().await);
    }

    #[tokio::test]
    async fn mark_restored_suppresses_warnings_for_cooldown() {
        let session = session();
        session
            .restore_from_data(&SessionSnapshot {
                working_dir: std::env::temp_dir().to_string_lossy().into_owned(),
                context_window_usage: Some(190_000),
                context_window_size: Some(200_000),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(session.needs_warning_70().await);
        session.mark_restored().await;
        // Flags are reset but the cooldown holds them down.
        assert!(!session.needs_warning_70().await);
        assert!(!session.needs_warning_95().await);
    }

    #[tokio::test]
    async fn interrupt_flag_round_trip() {
        let session = session();
        assert!(!session.consume_interrupt().await);
        session.mark_interrupt().await;
        assert!(session.consume_interrupt().await);
        assert!(!session.consume_interrupt().await);
    }

    #[tokio::test]
    async fn begin_interrupt_is_idempotent_until_ended() {
        let session = session();
        assert!(session.begin_interrupt().await);
        assert!(!session.begin_interrupt().await);
        session.end_interrupt().await;
        assert!(session.begin_interrupt().await);
    }

    #[tokio::test]
    async fn pending_inputs_expire_lazily() {
        let session = session();
        session
            .set_pending_direct_input(serde_json::json!({"text": "hi"}))
            .await;
        assert!(session.take_pending_direct_input().await.is_some());
        // Taken once, gone after.
        assert!(session.take_pending_direct_input().await.is_none());
    }

    #[tokio::test]
    async fn steering_hint_records_current_tool() {
        let session = session();
        session
            .pre_tool("Bash", &serde_json::json!({"command": "sleep 1"}))
            .await;
        session.enqueue_steering("while tooling", 5).await.unwrap();
        let formatted = session.peek_steering().await.unwrap_or_default();
        assert!(formatted.contains("(during Bash)"));
    }
}
