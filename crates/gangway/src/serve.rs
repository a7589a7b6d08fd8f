// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `gangway serve` command implementation.
//!
//! Wires the orchestrator, session manager, scheduler, and stores together,
//! runs the boot protocol (pending forms, restart context, verification
//! task), installs signal handlers, and executes the graceful-shutdown
//! protocol on SIGTERM. SIGINT exits without saving.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gangway_config::model::GangwayConfig;
use gangway_core::{GangwayError, ProviderBackend, RestartStore, ShutdownContext, VerificationTask};
use gangway_cron::{CronWatcher, Scheduler};
use gangway_orchestrator::{PolicyTable, ProviderOrchestrator};
use gangway_session::{ManagerConfig, Session, SessionConfig, SessionManager};
use gangway_store::{
    FileRestartStore, FormStore, PendingSteeringCarryover, RestartMarker, SnapshotStore,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Restart-context write budget during shutdown.
const SHUTDOWN_CONTEXT_TIMEOUT: Duration = Duration::from_secs(3);

/// Outbound messages get this long to drain before exit.
const OUTBOUND_DRAIN: Duration = Duration::from_secs(1);

/// Which signal ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// SIGTERM: run the full shutdown protocol.
    Graceful,
    /// SIGINT: exit without saving.
    Immediate,
}

/// The assembled gateway process.
pub struct GatewayRuntime {
    pub config: GangwayConfig,
    pub manager: Arc<SessionManager>,
    pub scheduler: Arc<Scheduler>,
    pub restart_store: Arc<FileRestartStore>,
    pub forms: FormStore,
    verification: Mutex<Option<VerificationTask>>,
    _watcher: Option<CronWatcher>,
}

impl GatewayRuntime {
    /// Builds every component and starts the scheduler. Provider backends
    /// are registered by the deployment; a build without any still serves
    /// sessions, which then fail queries with an actionable error.
    pub async fn build(
        config: GangwayConfig,
        backends: Vec<Arc<dyn ProviderBackend>>,
    ) -> Result<Self, GangwayError> {
        let data_dir = PathBuf::from(&config.sessions.data_dir);
        let working_dir = PathBuf::from(&config.sessions.working_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| GangwayError::Persistence {
                source: Box::new(e),
            })?;

        let policies = match config.provider.retry_policies {
            Some(ref json) => PolicyTable::from_json(json)?,
            None => PolicyTable::default(),
        };
        let mut orchestrator = ProviderOrchestrator::new(policies);
        for backend in backends {
            info!(provider = backend.id(), "provider backend registered");
            orchestrator.register(backend);
        }
        if orchestrator.backend(&config.provider.primary).is_none() {
            warn!(
                provider = config.provider.primary.as_str(),
                "primary provider backend is not registered; queries will fail"
            );
        }
        let orchestrator = Arc::new(orchestrator);

        let snapshots = Arc::new(SnapshotStore::new(data_dir.join("sessions")));
        let forms = FormStore::new(data_dir.join("pending-forms.json"));
        let restart_store = Arc::new(FileRestartStore::new(
            config.gateway.name.clone(),
            working_dir.clone(),
        ));

        let session_config = SessionConfig {
            primary_provider: config.provider.primary.clone(),
            fallback_provider: config.provider.fallback.clone(),
            default_model: config.provider.model.clone(),
            summary_model: config.provider.summary_model.clone(),
            cron_model: config.provider.cron_model.clone(),
            max_thinking_tokens: config.provider.max_thinking_tokens,
            path_to_executable: config.provider.path_to_executable.clone().map(PathBuf::from),
            context_window: config.sessions.context_window,
            warning_cooldown_queries: config.sessions.warning_cooldown_queries,
            stale_session_marker: config.provider.stale_session_marker.clone(),
            allowed_paths: config.safety.allowed_paths.iter().map(PathBuf::from).collect(),
            rate_limit_requests: config.limits.requests,
            rate_limit_window: Duration::from_secs(config.limits.window_secs),
        };

        let manager = Arc::new(SessionManager::new(
            ManagerConfig {
                tenant: config.gateway.tenant.clone(),
                working_dir: working_dir.clone(),
                alias_root: PathBuf::from(&config.sessions.workdir_alias_root),
                max_sessions: config.sessions.max_sessions,
                session_ttl: Duration::from_secs(config.sessions.ttl_hours * 60 * 60),
                session: session_config,
            },
            orchestrator,
            snapshots,
        ));

        let scheduler = Scheduler::new(
            config.cron.clone(),
            working_dir.clone(),
            Arc::clone(&manager),
            None,
        );

        let schedule_path = scheduler.schedule_path();
        let watcher = if schedule_path.exists() {
            match scheduler.load_and_schedule(&schedule_path).await {
                Ok(count) => info!(jobs = count, "cron schedule active"),
                Err(e) => error!(error = %e, "initial cron schedule load failed"),
            }
            match CronWatcher::spawn(Arc::clone(&scheduler)) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "cron hot reload unavailable");
                    None
                }
            }
        } else {
            info!(file = %schedule_path.display(), "no cron schedule file, scheduler idle");
            None
        };

        Ok(Self {
            config,
            manager,
            scheduler,
            restart_store,
            forms,
            verification: Mutex::new(None),
            _watcher: watcher,
        })
    }

    /// The session boot context and shutdown summaries attach to.
    pub async fn primary_session(&self) -> Result<Option<Arc<Session>>, GangwayError> {
        match self.config.gateway.primary_chat_id {
            Some(ref chat_id) => Ok(Some(self.manager.get_session(chat_id, None).await?)),
            None => Ok(None),
        }
    }

    /// Registers the command the next boot must run to verify a change.
    pub async fn set_verification_task(&self, task: VerificationTask) {
        *self.verification.lock().await = Some(task);
    }

    /// Boot protocol: load pending forms, run any verification task from
    /// the restart marker, and attach restart context to the primary
    /// session's next query.
    pub async fn boot(&self) -> Result<(), GangwayError> {
        let forms = self.forms.load().await?;
        if !forms.is_empty() {
            info!(count = forms.len(), "pending forms restored");
        }

        let Some(primary) = self.primary_session().await? else {
            info!("no primary chat configured, skipping restart context");
            return Ok(());
        };

        let mut boot_context = Vec::new();

        if let Some(carryover) = self.restart_store.take_pending_steering().await? {
            info!(count = carryover.count, "steering carried over from before restart");
            boot_context.push(format!(
                "[MESSAGES SENT BEFORE RESTART]\n{}\n[END MESSAGES SENT BEFORE RESTART]",
                carryover.content
            ));
        }

        if let Some(marker) = self.restart_store.take_restart_marker().await?
            && let Some(task) = marker.verification
        {
            match run_verification_command(&task.command).await {
                Ok(true) => {
                    info!(task_id = task.task_id.as_str(), "verification task passed");
                }
                Ok(false) => {
                    warn!(task_id = task.task_id.as_str(), "verification task failed");
                    boot_context.push(format!(
                        "The restart verification for task {} failed. Command `{}` exited \
                         non-zero. Investigate and fix: {}",
                        task.task_id, task.command, task.description
                    ));
                }
                Err(e) => {
                    warn!(task_id = task.task_id.as_str(), error = %e, "verification did not run");
                }
            }
        }

        if let Some(context) = self.restart_store.take_restart_context().await? {
            boot_context.push(context);
        }

        if !boot_context.is_empty() {
            primary.set_next_query_context(boot_context.join("\n\n")).await;
            info!("restart context attached to the primary session");
        }
        Ok(())
    }

    /// Graceful-shutdown protocol: drain steering to disk, write the
    /// restart context and marker, stop the scheduler, snapshot sessions,
    /// and let outbound messages drain.
    pub async fn shutdown_graceful(&self) -> Result<(), GangwayError> {
        info!("graceful shutdown starting");

        // Drain buffered steering across all sessions to disk.
        let mut pieces = Vec::new();
        let mut count = 0;
        for session in self.manager.resident_sessions().await {
            if let Some(content) = session.peek_steering().await {
                count += session.steering_len().await;
                pieces.push(content);
            }
        }
        if count > 0 {
            let carryover = PendingSteeringCarryover {
                count,
                content: pieces.join("\n---\n"),
                timestamp: Utc::now(),
            };
            if let Err(e) = self.restart_store.save_pending_steering(&carryover).await {
                warn!(error = %e, "steering carry-over write failed");
            }
        }

        let verification = self.verification.lock().await.clone();

        // Restart context markdown, best effort under a deadline.
        let context = ShutdownContext {
            summary: format!(
                "Gateway shut down gracefully with {} resident session(s).",
                self.manager.global_stats().await.sessions
            ),
            verification: verification.clone(),
            written_at: Utc::now(),
        };
        let write = self.restart_store.write_shutdown_context(&context);
        if tokio::time::timeout(SHUTDOWN_CONTEXT_TIMEOUT, write)
            .await
            .is_err()
        {
            warn!("restart context write timed out");
        }

        // Restart announcement marker for the next boot.
        if let Some(ref chat_id) = self.config.gateway.primary_chat_id {
            let marker = RestartMarker {
                chat_id: chat_id.clone(),
                message_id: None,
                timestamp: Utc::now(),
                verification,
            };
            if let Err(e) = self.restart_store.write_restart_marker(&marker).await {
                warn!(error = %e, "restart marker write failed");
            }
        }

        self.scheduler.stop_all().await;
        let saved = self.manager.save_all().await;
        info!(saved, "session snapshots written");

        tokio::time::sleep(OUTBOUND_DRAIN).await;
        info!("graceful shutdown complete");
        Ok(())
    }
}

/// Runs a verification command through the shell; `Ok(true)` on exit 0.
async fn run_verification_command(command: &str) -> Result<bool, GangwayError> {
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .await
        .map_err(|e| GangwayError::Internal(format!("verification command failed to spawn: {e}")))?;
    Ok(status.success())
}

/// Installs SIGTERM (graceful) and SIGINT (immediate) handlers.
pub fn install_signal_handler() -> tokio::sync::mpsc::Receiver<ShutdownKind> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                error!("failed to install SIGTERM handler");
                return;
            };

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT, immediate shutdown");
                    let _ = tx.send(ShutdownKind::Immediate).await;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, graceful shutdown");
                    let _ = tx.send(ShutdownKind::Graceful).await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, graceful shutdown");
            let _ = tx.send(ShutdownKind::Graceful).await;
        }
    });

    rx
}

/// Runs the `gangway serve` command until a shutdown signal arrives.
pub async fn run_serve(config: GangwayConfig) -> Result<(), GangwayError> {
    init_tracing(&config.gateway.log_level);
    info!("starting gangway serve");

    // Concrete provider adapters are linked by the deployment build and
    // registered here.
    let backends: Vec<Arc<dyn ProviderBackend>> = Vec::new();
    let runtime = GatewayRuntime::build(config, backends).await?;
    runtime.boot().await?;

    let mut signals = install_signal_handler();
    match signals.recv().await {
        Some(ShutdownKind::Graceful) => {
            runtime.shutdown_graceful().await?;
        }
        Some(ShutdownKind::Immediate) | None => {
            info!("exiting without saving");
        }
    }

    info!("gangway serve shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber from the configured log level.
fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_config::model::GangwayConfig;
    use gangway_test_utils::MockBackend;
    use tracing_test::traced_test;

    fn test_config(dir: &std::path::Path) -> GangwayConfig {
        let mut config = GangwayConfig::default();
        config.gateway.name = format!(
            "gangway-test-{}",
            dir.file_name().unwrap().to_string_lossy()
        );
        config.gateway.primary_chat_id = Some("primary".into());
        config.provider.primary = "mock".into();
        config.sessions.data_dir = dir.join("data").to_string_lossy().into_owned();
        config.sessions.working_dir = dir.to_string_lossy().into_owned();
        config.sessions.workdir_alias_root =
            dir.join("aliases").to_string_lossy().into_owned();
        config
    }

    async fn runtime(dir: &std::path::Path) -> GatewayRuntime {
        GatewayRuntime::build(
            test_config(dir),
            vec![Arc::new(MockBackend::new("mock")) as Arc<dyn ProviderBackend>],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn shutdown_then_boot_round_trips_verification_success() {
        let dir = tempfile::tempdir().unwrap();

        let first = runtime(dir.path()).await;
        first
            .set_verification_task(VerificationTask {
                command: "true".into(),
                task_id: "bd-1".into(),
                description: "confirm the fix".into(),
            })
            .await;
        first.shutdown_graceful().await.unwrap();

        // Boot a fresh process image over the same directories.
        let second = runtime(dir.path()).await;
        second.boot().await.unwrap();

        // Verification passed, so only the restart-context markdown is
        // attached.
        let primary = second.primary_session().await.unwrap().unwrap();
        let context = primary.next_query_context().await.unwrap();
        assert!(context.contains("shut down gracefully"));
        assert!(!context.contains("failed"));

        assert!(logs_contain("verification task passed"));
        assert!(logs_contain("restart context attached"));
    }

    #[tokio::test]
    async fn failed_verification_attaches_fix_request() {
        let dir = tempfile::tempdir().unwrap();

        let first = runtime(dir.path()).await;
        first
            .set_verification_task(VerificationTask {
                command: "exit 3".into(),
                task_id: "bd-9".into(),
                description: "watcher must restart cleanly".into(),
            })
            .await;
        first.shutdown_graceful().await.unwrap();

        let second = runtime(dir.path()).await;
        second.boot().await.unwrap();

        let primary = second.primary_session().await.unwrap().unwrap();
        let context = primary.next_query_context().await.unwrap();
        assert!(context.contains("bd-9"));
        assert!(context.contains("exit 3"));
        assert!(context.contains("failed"));
    }

    #[tokio::test]
    async fn shutdown_drains_steering_for_next_boot() {
        let dir = tempfile::tempdir().unwrap();

        let first = runtime(dir.path()).await;
        let primary = first.primary_session().await.unwrap().unwrap();
        primary.enqueue_steering("left behind", 1).await.unwrap();
        first.shutdown_graceful().await.unwrap();

        let second = runtime(dir.path()).await;
        second.boot().await.unwrap();

        let primary = second.primary_session().await.unwrap().unwrap();
        let context = primary.next_query_context().await.unwrap();
        assert!(context.contains("[MESSAGES SENT BEFORE RESTART]"));
        assert!(context.contains("left behind"));
    }

    #[tokio::test]
    async fn boot_without_primary_chat_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.gateway.primary_chat_id = None;

        let runtime = GatewayRuntime::build(config, Vec::new()).await.unwrap();
        runtime.boot().await.unwrap();
        assert!(runtime.primary_session().await.unwrap().is_none());
    }
}
