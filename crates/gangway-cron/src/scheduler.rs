// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cron job scheduling and execution.
//!
//! Jobs run through the same session fabric as user traffic, but under
//! scheduler-owned session keys, so the busy predicate only ever looks at
//! scheduler sessions: user queries never block cron and vice versa. A job
//! that fires while another is executing goes to the pending queue (cap
//! 100, head-drop) and a drain timer retries it; a job that would exceed
//! the hourly rate cap is skipped outright.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use gangway_config::model::CronConfig;
use gangway_core::{GangwayError, null_status_callback};
use gangway_session::{ModelContext, SessionManager};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::schedule::{CronScheduleDef, parse_schedule_file, validate_schedule_path};

/// Notification errors are truncated to this length before escaping.
const ERROR_TRUNCATE: usize = 300;

/// Receives job completion/failure notices for the primary user.
#[async_trait]
pub trait CronNotifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// One queued job awaiting a free slot.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub name: String,
    pub queued_at: DateTime<Utc>,
}

struct JobHandle {
    name: String,
    stop: CancellationToken,
}

pub struct Scheduler {
    config: CronConfig,
    workdir: PathBuf,
    manager: Arc<SessionManager>,
    notifier: Option<Arc<dyn CronNotifier>>,

    /// Current schedule set, swapped atomically on reload.
    schedules: ArcSwap<Vec<CronScheduleDef>>,
    handles: Mutex<Vec<JobHandle>>,
    pending: Mutex<VecDeque<PendingJob>>,
    /// Local job lock: true while a job executes.
    executing: AtomicBool,
    /// Execution timestamps within the rate window.
    ledger: Mutex<VecDeque<DateTime<Utc>>>,
    drain_running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        config: CronConfig,
        workdir: PathBuf,
        manager: Arc<SessionManager>,
        notifier: Option<Arc<dyn CronNotifier>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            workdir,
            manager,
            notifier,
            schedules: ArcSwap::from_pointee(Vec::new()),
            handles: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            executing: AtomicBool::new(false),
            ledger: Mutex::new(VecDeque::new()),
            drain_running: AtomicBool::new(false),
        })
    }

    /// The schedule file path under the working directory.
    pub fn schedule_path(&self) -> PathBuf {
        self.workdir.join(&self.config.file)
    }

    pub fn config(&self) -> &CronConfig {
        &self.config
    }

    /// Loads, validates, and (re)schedules the configured file.
    ///
    /// Active handles are stopped before the new set is scheduled; on
    /// parse failure the previous jobs stay stopped and the error is
    /// logged by the caller.
    pub async fn load_and_schedule(self: &Arc<Self>, path: &Path) -> Result<usize, GangwayError> {
        let allowed: Vec<PathBuf> = self
            .config
            .allowed_config_dirs
            .iter()
            .map(PathBuf::from)
            .collect();
        validate_schedule_path(path, &self.workdir, &allowed)?;

        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GangwayError::Scheduler(format!("cannot read schedule file: {e}")))?;

        self.stop_all().await;
        let file = parse_schedule_file(&yaml, self.config.max_prompt_length)?;
        let count = self.schedule(file.schedules).await;
        info!(jobs = count, file = %path.display(), "cron schedule loaded");
        Ok(count)
    }

    /// Replaces the schedule set with the given definitions. Returns how
    /// many enabled jobs were scheduled.
    pub async fn schedule(self: &Arc<Self>, defs: Vec<CronScheduleDef>) -> usize {
        self.stop_all().await;
        self.schedules.store(Arc::new(defs.clone()));

        let mut handles = self.handles.lock().await;
        let mut scheduled = 0;
        for def in defs.into_iter().filter(CronScheduleDef::is_enabled) {
            let cron = match croner::Cron::new(&def.cron).parse() {
                Ok(cron) => cron,
                Err(e) => {
                    // Parsed at validation; a failure here means the defs
                    // bypassed parse_schedule_file.
                    error!(job = def.name.as_str(), error = %e, "unschedulable cron expression");
                    continue;
                }
            };

            let stop = CancellationToken::new();
            handles.push(JobHandle {
                name: def.name.clone(),
                stop: stop.clone(),
            });

            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    let now = Local::now();
                    let next = match cron.find_next_occurrence(&now, false) {
                        Ok(next) => next,
                        Err(e) => {
                            error!(job = def.name.as_str(), error = %e, "no next occurrence");
                            break;
                        }
                    };
                    let delay = (next - now).to_std().unwrap_or_default();
                    debug!(job = def.name.as_str(), delay_secs = delay.as_secs(), "job armed");

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {
                            scheduler.fire(&def.name).await;
                        }
                        () = stop.cancelled() => break,
                    }
                }
            });
            scheduled += 1;
        }
        scheduled
    }

    /// Cancels every active job handle.
    pub async fn stop_all(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.stop.cancel();
        }
    }

    pub async fn active_job_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Execution timestamps inside the current rate window.
    pub async fn executions_in_window(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        self.ledger.lock().await.iter().filter(|t| **t > cutoff).count()
    }

    /// Fires a job by name: skip when rate-limited, queue when busy,
    /// execute otherwise.
    pub async fn fire(self: &Arc<Self>, name: &str) {
        if self.rate_limited().await {
            info!(job = name, "cron job skipped by hourly rate cap");
            return;
        }
        if self.is_busy().await {
            self.enqueue(name).await;
            self.ensure_drain_timer();
            return;
        }
        self.execute(name).await;
    }

    /// Busy means another job holds the lock or any scheduler-owned
    /// session is mid-query.
    async fn is_busy(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
            || self.manager.any_scheduler_session_running().await
    }

    async fn rate_limited(&self) -> bool {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        let mut ledger = self.ledger.lock().await;
        while ledger.front().is_some_and(|t| *t <= cutoff) {
            ledger.pop_front();
        }
        ledger.len() >= self.config.max_jobs_per_hour
    }

    async fn enqueue(&self, name: &str) {
        let mut pending = self.pending.lock().await;
        if pending.len() >= self.config.queue_capacity {
            let dropped = pending.pop_front();
            warn!(
                dropped = dropped.map(|j| j.name).unwrap_or_default().as_str(),
                "cron queue full, head dropped"
            );
        }
        pending.push_back(PendingJob {
            name: name.to_string(),
            queued_at: Utc::now(),
        });
        debug!(job = name, depth = pending.len(), "cron job queued while busy");
    }

    /// Starts the queue drain timer if it is not already running.
    fn ensure_drain_timer(self: &Arc<Self>) {
        if self.drain_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let tick = std::time::Duration::from_secs(scheduler.config.drain_tick_secs);
            loop {
                tokio::time::sleep(tick).await;
                if scheduler.pending.lock().await.is_empty() {
                    scheduler.drain_running.store(false, Ordering::SeqCst);
                    return;
                }
                if scheduler.is_busy().await {
                    continue;
                }
                let job = scheduler.pending.lock().await.pop_front();
                if let Some(job) = job {
                    debug!(job = job.name.as_str(), "draining queued cron job");
                    scheduler.execute(&job.name).await;
                }
            }
        });
    }

    /// Runs one job to completion under the job lock.
    async fn execute(self: &Arc<Self>, name: &str) {
        if self.executing.swap(true, Ordering::SeqCst) {
            // Lost the race to another execution.
            self.enqueue(name).await;
            self.ensure_drain_timer();
            return;
        }
        self.ledger.lock().await.push_back(Utc::now());

        let def = self
            .schedules
            .load()
            .iter()
            .find(|d| d.name == name)
            .cloned();

        if let Some(def) = def {
            info!(job = name, "cron job starting");
            let result = self.run_job(&def).await;
            match result {
                Ok(_) => {
                    info!(job = name, "cron job completed");
                    if def.wants_notify()
                        && let Some(ref notifier) = self.notifier
                    {
                        notifier.notify(&format!("✅ Cron '{name}' completed")).await;
                    }
                }
                Err(e) => {
                    error!(job = name, error = %e, "cron job failed");
                    if def.wants_notify()
                        && let Some(ref notifier) = self.notifier
                    {
                        let detail = html_escape(&truncate(&e.to_string(), ERROR_TRUNCATE));
                        notifier
                            .notify(&format!("❌ Cron '{name}' failed: {detail}"))
                            .await;
                    }
                }
            }
        } else {
            warn!(job = name, "fired job no longer in the schedule set");
        }

        self.executing.store(false, Ordering::SeqCst);
        if !self.pending.lock().await.is_empty() {
            self.ensure_drain_timer();
        }
    }

    async fn run_job(&self, def: &CronScheduleDef) -> Result<String, GangwayError> {
        let session = self.manager.scheduler_session(&def.name).await?;
        session
            .send_message_streaming(&def.prompt, ModelContext::Cron, null_status_callback(), None)
            .await
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
