// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hot reload of the schedule file.
//!
//! A polling watcher checks the schedule file's mtime (default every 2 s)
//! and a debouncer collapses bursts of writes (default 100 ms). On change
//! the scheduler stops all active job handles and re-schedules from the
//! new file contents; when the new file fails validation the jobs stay
//! stopped and the error is logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gangway_core::GangwayError;
use notify::{PollWatcher, RecursiveMode};
use notify_debouncer_mini::{Config, DebounceEventResult, Debouncer, new_debouncer_opt};
use tracing::{error, info, warn};

use crate::scheduler::Scheduler;

/// Keeps the debounced watcher and its forwarding task alive.
pub struct CronWatcher {
    _debouncer: Debouncer<PollWatcher>,
}

impl CronWatcher {
    /// Watches the scheduler's schedule file and reloads on change.
    pub fn spawn(scheduler: Arc<Scheduler>) -> Result<Self, GangwayError> {
        let path = scheduler.schedule_path();
        let poll = Duration::from_secs(scheduler_poll_secs(&scheduler));
        let debounce = Duration::from_millis(scheduler_debounce_ms(&scheduler));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let config = Config::default()
            .with_timeout(debounce)
            .with_notify_config(notify::Config::default().with_poll_interval(poll));

        let mut debouncer = new_debouncer_opt::<_, PollWatcher>(
            config,
            move |result: DebounceEventResult| match result {
                Ok(events) if !events.is_empty() => {
                    // The reload task coalesces; a full channel is fine.
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "schedule watch error"),
            },
        )
        .map_err(|e| GangwayError::Scheduler(format!("cannot create schedule watcher: {e}")))?;

        debouncer
            .watcher()
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                GangwayError::Scheduler(format!(
                    "cannot watch schedule file '{}': {e}",
                    path.display()
                ))
            })?;

        let reload_path: PathBuf = path.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                info!(file = %reload_path.display(), "schedule file changed, reloading");
                match scheduler.load_and_schedule(&reload_path).await {
                    Ok(count) => info!(jobs = count, "schedule reloaded"),
                    // Jobs were stopped before the failed parse; they stay
                    // stopped until the file is fixed.
                    Err(e) => error!(error = %e, "schedule reload failed, jobs stopped"),
                }
            }
        });

        info!(file = %path.display(), "schedule file watcher started");
        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn scheduler_poll_secs(scheduler: &Scheduler) -> u64 {
    scheduler.config().poll_secs.max(1)
}

fn scheduler_debounce_ms(scheduler: &Scheduler) -> u64 {
    scheduler.config().debounce_ms.max(10)
}
