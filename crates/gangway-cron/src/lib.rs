// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cron scheduler for the Gangway gateway.
//!
//! Runs named cron jobs against the same session fabric as user traffic,
//! isolated under scheduler-owned session keys, with a pending queue, an
//! hourly rate cap, and hot reload of the schedule file.

pub mod schedule;
pub mod scheduler;
pub mod watcher;

pub use schedule::{CronScheduleDef, ScheduleFile, parse_schedule_file, validate_schedule_path};
pub use scheduler::{CronNotifier, PendingJob, Scheduler};
pub use watcher::CronWatcher;
