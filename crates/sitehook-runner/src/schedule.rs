//! Scheduled builds.
//!
//! Each configured schedule becomes one task that submits waiting builds to
//! its target's runner. Because a task waits for its build before it fires
//! again, a schedule never has two runs in flight.

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sitehook_config::{Schedule, ScheduledBuild, parse_cron};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::{BuildOptions, BuildRunner, RunnerError};

/// A schedule and when it fires next.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub name: String,
    #[serde(flatten)]
    pub build: ScheduledBuild,
    pub next_run: Option<DateTime<Utc>>,
}

struct Entry {
    build: ScheduledBuild,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    handle: JoinHandle<()>,
}

/// Owns the tasks driving scheduled builds.
pub struct Scheduler {
    entries: Mutex<Vec<Entry>>,
}

impl Scheduler {
    /// Start one task per schedule. Schedules naming an unknown target, and
    /// schedules that cannot be driven, are skipped with a warning.
    pub fn start(
        runners: &BTreeMap<String, Arc<BuildRunner>>,
        schedules: &[ScheduledBuild],
    ) -> Self {
        let mut entries = Vec::with_capacity(schedules.len());
        for build in schedules {
            let Some(runner) = runners.get(&build.target) else {
                warn!(job = %build.job_name(), "Schedule for unknown target ignored");
                continue;
            };
            if let Err(e) = build.schedule.validate() {
                warn!(job = %build.job_name(), error = %e, "Invalid schedule ignored");
                continue;
            }

            let next_run = Arc::new(Mutex::new(None));
            let handle = tokio::spawn(run_schedule(
                runner.clone(),
                build.clone(),
                next_run.clone(),
            ));
            info!(job = %build.job_name(), schedule = %build.schedule, "Scheduled build registered");
            entries.push(Entry {
                build: build.clone(),
                next_run,
                handle,
            });
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Scheduled jobs of one target.
    pub fn jobs_for(&self, target: &str) -> Vec<ScheduledJob> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.build.target == target)
            .map(|entry| ScheduledJob {
                name: entry.build.job_name(),
                build: entry.build.clone(),
                next_run: *entry.next_run.lock(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Stop firing. Builds already submitted stay with their runners.
    pub fn shutdown(&self) {
        for entry in self.entries.lock().drain(..) {
            entry.handle.abort();
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().iter() {
            entry.handle.abort();
        }
    }
}

async fn run_schedule(
    runner: Arc<BuildRunner>,
    build: ScheduledBuild,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
) {
    let job = build.job_name();
    match &build.schedule {
        Schedule::Startup => {
            *next_run.lock() = Some(Utc::now());
            fire(&runner, &job).await;
            *next_run.lock() = None;
        }
        Schedule::Every { period } => {
            let period = *period;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                *next_run.lock() = chrono::Duration::from_std(period)
                    .ok()
                    .and_then(|period| Utc::now().checked_add_signed(period));
                ticker.tick().await;
                fire(&runner, &job).await;
            }
        }
        Schedule::Cron { expression } => {
            let calendar = match parse_cron(expression) {
                Ok(calendar) => calendar,
                Err(e) => {
                    warn!(job = %job, error = %e, "Cron schedule stopped");
                    return;
                }
            };
            // Times passed while a build ran are skipped, not replayed.
            let mut after = Local::now();
            loop {
                let Some(next) = calendar.after(&after).next() else {
                    info!(job = %job, "Cron schedule has no upcoming run");
                    *next_run.lock() = None;
                    return;
                };
                *next_run.lock() = Some(next.with_timezone(&Utc));

                let delay = (next - Local::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::time::sleep_until(Instant::now() + delay).await;
                fire(&runner, &job).await;
                after = next.max(Local::now());
            }
        }
    }
}

async fn fire(runner: &BuildRunner, job: &str) {
    info!(job, target_name = %runner.name(), "Scheduled build firing");
    let options = BuildOptions {
        wait: true,
        ignore_pull_error: true,
        ..Default::default()
    };
    match runner.build(options).await {
        Ok(Some(outcome)) => info!(job, outcome = %outcome, "Scheduled build done"),
        Ok(None) => {}
        Err(RunnerError::Cancelled) => info!(job, "Scheduled build superseded"),
        Err(e) => warn!(job, error = %e, "Scheduled build failed"),
    }
}
