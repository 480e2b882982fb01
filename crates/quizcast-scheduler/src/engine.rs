//! Scheduler Engine — owns the live job table and the tick loop.
//! Uses tokio::interval for ticking (sleeps between checks).
//!
//! Every change to the job table, and every write to weekly-mode
//! membership, happens under one async lock. A reload derives the new
//! job set first and only then swaps it in, so a failed derivation leaves
//! the previous jobs running.
//!
//! Changes made by other processes (task rows, the config file's weekly
//! section) are picked up by a periodic refresh inside the loop.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDateTime};
use quizcast_core::config::{MAX_MISFIRE_GRACE_SECS, QuizcastConfig, ScheduleSnapshot};
use quizcast_core::error::Result;
use tokio::sync::{Mutex, watch};

use crate::dispatch::Dispatcher;
use crate::jobs::{Job, JobSource, derive_group_jobs};
use crate::persistence::QuizDb;
use crate::push::{PushOutcome, Pusher};

struct SchedulerState {
    config: QuizcastConfig,
    /// Where `use_default` changes are written back. `None` keeps them in memory.
    config_path: Option<PathBuf>,
    jobs: BTreeMap<String, Job>,
}

/// The scheduler — manages push jobs and fires them.
pub struct Scheduler {
    db: Arc<QuizDb>,
    pusher: Arc<Pusher>,
    state: Mutex<SchedulerState>,
    check_interval: Duration,
    reload_interval: Duration,
    misfire_grace: chrono::Duration,
}

impl Scheduler {
    pub fn new(
        db: Arc<QuizDb>,
        pusher: Arc<Pusher>,
        config: QuizcastConfig,
        config_path: Option<PathBuf>,
    ) -> Self {
        let check_interval = Duration::from_secs(config.scheduler.check_interval_secs.max(1));
        let reload_interval = Duration::from_secs(config.scheduler.reload_interval_secs.max(1));
        let grace_secs = config.scheduler.misfire_grace_secs.min(MAX_MISFIRE_GRACE_SECS);
        let misfire_grace = chrono::Duration::seconds(grace_secs as i64);
        Self {
            db,
            pusher,
            state: Mutex::new(SchedulerState {
                config,
                config_path,
                jobs: BTreeMap::new(),
            }),
            check_interval,
            reload_interval,
            misfire_grace,
        }
    }

    /// Wire the dispatcher and push callback from config.
    pub fn from_config(db: Arc<QuizDb>, config: QuizcastConfig, config_path: Option<PathBuf>) -> Self {
        let dispatcher = Dispatcher::from_config(&config);
        if dispatcher.endpoint_count() == 0 {
            tracing::warn!("⚠️ No transports configured; pushes will not be delivered");
        }
        let pusher = Arc::new(Pusher::new(db.clone(), dispatcher, &config));
        Self::new(db, pusher, config, config_path)
    }

    pub fn db(&self) -> &Arc<QuizDb> {
        &self.db
    }

    pub async fn snapshot(&self) -> ScheduleSnapshot {
        self.state.lock().await.config.schedule_snapshot()
    }

    pub async fn config(&self) -> QuizcastConfig {
        self.state.lock().await.config.clone()
    }

    /// Rebuild the whole job table: every weekly-mode group plus every
    /// group with an active task. Returns the number of jobs.
    pub async fn reload_all(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let config = state.config.clone();
        self.rebuild(&mut state, config)
    }

    /// Re-read the weekly section of the config file (when there is one)
    /// and rebuild the job table from it and the task table. On any error
    /// the previous config and jobs stay in place.
    pub async fn refresh(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut config = state.config.clone();
        if let Some(path) = state.config_path.as_deref().filter(|p| p.exists()) {
            let on_disk = QuizcastConfig::load_from(path)?;
            config.apply_snapshot(&on_disk.schedule_snapshot());
        }
        self.rebuild(&mut state, config)
    }

    /// Derive every group's jobs under `config`, then commit config and jobs.
    fn rebuild(&self, state: &mut SchedulerState, config: QuizcastConfig) -> Result<usize> {
        let snapshot = config.schedule_snapshot();

        let mut groups: BTreeSet<String> = snapshot.use_default.clone();
        groups.extend(self.db.active_tasks()?.into_iter().map(|t| t.group_id));

        let mut derived = Vec::new();
        for group_id in &groups {
            derived.extend(derive_group_jobs(&self.db, &snapshot, group_id)?);
        }

        let now = Local::now().naive_local();
        state.jobs = install(&state.jobs, derived, now);
        state.config = config;
        tracing::info!(
            "📅 Loaded {} jobs for {} groups",
            state.jobs.len(),
            groups.len()
        );
        Ok(state.jobs.len())
    }

    /// Replace every job of one group with a fresh derivation.
    /// Returns the group's job count.
    pub async fn reload_tasks_for_group(&self, group_id: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let snapshot = state.config.schedule_snapshot();
        let derived = derive_group_jobs(&self.db, &snapshot, group_id)?;
        Ok(replace_group(&mut state.jobs, group_id, derived))
    }

    /// Move a group in or out of weekly mode, persist the config file, and
    /// reload the group, all under the job-table lock.
    pub async fn set_use_default(&self, group_id: &str, on: bool) -> Result<usize> {
        let mut state = self.state.lock().await;

        let mut config = state.config.clone();
        config.use_default.retain(|g| g != group_id);
        if on {
            config.use_default.push(group_id.to_string());
        }
        let derived = derive_group_jobs(&self.db, &config.schedule_snapshot(), group_id)?;
        if let Some(path) = &state.config_path {
            config.save_to(path)?;
        }

        state.config = config;
        let count = replace_group(&mut state.jobs, group_id, derived);
        tracing::info!(
            "🔀 Group {} {} weekly schedule ({} jobs)",
            group_id,
            if on { "joined" } else { "left" },
            count
        );
        Ok(count)
    }

    /// Collect jobs due at `now` and move each to its next slot.
    ///
    /// Firings later than the grace window are dropped, not fired late.
    pub async fn due_jobs(&self, now: NaiveDateTime) -> Vec<Job> {
        let mut state = self.state.lock().await;
        let mut due = Vec::new();

        for job in state.jobs.values_mut() {
            let Some(scheduled) = job.next_run else {
                job.next_run = job.schedule.next_after(now);
                continue;
            };
            if scheduled > now {
                continue;
            }

            if now - scheduled > self.misfire_grace {
                tracing::warn!(
                    "⏭️ Job {} missed its {} slot by more than {}s, dropped",
                    job.id,
                    scheduled.format("%Y-%m-%d %H:%M"),
                    self.misfire_grace.num_seconds()
                );
            } else {
                due.push(job.clone());
            }
            job.next_run = job.schedule.next_after(now);
        }

        due
    }

    /// Fire one push for (group, domain) right away, outside any trigger.
    pub async fn push_now(&self, group_id: &str, domain_id: i64) -> Result<PushOutcome> {
        let source = if self.snapshot().await.uses_default(group_id) {
            JobSource::Default {
                weekday: Local::now().weekday(),
            }
        } else {
            JobSource::Manual
        };
        self.pusher.push(group_id, domain_id, source).await
    }

    pub async fn job_ids(&self) -> Vec<String> {
        self.state.lock().await.jobs.keys().cloned().collect()
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.values().cloned().collect()
    }

    pub async fn jobs_for_group(&self, group_id: &str) -> Vec<Job> {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .filter(|j| j.group_id == group_id)
            .cloned()
            .collect()
    }
}

/// Build a job table from `derived`, keeping `next_run` of jobs whose
/// trigger did not change.
fn install(previous: &BTreeMap<String, Job>, derived: Vec<Job>, now: NaiveDateTime) -> BTreeMap<String, Job> {
    let mut jobs = BTreeMap::new();
    for mut job in derived {
        job.next_run = match previous.get(job.id.as_str()) {
            Some(old) if old.same_trigger(&job) => old.next_run,
            _ => job.schedule.next_after(now),
        };
        if job.next_run.is_none() {
            tracing::warn!("⚠️ Job {} has no upcoming slot, skipped", job.id);
            continue;
        }
        tracing::info!(
            "📅 Job {} registered ({}), next at {}",
            job.id,
            job.schedule.expression(),
            job.next_run
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default()
        );
        jobs.insert(job.id.to_string(), job);
    }
    jobs
}

/// Swap one group's jobs for `derived`; other groups are untouched.
fn replace_group(jobs: &mut BTreeMap<String, Job>, group_id: &str, derived: Vec<Job>) -> usize {
    let previous: BTreeMap<String, Job> = jobs
        .iter()
        .filter(|(_, j)| j.group_id == group_id)
        .map(|(id, j)| (id.clone(), j.clone()))
        .collect();
    jobs.retain(|_, j| j.group_id != group_id);

    let fresh = install(&previous, derived, Local::now().naive_local());
    let count = fresh.len();
    jobs.extend(fresh);
    tracing::info!("🔄 Reloaded group {}: {} jobs", group_id, count);
    count
}

/// Spawn the scheduler loop. Each due job is pushed on its own task so a
/// slow delivery never holds up the next tick. Every `reload_interval` the
/// job table is refreshed from the store and the config file. Stops when
/// `shutdown` flips to `true` or its sender is dropped.
pub async fn spawn_scheduler(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        "⏰ Scheduler started (check every {}s, refresh every {}s)",
        scheduler.check_interval.as_secs(),
        scheduler.reload_interval.as_secs()
    );

    let mut interval = tokio::time::interval(scheduler.check_interval);
    let mut refresh = tokio::time::interval_at(
        tokio::time::Instant::now() + scheduler.reload_interval,
        scheduler.reload_interval,
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = refresh.tick() => {
                if let Err(e) = scheduler.refresh().await {
                    tracing::warn!("⚠️ Refresh failed, keeping current jobs: {e}");
                }
                continue;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let due = scheduler.due_jobs(Local::now().naive_local()).await;
        for job in due {
            let pusher = scheduler.pusher.clone();
            tokio::spawn(async move {
                tracing::info!("🔔 Job {} fired", job.id);
                match pusher.push(&job.group_id, job.domain_id, job.source).await {
                    Ok(outcome) => tracing::info!("📣 [{}] {}", job.id, outcome),
                    Err(e) => tracing::error!("❌ Job {} failed: {e}", job.id),
                }
            });
        }
    }

    tracing::info!("🛑 Scheduler stopped");
}
