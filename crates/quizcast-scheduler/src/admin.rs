//! Admin service — reconfiguration entry points used by the command layer.
//!
//! Every mutation ends with a reload of the affected group and answers
//! with a confirmation text. Validation failures come back as `Err`.

use std::sync::Arc;

use quizcast_core::config::parse_push_time;
use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::types::{Domain, StrategyKind};

use crate::engine::Scheduler;
use crate::persistence::QuizDb;
use crate::strategy::strategy_for_task;

pub struct Admin {
    db: Arc<QuizDb>,
    scheduler: Arc<Scheduler>,
}

impl Admin {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            db: scheduler.db().clone(),
            scheduler,
        }
    }

    fn domain(&self, name: &str) -> Result<Domain> {
        self.db
            .domain_by_name(name)?
            .ok_or_else(|| QuizcastError::not_found(format!("domain [{name}] does not exist")))
    }

    /// Normalized "HH:MM", or the configured default when omitted.
    async fn push_time(&self, time: Option<&str>) -> Result<String> {
        match time {
            Some(t) => Ok(parse_push_time(t)?.format("%H:%M").to_string()),
            None => Ok(self.scheduler.config().await.scheduler.default_push_time),
        }
    }

    /// Turn one domain on (at `time`) or off for a group.
    pub async fn set_domain(&self, group_id: &str, domain_name: &str, on: bool, time: Option<&str>) -> Result<String> {
        let push_time = self.push_time(time).await?;
        let domain = self.domain(domain_name)?;

        match self.db.task(group_id, domain.id)? {
            Some(existing) if !on => {
                self.db
                    .upsert_task(group_id, domain.id, &existing.push_time, false)?
            }
            _ => self.db.upsert_task(group_id, domain.id, &push_time, on)?,
        }
        self.scheduler.reload_tasks_for_group(group_id).await?;

        Ok(if on {
            format!("✅ Push of [{}] enabled at {}", domain.name, push_time)
        } else {
            format!("✅ Push of [{}] disabled", domain.name)
        })
    }

    /// Turn every domain on or off. Turning everything off also leaves
    /// weekly mode.
    pub async fn set_all(&self, group_id: &str, on: bool, time: Option<&str>) -> Result<String> {
        if on {
            let push_time = self.push_time(time).await?;
            let n = self.db.set_all_domains_active(group_id, &push_time)?;
            self.scheduler.reload_tasks_for_group(group_id).await?;
            return Ok(format!("✅ Push of all {n} domains enabled at {push_time}"));
        }

        self.db.deactivate_all(group_id)?;
        if self.scheduler.snapshot().await.uses_default(group_id) {
            self.scheduler.set_use_default(group_id, false).await?;
        } else {
            self.scheduler.reload_tasks_for_group(group_id).await?;
        }
        Ok("✅ Push of all domains disabled".to_string())
    }

    /// Switch a group between the weekly schedule and its own settings.
    pub async fn set_default(&self, group_id: &str, on: bool) -> Result<String> {
        let jobs = self.scheduler.set_use_default(group_id, on).await?;
        Ok(if on {
            format!("✅ Group now follows the weekly schedule ({jobs} jobs)")
        } else {
            format!("✅ Group now uses its own settings ({jobs} jobs)")
        })
    }

    /// Set the strategy of one domain, or of every active domain when
    /// `target` is `all`. Progress kept by other strategies is untouched.
    pub async fn set_strategy(&self, group_id: &str, target: &str, kind: StrategyKind) -> Result<String> {
        let message = if target.eq_ignore_ascii_case("all") {
            let tasks = self.db.active_group_tasks(group_id)?;
            if tasks.is_empty() {
                return Err(QuizcastError::invalid("no active push tasks in this group"));
            }
            for task in &tasks {
                self.db.set_strategy(group_id, task.domain_id, kind)?;
            }
            format!("✅ Strategy of {} domains switched to [{}]", tasks.len(), kind.tag())
        } else {
            let domain = self.domain(target)?;
            let default_time = self.scheduler.config().await.scheduler.default_push_time;
            self.db.ensure_task(group_id, domain.id, &default_time, false)?;
            self.db.set_strategy(group_id, domain.id, kind)?;
            format!("✅ Strategy of [{}] switched to [{}]", domain.name, kind.tag())
        };
        self.scheduler.reload_tasks_for_group(group_id).await?;
        tracing::info!("🎯 Group {}: {}", group_id, message);
        Ok(format!("{message}\nExisting progress is kept."))
    }

    /// Reset the progress of the domain's current strategy.
    pub async fn reset_progress(&self, group_id: &str, domain_name: &str) -> Result<String> {
        let domain = self.domain(domain_name)?;
        let kind = self
            .db
            .task(group_id, domain.id)?
            .map(|t| t.strategy())
            .unwrap_or_default();
        self.db.reset_progress(group_id, domain.id, kind)?;
        self.scheduler.reload_tasks_for_group(group_id).await?;
        Ok(format!(
            "✅ Progress of [{}] reset\nCurrent strategy: {}",
            domain.name,
            kind.tag()
        ))
    }

    pub fn strategy_info(&self, group_id: &str, domain_name: &str) -> Result<String> {
        let domain = self.domain(domain_name)?;
        let strategy = strategy_for_task(self.db.clone(), group_id, domain.id)?;
        Ok(strategy.describe(group_id, domain.id))
    }
}
