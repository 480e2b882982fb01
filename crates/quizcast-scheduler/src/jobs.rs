//! Job model and derivation — turns the weekly schedule and the task
//! table into the set of timers one group should have.
//!
//! A group is either in weekly mode (every weekday entry × domain becomes
//! a weekly job) or in manual mode (every active task becomes a daily job),
//! never both.

use std::fmt;

use chrono::{NaiveDateTime, Weekday};
use quizcast_core::config::{ScheduleSnapshot, parse_push_time};
use quizcast_core::error::Result;

use crate::cron::CronSchedule;
use crate::persistence::QuizDb;

/// Which configuration source produced a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSource {
    Default { weekday: Weekday },
    Manual,
}

impl JobSource {
    pub fn is_default(&self) -> bool {
        matches!(self, JobSource::Default { .. })
    }
}

/// Stable job key: `default_<group>_<weekday>_<domain>` or
/// `manual_<group>_<domain>`. Registering the same id again replaces.
///
/// `_` and `\` inside the group and domain parts are backslash-escaped,
/// so distinct pairs never share a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn default_job(group_id: &str, weekday: Weekday, domain_name: &str) -> Self {
        Self(format!(
            "default_{}_{}_{}",
            escape_part(group_id),
            weekday_name(weekday),
            escape_part(domain_name)
        ))
    }

    pub fn manual(group_id: &str, domain_name: &str) -> Self {
        Self(format!(
            "manual_{}_{}",
            escape_part(group_id),
            escape_part(domain_name)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if c == '_' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// One registered timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub group_id: String,
    pub domain_id: i64,
    pub domain_name: String,
    pub source: JobSource,
    pub schedule: CronSchedule,
    /// Next local wall-clock firing; filled in when the job is installed.
    pub next_run: Option<NaiveDateTime>,
}

impl Job {
    /// Same id and same trigger: replacing one with the other changes nothing.
    pub fn same_trigger(&self, other: &Job) -> bool {
        self.id == other.id && self.schedule.expression() == other.schedule.expression()
    }
}

/// Jobs one group should have under the current configuration.
///
/// Unknown domain names and malformed push times are skipped with a
/// warning. Only store errors fail the derivation.
pub fn derive_group_jobs(db: &QuizDb, snapshot: &ScheduleSnapshot, group_id: &str) -> Result<Vec<Job>> {
    let mut jobs: Vec<Job> = Vec::new();

    if snapshot.uses_default(group_id) {
        for (weekday, time, day) in snapshot.weekly_entries() {
            for domain_name in &day.domains {
                let Some(domain) = db.domain_by_name(domain_name)? else {
                    tracing::warn!(
                        "⚠️ Weekly schedule names unknown domain '{}' ({}), skipped",
                        domain_name,
                        weekday_name(weekday)
                    );
                    continue;
                };
                let id = JobId::default_job(group_id, weekday, &domain.name);
                if jobs.iter().any(|j| j.id == id) {
                    tracing::warn!(
                        "⚠️ Weekly schedule lists '{}' twice for {} (duplicate day key?), extra entry skipped",
                        domain.name,
                        weekday_name(weekday)
                    );
                    continue;
                }
                jobs.push(Job {
                    id,
                    group_id: group_id.to_string(),
                    domain_id: domain.id,
                    domain_name: domain.name,
                    source: JobSource::Default { weekday },
                    schedule: CronSchedule::weekly(weekday, time),
                    next_run: None,
                });
            }
        }
        return Ok(jobs);
    }

    for task in db.active_group_tasks(group_id)? {
        if task.domain_name.is_empty() {
            tracing::warn!(
                "⚠️ Task {}/{} points at a missing domain, skipped",
                group_id,
                task.domain_id
            );
            continue;
        }
        let time = match parse_push_time(&task.push_time) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("⚠️ Task {}/{} skipped: {e}", group_id, task.domain_name);
                continue;
            }
        };
        jobs.push(Job {
            id: JobId::manual(group_id, &task.domain_name),
            group_id: group_id.to_string(),
            domain_id: task.domain_id,
            domain_name: task.domain_name,
            source: JobSource::Manual,
            schedule: CronSchedule::daily(time),
            next_run: None,
        });
    }
    Ok(jobs)
}
