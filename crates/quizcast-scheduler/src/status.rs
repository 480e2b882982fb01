//! Read-only status texts for one group: strategy progress and schedule.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Weekday;
use quizcast_core::config::ScheduleSnapshot;
use quizcast_core::error::Result;

use crate::jobs::weekday_name;
use crate::persistence::QuizDb;
use crate::strategy::strategy_for;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Strategy tag and progress of every active domain of a group.
pub fn strategy_report(db: &Arc<QuizDb>, group_id: &str) -> Result<String> {
    let tasks = db.active_group_tasks(group_id)?;
    if tasks.is_empty() {
        return Ok("📋 No active push tasks in this group".to_string());
    }

    let mut lines = vec!["🎯 Push strategies:".to_string()];
    for task in tasks {
        let kind = task.strategy();
        let info = strategy_for(kind, db.clone()).describe(group_id, task.domain_id);
        lines.push(format!("\n--- {} ({}) ---", task.domain_name, kind.tag()));
        lines.push(info);
    }
    Ok(lines.join("\n"))
}

/// Current schedule of a group, in whichever mode it is.
pub fn schedule_report(db: &QuizDb, snapshot: &ScheduleSnapshot, group_id: &str) -> Result<String> {
    if !snapshot.uses_default(group_id) {
        let tasks = db.active_group_tasks(group_id)?;
        let mut lines = vec!["📋 Push schedule:".to_string(), "Mode: manual".to_string()];
        if tasks.is_empty() {
            lines.push("No active domains".to_string());
        }
        for task in tasks {
            lines.push(format!(
                "{} ({}) [progress: problem #{}]",
                task.domain_name, task.push_time, task.cursor
            ));
        }
        return Ok(lines.join("\n"));
    }

    let entries: BTreeMap<u32, (String, Vec<String>)> = snapshot
        .weekly_entries()
        .into_iter()
        .map(|(weekday, time, day)| {
            (
                weekday.num_days_from_monday(),
                (time.format("%H:%M").to_string(), day.domains.clone()),
            )
        })
        .collect();

    let mut lines = vec!["📋 Push schedule:".to_string(), "Mode: weekly default".to_string()];
    let mut progress: BTreeMap<String, String> = BTreeMap::new();
    for weekday in WEEK {
        let Some((time, domains)) = entries
            .get(&weekday.num_days_from_monday())
            .filter(|(_, domains)| !domains.is_empty())
        else {
            lines.push(format!("{}: no push", weekday_name(weekday)));
            continue;
        };
        lines.push(format!("{} {}: {}", weekday_name(weekday), time, domains.join(", ")));

        for name in domains {
            if progress.contains_key(name) {
                continue;
            }
            let state = match db.domain_by_name(name)? {
                None => "unknown domain".to_string(),
                Some(domain) => match db.task(group_id, domain.id)? {
                    Some(task) => format!("problem #{}", task.cursor),
                    None => "not started".to_string(),
                },
            };
            progress.insert(name.clone(), state);
        }
    }

    if !progress.is_empty() {
        lines.push(String::new());
        lines.push("Progress:".to_string());
        for (name, state) in progress {
            lines.push(format!("{name}: {state}"));
        }
    }
    Ok(lines.join("\n"))
}
