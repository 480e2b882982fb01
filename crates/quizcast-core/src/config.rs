//! Quizcast configuration system.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{QuizcastError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizcastConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Groups that follow the shared weekly schedule instead of their
    /// own per-domain settings.
    #[serde(default, deserialize_with = "deserialize_group_ids")]
    pub use_default: Vec<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub transports: Vec<TransportConfig>,
    /// Weekday name → push time and domains.
    #[serde(default)]
    pub weekly: BTreeMap<String, DayConfig>,
}

fn default_database_path() -> String { "~/.quizcast/quiz.db".into() }

impl Default for QuizcastConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            use_default: Vec::new(),
            scheduler: SchedulerConfig::default(),
            delivery: DeliveryConfig::default(),
            transports: Vec::new(),
            weekly: BTreeMap::new(),
        }
    }
}

impl QuizcastConfig {
    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| QuizcastError::config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| QuizcastError::config(format!("Failed to parse config: {e}")))?;
        config.scheduler.validate()?;
        Ok(config)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| QuizcastError::config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Quizcast home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".quizcast")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Immutable view of the weekly schedule used for job derivation.
    pub fn schedule_snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            use_default: self.use_default.iter().cloned().collect(),
            weekly: self.weekly.clone(),
        }
    }

    /// Take over the weekly schedule and weekly-mode membership of a
    /// snapshot. Other sections are left as they are.
    pub fn apply_snapshot(&mut self, snapshot: &ScheduleSnapshot) {
        self.use_default = snapshot.use_default.iter().cloned().collect();
        self.weekly = snapshot.weekly.clone();
    }
}

/// Upper bound for `misfire_grace_secs`: one day.
pub const MAX_MISFIRE_GRACE_SECS: u64 = 86_400;

/// Scheduler timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// How often a running scheduler re-reads the task table and the
    /// weekly schedule of the config file.
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
    /// Late firings within this window still run; older ones are dropped.
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,
    #[serde(default = "default_push_time")]
    pub default_push_time: String,
    /// Advisory number of problems per push.
    #[serde(default = "default_push_limit")]
    pub push_limit: usize,
}

fn default_check_interval() -> u64 { 20 }
fn default_reload_interval() -> u64 { 60 }
fn default_misfire_grace() -> u64 { 300 }
fn default_push_time() -> String { "17:00".into() }
fn default_push_limit() -> usize { 3 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            reload_interval_secs: default_reload_interval(),
            misfire_grace_secs: default_misfire_grace(),
            default_push_time: default_push_time(),
            push_limit: default_push_limit(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        parse_push_time(&self.default_push_time)?;
        if self.misfire_grace_secs > MAX_MISFIRE_GRACE_SECS {
            return Err(QuizcastError::invalid(format!(
                "misfire_grace_secs must be at most {MAX_MISFIRE_GRACE_SECS}, got {}",
                self.misfire_grace_secs
            )));
        }
        Ok(())
    }
}

/// When a push may advance stored progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Advance after every attempted delivery, even if all endpoints failed.
    #[default]
    Always,
    /// Advance only when some endpoint accepted the message.
    OnSuccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default)]
    pub advance_policy: AdvancePolicy,
}

fn default_attempt_timeout() -> u64 { 10 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout(),
            advance_policy: AdvancePolicy::default(),
        }
    }
}

/// One delivery endpoint, tried in the order listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Telegram {
        bot_token: String,
        #[serde(default)]
        api_base: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// One weekday entry of the shared weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayConfig {
    #[serde(default = "default_push_time")]
    pub time: String,
    #[serde(default)]
    pub domains: Vec<String>,
}

/// Reloadable view of the weekly schedule and the weekly-mode membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSnapshot {
    pub use_default: BTreeSet<String>,
    pub weekly: BTreeMap<String, DayConfig>,
}

impl ScheduleSnapshot {
    pub fn uses_default(&self, group_id: &str) -> bool {
        self.use_default.contains(group_id)
    }

    /// Weekly entries with parsed weekday and time, Monday first.
    /// Entries with an unknown day name or a malformed time are skipped.
    pub fn weekly_entries(&self) -> Vec<(Weekday, NaiveTime, &DayConfig)> {
        let mut entries = Vec::new();
        for (day_name, day) in &self.weekly {
            let Ok(weekday) = day_name.parse::<Weekday>() else {
                tracing::warn!("⚠️ Unknown weekday '{}' in weekly schedule, skipped", day_name);
                continue;
            };
            let time = match parse_push_time(&day.time) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("⚠️ Weekly entry '{}' skipped: {e}", day_name);
                    continue;
                }
            };
            entries.push((weekday, time, day));
        }
        entries.sort_by_key(|(weekday, _, _)| weekday.num_days_from_monday());
        entries
    }
}

/// Parse a wall-clock "HH:MM" push time.
pub fn parse_push_time(s: &str) -> Result<NaiveTime> {
    let invalid = || QuizcastError::invalid(format!("push time '{s}' is not HH:MM"));
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Accept group ids written either as TOML integers or strings.
fn deserialize_group_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum GroupId {
        Num(i64),
        Str(String),
    }

    let raw = Vec::<GroupId>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|id| match id {
            GroupId::Num(n) => n.to_string(),
            GroupId::Str(s) => s.trim().to_string(),
        })
        .collect())
}
