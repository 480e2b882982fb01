//! Shared data model: domains, problems, batches, per-group tasks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A topic of problems. Owned by an external catalogue; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub name: String,
    /// Owning study group, used only to resolve who gets mentioned.
    pub study_group_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    pub domain_id: i64,
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// Inclusive id range `[start_index, end_index]` inside a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub domain_id: i64,
    pub start_index: i64,
    pub end_index: i64,
}

/// Selection algorithm attached to a (group, domain) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Fixed-order round robin over the domain's batches.
    #[default]
    SequentialBatch,
    /// Least-pushed problems first.
    LeastPushCount,
    /// Batch picked from the calendar date, no stored state.
    DateModulo,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::SequentialBatch,
        StrategyKind::LeastPushCount,
        StrategyKind::DateModulo,
    ];

    /// Tag persisted in `group_tasks.strategy_type`.
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::SequentialBatch => "batch",
            StrategyKind::LeastPushCount => "counter",
            StrategyKind::DateModulo => "daterem",
        }
    }

    /// Map a stored tag to a kind. Unknown tags fall back to
    /// `SequentialBatch` so a corrupted row never stops a push.
    pub fn from_stored(tag: &str) -> Self {
        match tag.parse() {
            Ok(kind) => kind,
            Err(_) => {
                tracing::warn!("⚠️ Unknown strategy '{}', falling back to batch", tag);
                StrategyKind::SequentialBatch
            }
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" | "sequential" | "sequential-batch" => Ok(StrategyKind::SequentialBatch),
            "counter" | "least-push-count" | "least_push_count" => {
                Ok(StrategyKind::LeastPushCount)
            }
            "daterem" | "date-modulo" | "date_modulo" => Ok(StrategyKind::DateModulo),
            other => Err(format!("unknown strategy '{other}' (expected batch, counter, daterem)")),
        }
    }
}

/// Schedulable unit of work, keyed by (group_id, domain_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDomainTask {
    pub group_id: String,
    pub domain_id: i64,
    pub domain_name: String,
    pub is_active: bool,
    /// Wall-clock "HH:MM".
    pub push_time: String,
    /// Raw stored tag; see [`StrategyKind::from_stored`].
    pub strategy_type: String,
    /// Only meaningful for `SequentialBatch`: start of the next batch.
    pub cursor: i64,
}

impl GroupDomainTask {
    pub fn strategy(&self) -> StrategyKind {
        StrategyKind::from_stored(&self.strategy_type)
    }
}

/// Push-count distribution of one domain for one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushStats {
    pub total_problems: i64,
    pub total_pushes: i64,
    pub avg_pushes: f64,
    pub min_pushes: i64,
    pub max_pushes: i64,
}

/// A formatted batch of problems ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub group_id: String,
    pub domain_name: String,
    pub problems: Vec<Problem>,
    /// Subscriber handles to mention after the problem list.
    pub mentions: Vec<String>,
}

impl PushMessage {
    pub fn problem_ids(&self) -> Vec<i64> {
        self.problems.iter().map(|p| p.id).collect()
    }

    /// Plain-text rendering shared by every transport.
    pub fn render(&self) -> String {
        let mut lines = vec![format!("📅 Today's quiz [{}]", self.domain_name), String::new()];
        for problem in &self.problems {
            lines.push(format!("[Problem #{}]", problem.id));
            lines.push(problem.question.clone());
            lines.push(String::new());
        }
        lines.push("Reply /ans <id> for the reference answer.".to_string());

        let mut text = lines.join("\n");
        if !self.mentions.is_empty() {
            text.push_str("\n\n");
            let tags: Vec<String> = self.mentions.iter().map(|m| format!("@{m}")).collect();
            text.push_str(&tags.join(" "));
        }
        text
    }
}
