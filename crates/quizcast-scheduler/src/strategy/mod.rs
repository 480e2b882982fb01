//! Selection strategies — what to push next, and how progress moves after.
//!
//! ```text
//! batch    SequentialBatch   cursor walks the batch catalogue, wraps around
//! counter  LeastPushCount    least-pushed problems first, per group counters
//! daterem  DateModulo        batch = days since epoch mod batch count
//! ```
//!
//! `strategy_for` is the only place a stored tag turns into behaviour.

mod batch;
mod counter;
mod daterem;

use std::sync::Arc;

use quizcast_core::error::Result;
use quizcast_core::types::{Problem, StrategyKind};

use crate::persistence::QuizDb;

pub use batch::SequentialBatch;
pub use counter::LeastPushCount;
pub use daterem::{DATE_EPOCH, DateModulo};

/// Common contract of every selection strategy.
pub trait PushStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Problems to push next. Pure read; calling it twice changes nothing.
    fn select(&self, group_id: &str, domain_id: i64, limit: usize) -> Result<Vec<Problem>>;

    /// Commit progress after an attempted delivery of `pushed`.
    fn advance(&self, group_id: &str, domain_id: i64, pushed: &[i64]) -> Result<()>;

    /// Human-readable progress. Never fails; missing state reads as "no data".
    fn describe(&self, group_id: &str, domain_id: i64) -> String;
}

/// Build the strategy for a kind.
pub fn strategy_for(kind: StrategyKind, db: Arc<QuizDb>) -> Box<dyn PushStrategy> {
    match kind {
        StrategyKind::SequentialBatch => Box::new(SequentialBatch::new(db)),
        StrategyKind::LeastPushCount => Box::new(LeastPushCount::new(db)),
        StrategyKind::DateModulo => Box::new(DateModulo::new(db)),
    }
}

/// Strategy stored for a (group, domain) pair; sequential batch when the
/// pair has no row yet or holds an unknown tag.
pub fn strategy_for_task(db: Arc<QuizDb>, group_id: &str, domain_id: i64) -> Result<Box<dyn PushStrategy>> {
    let kind = db
        .task(group_id, domain_id)?
        .map(|task| task.strategy())
        .unwrap_or_default();
    Ok(strategy_for(kind, db))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Domain with problems `1..=problems` and the given batches.
    pub fn domain_with(problems: i64, batches: &[(i64, i64)]) -> (Arc<QuizDb>, i64) {
        let db = QuizDb::open_in_memory().unwrap();
        let domain = db.insert_domain("rust", None).unwrap();
        for i in 1..=problems {
            db.insert_problem(domain, &format!("question {i}"), &format!("answer {i}"))
                .unwrap();
        }
        for (start, end) in batches {
            db.add_batch(domain, *start, *end).unwrap();
        }
        (Arc::new(db), domain)
    }

    pub fn ids(problems: &[Problem]) -> Vec<i64> {
        problems.iter().map(|p| p.id).collect()
    }
}
