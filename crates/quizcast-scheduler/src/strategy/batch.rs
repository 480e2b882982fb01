//! Sequential batch rotation over the batch catalogue.

use std::sync::Arc;

use quizcast_core::error::Result;
use quizcast_core::types::{Batch, Problem, StrategyKind};

use super::PushStrategy;
use crate::persistence::QuizDb;

pub struct SequentialBatch {
    db: Arc<QuizDb>,
}

impl SequentialBatch {
    pub fn new(db: Arc<QuizDb>) -> Self {
        Self { db }
    }

    /// Batch the cursor points at, or the first batch when it points nowhere.
    fn current_batch(&self, group_id: &str, domain_id: i64) -> Result<Option<Batch>> {
        let cursor = self.db.cursor(group_id, domain_id)?;
        match self.db.batch_starting_at(domain_id, cursor)? {
            Some(batch) => Ok(Some(batch)),
            None => self.db.first_batch(domain_id),
        }
    }
}

impl PushStrategy for SequentialBatch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SequentialBatch
    }

    /// The whole current batch; `limit` only applies to the no-batch fallback.
    fn select(&self, group_id: &str, domain_id: i64, limit: usize) -> Result<Vec<Problem>> {
        match self.current_batch(group_id, domain_id)? {
            Some(batch) => {
                self.db
                    .problems_in_range(domain_id, batch.start_index, batch.end_index)
            }
            None => {
                tracing::warn!(
                    "⚠️ No batches for domain {}, falling back to first {} problems",
                    domain_id,
                    limit
                );
                self.db.first_problems(domain_id, limit)
            }
        }
    }

    fn advance(&self, group_id: &str, domain_id: i64, _pushed: &[i64]) -> Result<()> {
        self.db.advance_cursor(group_id, domain_id)?;
        Ok(())
    }

    fn describe(&self, group_id: &str, domain_id: i64) -> String {
        match self.current_batch(group_id, domain_id) {
            Ok(Some(batch)) => format!(
                "📚 Sequential batches\nCurrent batch: [{}-{}]\nNext: moves on after this batch is pushed",
                batch.start_index, batch.end_index
            ),
            Ok(None) => "📚 Sequential batches (no batches configured)".to_string(),
            Err(e) => {
                tracing::warn!("⚠️ Cannot describe batch progress: {e}");
                "📚 Sequential batches (no data)".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;

    #[test]
    fn test_cyclic_rotation() {
        let (db, domain) = domain_with(9, &[(1, 3), (4, 6), (7, 9)]);
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        let strategy = SequentialBatch::new(db.clone());

        let mut seen = Vec::new();
        for _ in 0..4 {
            let picked = strategy.select("g1", domain, 3).unwrap();
            seen.push(picked[0].id);
            strategy.advance("g1", domain, &ids(&picked)).unwrap();
        }
        assert_eq!(seen, vec![1, 4, 7, 1]);
    }

    #[test]
    fn test_three_advances_return_to_start() {
        let (db, domain) = domain_with(9, &[(1, 3), (4, 6), (7, 9)]);
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        let strategy = SequentialBatch::new(db.clone());
        for _ in 0..3 {
            strategy.advance("g1", domain, &[]).unwrap();
        }
        assert_eq!(db.cursor("g1", domain).unwrap(), 1);
    }

    #[test]
    fn test_select_is_pure() {
        let (db, domain) = domain_with(9, &[(1, 3), (4, 6)]);
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        let strategy = SequentialBatch::new(db.clone());
        let a = strategy.select("g1", domain, 3).unwrap();
        let b = strategy.select("g1", domain, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.cursor("g1", domain).unwrap(), 1);
    }

    #[test]
    fn test_batch_size_overrides_limit() {
        let (db, domain) = domain_with(9, &[(1, 5), (6, 9)]);
        let strategy = SequentialBatch::new(db);
        assert_eq!(ids(&strategy.select("g1", domain, 2).unwrap()), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_catalogue_changed_between_select_and_advance() {
        let (db, domain) = domain_with(9, &[(1, 3), (4, 6), (7, 9)]);
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        db.update_cursor("g1", domain, 4).unwrap();
        let strategy = SequentialBatch::new(db.clone());
        let picked = strategy.select("g1", domain, 3).unwrap();
        assert_eq!(ids(&picked), vec![4, 5, 6]);

        db.remove_batch(domain, 4).unwrap();
        strategy.advance("g1", domain, &ids(&picked)).unwrap();
        // Cursor 4 is gone: treated as first batch, next is 7.
        assert_eq!(db.cursor("g1", domain).unwrap(), 7);
    }

    #[test]
    fn test_describe() {
        let (db, domain) = domain_with(9, &[(4, 6)]);
        let strategy = SequentialBatch::new(db.clone());
        assert!(strategy.describe("g1", domain).contains("[4-6]"));

        let empty = db.insert_domain("empty", None).unwrap();
        assert!(strategy.describe("g1", empty).contains("no batches"));
    }
}
