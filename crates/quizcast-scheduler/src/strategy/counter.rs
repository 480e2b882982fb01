//! Least-push-count selection: keeps per-group push counts level.

use std::sync::Arc;

use quizcast_core::error::Result;
use quizcast_core::types::{Problem, StrategyKind};

use super::PushStrategy;
use crate::persistence::QuizDb;

pub struct LeastPushCount {
    db: Arc<QuizDb>,
}

impl LeastPushCount {
    pub fn new(db: Arc<QuizDb>) -> Self {
        Self { db }
    }
}

impl PushStrategy for LeastPushCount {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastPushCount
    }

    fn select(&self, group_id: &str, domain_id: i64, limit: usize) -> Result<Vec<Problem>> {
        self.db.problems_by_push_count(group_id, domain_id, limit)
    }

    fn advance(&self, group_id: &str, _domain_id: i64, pushed: &[i64]) -> Result<()> {
        self.db.increment_push_counts(group_id, pushed)
    }

    fn describe(&self, group_id: &str, domain_id: i64) -> String {
        let stats = match self.db.domain_push_stats(group_id, domain_id) {
            Ok(stats) if stats.total_problems > 0 => stats,
            Ok(_) => return "📊 Least push count (no data)".to_string(),
            Err(e) => {
                tracing::warn!("⚠️ Cannot describe push counts: {e}");
                return "📊 Least push count (no data)".to_string();
            }
        };
        format!(
            "📊 Least push count\nProblems: {}\nTotal pushes: {}\nAverage per problem: {:.1}\nDistribution: {}~{}",
            stats.total_problems,
            stats.total_pushes,
            stats.avg_pushes,
            stats.min_pushes,
            stats.max_pushes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;

    #[test]
    fn test_select_least_pushed_first() {
        let (db, domain) = domain_with(5, &[]);
        let strategy = LeastPushCount::new(db);
        assert_eq!(ids(&strategy.select("g1", domain, 2).unwrap()), vec![1, 2]);
        strategy.advance("g1", domain, &[1, 2]).unwrap();
        assert_eq!(ids(&strategy.select("g1", domain, 2).unwrap()), vec![3, 4]);
        strategy.advance("g1", domain, &[3, 4]).unwrap();
        assert_eq!(ids(&strategy.select("g1", domain, 2).unwrap()), vec![5, 1]);
    }

    #[test]
    fn test_counts_are_per_group() {
        let (db, domain) = domain_with(4, &[]);
        let strategy = LeastPushCount::new(db);
        strategy.advance("g1", domain, &[1, 2]).unwrap();
        assert_eq!(ids(&strategy.select("g2", domain, 2).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_fewer_problems_than_limit() {
        let (db, domain) = domain_with(2, &[]);
        let strategy = LeastPushCount::new(db);
        assert_eq!(strategy.select("g1", domain, 5).unwrap().len(), 2);
    }

    #[test]
    fn test_bounded_unfairness() {
        let (problems, limit, rounds) = (7_i64, 3_usize, 20_i64);
        let (db, domain) = domain_with(problems, &[]);
        let strategy = LeastPushCount::new(db.clone());
        for _ in 0..rounds {
            let picked = strategy.select("g1", domain, limit).unwrap();
            assert_eq!(picked.len(), limit);
            strategy.advance("g1", domain, &ids(&picked)).unwrap();
        }

        let counts: Vec<i64> = (1..=problems)
            .map(|id| db.push_count("g1", id).unwrap())
            .collect();
        let min = *counts.iter().min().unwrap();
        let max = *counts.iter().max().unwrap();
        let bound = (rounds * limit as i64 + problems - 1) / problems + 1;
        assert!(max - min <= bound, "counts {counts:?}");
        // Round-robin by (count, id) actually keeps them within one.
        assert!(max - min <= 1, "counts {counts:?}");
        assert_eq!(counts.iter().sum::<i64>(), rounds * limit as i64);
    }

    #[test]
    fn test_describe() {
        let (db, domain) = domain_with(4, &[]);
        let strategy = LeastPushCount::new(db.clone());
        strategy.advance("g1", domain, &[1, 1, 2]).unwrap();
        let text = strategy.describe("g1", domain);
        assert!(text.contains("Problems: 4"));
        assert!(text.contains("Total pushes: 3"));
        assert!(text.contains("Distribution: 0~2"));

        let empty = db.insert_domain("empty", None).unwrap();
        assert!(strategy.describe("g1", empty).contains("no data"));
    }
}
