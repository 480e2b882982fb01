//! Date-modulo selection: stateless, the calendar picks the batch.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use quizcast_core::error::Result;
use quizcast_core::types::{Batch, Problem, StrategyKind};

use super::PushStrategy;
use crate::persistence::QuizDb;

/// Day zero of the rotation.
pub const DATE_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2020, 1, 1) {
    Some(d) => d,
    None => panic!("invalid epoch"),
};

pub struct DateModulo {
    db: Arc<QuizDb>,
    /// Fixed "today" for replays and tests; local date when unset.
    today: Option<NaiveDate>,
}

impl DateModulo {
    pub fn new(db: Arc<QuizDb>) -> Self {
        Self { db, today: None }
    }

    pub fn pinned(db: Arc<QuizDb>, today: NaiveDate) -> Self {
        Self { db, today: Some(today) }
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Index into a catalogue of `len` batches for `date`.
    pub fn batch_index(date: NaiveDate, len: usize) -> usize {
        let days = (date - DATE_EPOCH).num_days();
        days.rem_euclid(len as i64) as usize
    }

    fn todays_batch(&self, domain_id: i64) -> Result<Option<(usize, usize, Batch)>> {
        let batches = self.db.batches(domain_id)?;
        if batches.is_empty() {
            return Ok(None);
        }
        let index = Self::batch_index(self.today(), batches.len());
        Ok(Some((index, batches.len(), batches[index])))
    }
}

impl PushStrategy for DateModulo {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DateModulo
    }

    fn select(&self, _group_id: &str, domain_id: i64, limit: usize) -> Result<Vec<Problem>> {
        match self.todays_batch(domain_id)? {
            Some((_, _, batch)) => {
                self.db
                    .problems_in_range(domain_id, batch.start_index, batch.end_index)
            }
            None => self.db.first_problems(domain_id, limit),
        }
    }

    /// Nothing to store: the same date always yields the same batch.
    fn advance(&self, _group_id: &str, _domain_id: i64, _pushed: &[i64]) -> Result<()> {
        Ok(())
    }

    fn describe(&self, _group_id: &str, domain_id: i64) -> String {
        match self.todays_batch(domain_id) {
            Ok(Some((index, len, batch))) => format!(
                "📅 Date rotation (stateless)\nCycle: {} days\nToday's batch: [{}-{}] (#{})",
                len,
                batch.start_index,
                batch.end_index,
                index + 1
            ),
            Ok(None) => "📅 Date rotation (no batches configured)".to_string(),
            Err(e) => {
                tracing::warn!("⚠️ Cannot describe date rotation: {e}");
                "📅 Date rotation (no data)".to_string()
            }
        }
    }
}
