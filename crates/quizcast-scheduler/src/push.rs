//! Push callback — the body of every job firing.
//!
//! resolve task → strategy.select → format → dispatch → strategy.advance
//!
//! Pushes for one (group, domain) pair are serialized; different pairs
//! run concurrently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use quizcast_core::config::{AdvancePolicy, QuizcastConfig};
use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::types::PushMessage;

use crate::dispatch::Dispatcher;
use crate::jobs::JobSource;
use crate::persistence::QuizDb;
use crate::strategy::strategy_for;

/// What one firing ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Nothing attempted (task missing, inactive, domain gone).
    Skipped(String),
    /// The strategy had nothing to send.
    Empty,
    /// Some endpoint accepted the message.
    Delivered { via: String, count: usize, advanced: bool },
    /// Every endpoint failed.
    Undelivered { count: usize, advanced: bool },
}

impl fmt::Display for PushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            PushOutcome::Empty => write!(f, "nothing to push"),
            PushOutcome::Delivered { via, count, advanced } => {
                write!(f, "pushed {count} problems via {via}")?;
                if !advanced {
                    write!(f, " (progress not saved)")?;
                }
                Ok(())
            }
            PushOutcome::Undelivered { count, advanced } => {
                write!(f, "delivery of {count} problems failed on every endpoint")?;
                if *advanced {
                    write!(f, " (progress advanced anyway)")?;
                }
                Ok(())
            }
        }
    }
}

type PairLock = Arc<tokio::sync::Mutex<()>>;

pub struct Pusher {
    db: Arc<QuizDb>,
    dispatcher: Dispatcher,
    push_limit: usize,
    default_push_time: String,
    advance_policy: AdvancePolicy,
    pair_locks: std::sync::Mutex<HashMap<(String, i64), PairLock>>,
}

impl Pusher {
    pub fn new(db: Arc<QuizDb>, dispatcher: Dispatcher, config: &QuizcastConfig) -> Self {
        Self {
            db,
            dispatcher,
            push_limit: config.scheduler.push_limit,
            default_push_time: config.scheduler.default_push_time.clone(),
            advance_policy: config.delivery.advance_policy,
            pair_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn pair_lock(&self, group_id: &str, domain_id: i64) -> Result<PairLock> {
        let mut locks = self
            .pair_locks
            .lock()
            .map_err(|e| QuizcastError::Scheduler(format!("pair lock table poisoned: {e}")))?;
        Ok(locks
            .entry((group_id.to_string(), domain_id))
            .or_default()
            .clone())
    }

    /// Run one push for (group, domain).
    ///
    /// Weekly-mode firings create the task row on first use so progress has
    /// somewhere to live. Manual firings need an existing active row.
    pub async fn push(&self, group_id: &str, domain_id: i64, source: JobSource) -> Result<PushOutcome> {
        let lock = self.pair_lock(group_id, domain_id)?;
        let _guard = lock.lock().await;

        // 1. Task row
        let task = match (self.db.task(group_id, domain_id)?, source) {
            (Some(task), JobSource::Default { .. }) => task,
            (None, JobSource::Default { .. }) => {
                self.db
                    .ensure_task(group_id, domain_id, &self.default_push_time, false)?
            }
            (Some(task), JobSource::Manual) if task.is_active => task,
            (Some(_), JobSource::Manual) => {
                tracing::debug!("Push for {}/{} skipped: task inactive", group_id, domain_id);
                return Ok(PushOutcome::Skipped("task inactive".into()));
            }
            (None, JobSource::Manual) => {
                tracing::debug!("Push for {}/{} skipped: no task", group_id, domain_id);
                return Ok(PushOutcome::Skipped("no task configured".into()));
            }
        };
        let Some(domain) = self.db.domain_by_id(domain_id)? else {
            tracing::warn!("⚠️ Push for group {} skipped: domain {} is gone", group_id, domain_id);
            return Ok(PushOutcome::Skipped("unknown domain".into()));
        };

        // 2-3. Strategy and selection
        let strategy = strategy_for(task.strategy(), self.db.clone());
        let problems = strategy.select(group_id, domain_id, self.push_limit)?;
        if problems.is_empty() {
            tracing::info!("📭 Nothing to push for group {}, domain {}", group_id, domain.name);
            return Ok(PushOutcome::Empty);
        }

        // 4. Mentions come from the domain's owning study group, when it has one
        let mentions = match domain.study_group_id {
            Some(sg) => self.db.subscribers(sg)?,
            None => Vec::new(),
        };

        let message = PushMessage {
            group_id: group_id.to_string(),
            domain_name: domain.name.clone(),
            problems,
            mentions,
        };
        let pushed = message.problem_ids();
        let count = pushed.len();

        // 5. Delivery
        let delivered = match self.dispatcher.deliver(&message).await {
            Ok(via) => Some(via),
            Err(e) => {
                tracing::error!(
                    "❌ Push of {} problems to group {} ({}) failed: {e}",
                    count,
                    group_id,
                    domain.name
                );
                None
            }
        };

        // 6. Progress
        let should_advance = delivered.is_some() || self.advance_policy == AdvancePolicy::Always;
        let advanced = if should_advance {
            match strategy.advance(group_id, domain_id, &pushed) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(
                        "❌ Progress update failed for group {}, domain {}: {e}",
                        group_id,
                        domain.name
                    );
                    false
                }
            }
        } else {
            tracing::warn!(
                "⚠️ Progress for group {}, domain {} kept: nothing was delivered",
                group_id,
                domain.name
            );
            false
        };

        Ok(match delivered {
            Some(via) => {
                tracing::info!(
                    "📤 Pushed {} problems to group {} ({}) via {}",
                    count,
                    group_id,
                    domain.name,
                    via
                );
                PushOutcome::Delivered { via, count, advanced }
            }
            None => PushOutcome::Undelivered { count, advanced },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::testutil::FakeTransport;
    use quizcast_core::traits::Transport;
    use quizcast_core::types::StrategyKind;

    struct Fixture {
        db: Arc<QuizDb>,
        domain: i64,
        ok: Arc<FakeTransport>,
    }

    /// Domain "rust" (problems 1..=9, batches of 3) owned by a study group
    /// with two subscribers.
    fn fixture() -> Fixture {
        let db = QuizDb::open_in_memory().unwrap();
        let sg = db.insert_study_group("backend").unwrap();
        db.subscribe(sg, "alice").unwrap();
        db.subscribe(sg, "bob").unwrap();
        let domain = db.insert_domain("rust", Some(sg)).unwrap();
        for i in 1..=9 {
            db.insert_problem(domain, &format!("q{i}"), &format!("a{i}")).unwrap();
        }
        for (s, e) in [(1, 3), (4, 6), (7, 9)] {
            db.add_batch(domain, s, e).unwrap();
        }
        Fixture {
            db: Arc::new(db),
            domain,
            ok: FakeTransport::ok("fake"),
        }
    }

    fn pusher(db: Arc<QuizDb>, transports: Vec<Arc<dyn Transport>>, policy: AdvancePolicy) -> Pusher {
        let mut config = QuizcastConfig::default();
        config.delivery.advance_policy = policy;
        Pusher::new(db, Dispatcher::new(transports, Duration::from_secs(1)), &config)
    }

    #[tokio::test]
    async fn test_manual_push_delivers_and_advances() {
        let f = fixture();
        f.db.upsert_task("100", f.domain, "08:00", true).unwrap();
        let p = pusher(f.db.clone(), vec![f.ok.clone()], AdvancePolicy::Always);

        let outcome = p.push("100", f.domain, JobSource::Manual).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Delivered { via: "fake".into(), count: 3, advanced: true }
        );
        assert_eq!(f.db.cursor("100", f.domain).unwrap(), 4);

        let sent = f.ok.sent.lock().unwrap();
        assert_eq!(sent[0].problem_ids(), vec![1, 2, 3]);
        assert_eq!(sent[0].mentions, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn test_manual_push_needs_active_row() {
        let f = fixture();
        let p = pusher(f.db.clone(), vec![f.ok.clone()], AdvancePolicy::Always);
        let outcome = p.push("100", f.domain, JobSource::Manual).await.unwrap();
        assert!(matches!(outcome, PushOutcome::Skipped(_)));

        f.db.upsert_task("100", f.domain, "08:00", false).unwrap();
        let outcome = p.push("100", f.domain, JobSource::Manual).await.unwrap();
        assert!(matches!(outcome, PushOutcome::Skipped(_)));
        assert_eq!(f.ok.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_default_push_creates_row_lazily() {
        let f = fixture();
        let p = pusher(f.db.clone(), vec![f.ok.clone()], AdvancePolicy::Always);
        let source = JobSource::Default { weekday: chrono::Weekday::Mon };

        p.push("100", f.domain, source).await.unwrap();
        let task = f.db.task("100", f.domain).unwrap().unwrap();
        assert!(!task.is_active);
        assert_eq!(task.push_time, "17:00");
        assert_eq!(task.cursor, 4);

        p.push("100", f.domain, source).await.unwrap();
        assert_eq!(f.db.cursor("100", f.domain).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_failed_delivery_advance_policies() {
        let f = fixture();
        f.db.upsert_task("100", f.domain, "08:00", true).unwrap();

        let keep = pusher(f.db.clone(), vec![FakeTransport::failing("down")], AdvancePolicy::OnSuccess);
        let outcome = keep.push("100", f.domain, JobSource::Manual).await.unwrap();
        assert_eq!(outcome, PushOutcome::Undelivered { count: 3, advanced: false });
        assert_eq!(f.db.cursor("100", f.domain).unwrap(), 1);

        let always = pusher(f.db.clone(), vec![FakeTransport::failing("down")], AdvancePolicy::Always);
        let outcome = always.push("100", f.domain, JobSource::Manual).await.unwrap();
        assert_eq!(outcome, PushOutcome::Undelivered { count: 3, advanced: true });
        assert_eq!(f.db.cursor("100", f.domain).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failed_advance_keeps_cursor() {
        let f = fixture();
        f.db.upsert_task("100", f.domain, "08:00", true).unwrap();
        f.db.execute_raw(
            "CREATE TRIGGER freeze_cursor BEFORE UPDATE OF cursor ON group_tasks
             BEGIN SELECT RAISE(ABORT, 'cursor frozen'); END;",
        )
        .unwrap();
        let p = pusher(f.db.clone(), vec![f.ok.clone()], AdvancePolicy::Always);

        let outcome = p.push("100", f.domain, JobSource::Manual).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Delivered { via: "fake".into(), count: 3, advanced: false }
        );
        assert_eq!(f.db.cursor("100", f.domain).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_selection_sends_nothing() {
        let db = Arc::new(QuizDb::open_in_memory().unwrap());
        let domain = db.insert_domain("empty", None).unwrap();
        db.upsert_task("100", domain, "08:00", true).unwrap();
        let ok = FakeTransport::ok("fake");
        let p = pusher(db, vec![ok.clone()], AdvancePolicy::Always);
        assert_eq!(
            p.push("100", domain, JobSource::Manual).await.unwrap(),
            PushOutcome::Empty
        );
        assert_eq!(ok.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_counter_strategy_push() {
        let f = fixture();
        f.db.upsert_task("100", f.domain, "08:00", true).unwrap();
        f.db.set_strategy("100", f.domain, StrategyKind::LeastPushCount).unwrap();
        let p = pusher(f.db.clone(), vec![f.ok.clone()], AdvancePolicy::Always);

        p.push("100", f.domain, JobSource::Manual).await.unwrap();
        p.push("100", f.domain, JobSource::Manual).await.unwrap();
        let sent = f.ok.sent.lock().unwrap();
        assert_eq!(sent[1].problem_ids(), vec![4, 5, 6]);
        assert_eq!(f.db.cursor("100", f.domain).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_pushes_on_one_pair_are_serialized() {
        let f = fixture();
        f.db.upsert_task("100", f.domain, "08:00", true).unwrap();
        let p = Arc::new(pusher(f.db.clone(), vec![f.ok.clone()], AdvancePolicy::Always));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let p = p.clone();
                let domain = f.domain;
                tokio::spawn(async move { p.push("100", domain, JobSource::Manual).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let mut firsts: Vec<i64> = f.ok.sent.lock().unwrap().iter().map(|m| m.problems[0].id).collect();
        firsts.sort_unstable();
        assert_eq!(firsts, vec![1, 4, 7]);
        assert_eq!(f.db.cursor("100", f.domain).unwrap(), 1);
    }
}
