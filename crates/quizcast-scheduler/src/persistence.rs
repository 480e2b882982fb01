//! SQLite-backed store for push progress, the batch catalogue, and the
//! read-only lookups the push path needs (domains, problems, subscribers).
//!
//! One connection behind one mutex. Every read-modify-write unit of work
//! (cursor advancement, push-count increments, bulk task toggles) runs in a
//! single transaction while the mutex is held, so a failed write leaves the
//! previous state intact.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::types::{Batch, Domain, GroupDomainTask, Problem, PushStats, StrategyKind};
use rusqlite::{Connection, OptionalExtension, params};

/// SQLite-backed persistence store for all quiz data.
pub struct QuizDb {
    conn: Mutex<Connection>,
}

impl QuizDb {
    /// Open or create the quiz database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| QuizcastError::database(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| QuizcastError::database(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Create tables if missing.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS study_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                study_group_id INTEGER REFERENCES study_groups(id)
            );

            CREATE TABLE IF NOT EXISTS problems (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_id INTEGER NOT NULL REFERENCES domains(id),
                question TEXT NOT NULL,
                answer TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_problems_domain ON problems(domain_id, id);

            CREATE TABLE IF NOT EXISTS subscriptions (
                study_group_id INTEGER NOT NULL REFERENCES study_groups(id),
                user_id TEXT NOT NULL,
                PRIMARY KEY (study_group_id, user_id)
            );

            -- Batch catalogue: ordered id ranges per domain
            CREATE TABLE IF NOT EXISTS domain_batches (
                domain_id INTEGER NOT NULL REFERENCES domains(id),
                start_index INTEGER NOT NULL,
                end_index INTEGER NOT NULL,
                PRIMARY KEY (domain_id, start_index)
            );

            -- One row per (chat group, domain); never deleted, only deactivated
            CREATE TABLE IF NOT EXISTS group_tasks (
                group_id TEXT NOT NULL,
                domain_id INTEGER NOT NULL REFERENCES domains(id),
                is_active INTEGER NOT NULL DEFAULT 0,
                push_time TEXT NOT NULL DEFAULT '17:00',
                strategy_type TEXT NOT NULL DEFAULT 'batch',
                cursor INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (group_id, domain_id)
            );

            CREATE TABLE IF NOT EXISTS push_counts (
                group_id TEXT NOT NULL,
                problem_id INTEGER NOT NULL REFERENCES problems(id),
                push_count INTEGER NOT NULL DEFAULT 0,
                last_push_time TEXT,
                PRIMARY KEY (group_id, problem_id)
            );
         ",
            )
            .map_err(|e| QuizcastError::database(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| QuizcastError::database(format!("connection lock poisoned: {e}")))
    }

    /// Run arbitrary SQL against the connection (schema sabotage in tests).
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    // ─── Catalogue (owned by the admin tooling, read by pushes) ──────

    pub fn insert_study_group(&self, name: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO study_groups (name) VALUES (?1)", [name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_domain(&self, name: &str, study_group_id: Option<i64>) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO domains (name, study_group_id) VALUES (?1, ?2)",
            params![name, study_group_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_problem(&self, domain_id: i64, question: &str, answer: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO problems (domain_id, question, answer) VALUES (?1, ?2, ?3)",
            params![domain_id, question, answer],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn subscribe(&self, study_group_id: i64, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO subscriptions (study_group_id, user_id) VALUES (?1, ?2)",
            params![study_group_id, user_id],
        )?;
        Ok(n > 0)
    }

    pub fn add_batch(&self, domain_id: i64, start_index: i64, end_index: i64) -> Result<()> {
        if start_index <= 0 || end_index < start_index {
            return Err(QuizcastError::invalid(format!(
                "batch [{start_index}-{end_index}] is not a positive ascending range"
            )));
        }
        self.lock()?.execute(
            "INSERT OR REPLACE INTO domain_batches (domain_id, start_index, end_index)
             VALUES (?1, ?2, ?3)",
            params![domain_id, start_index, end_index],
        )?;
        Ok(())
    }

    pub fn remove_batch(&self, domain_id: i64, start_index: i64) -> Result<bool> {
        let n = self.lock()?.execute(
            "DELETE FROM domain_batches WHERE domain_id = ?1 AND start_index = ?2",
            params![domain_id, start_index],
        )?;
        Ok(n > 0)
    }

    pub fn domain_by_name(&self, name: &str) -> Result<Option<Domain>> {
        let conn = self.lock()?;
        let domain = conn
            .query_row(
                "SELECT id, name, study_group_id FROM domains WHERE name = ?1",
                [name],
                map_domain,
            )
            .optional()?;
        Ok(domain)
    }

    pub fn domain_by_id(&self, id: i64) -> Result<Option<Domain>> {
        let conn = self.lock()?;
        let domain = conn
            .query_row(
                "SELECT id, name, study_group_id FROM domains WHERE id = ?1",
                [id],
                map_domain,
            )
            .optional()?;
        Ok(domain)
    }

    pub fn all_domains(&self) -> Result<Vec<Domain>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, study_group_id FROM domains ORDER BY id")?;
        let rows = stmt.query_map([], map_domain)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Problems of `domain_id` with ids in `[start, end]`, ascending.
    pub fn problems_in_range(&self, domain_id: i64, start: i64, end: i64) -> Result<Vec<Problem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, domain_id, question, answer FROM problems
             WHERE domain_id = ?1 AND id >= ?2 AND id <= ?3
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![domain_id, start, end], map_problem)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Degraded selection for domains without batches: first `limit` by id.
    pub fn first_problems(&self, domain_id: i64, limit: usize) -> Result<Vec<Problem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, domain_id, question, answer FROM problems
             WHERE domain_id = ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![domain_id, limit as i64], map_problem)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn subscribers(&self, study_group_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM subscriptions WHERE study_group_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map([study_group_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    // ─── Batch catalogue ──────────────────────────────────────

    /// All batches of a domain, ordered by `start_index`.
    pub fn batches(&self, domain_id: i64) -> Result<Vec<Batch>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT domain_id, start_index, end_index FROM domain_batches
             WHERE domain_id = ?1 ORDER BY start_index ASC",
        )?;
        let rows = stmt.query_map([domain_id], map_batch)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn first_batch(&self, domain_id: i64) -> Result<Option<Batch>> {
        first_batch_in(&*self.lock()?, domain_id)
    }

    pub fn batch_starting_at(&self, domain_id: i64, start_index: i64) -> Result<Option<Batch>> {
        batch_starting_at_in(&*self.lock()?, domain_id, start_index)
    }

    /// Batch with the smallest `start_index` strictly greater than `cursor`.
    pub fn next_batch_after(&self, domain_id: i64, cursor: i64) -> Result<Option<Batch>> {
        next_batch_after_in(&*self.lock()?, domain_id, cursor)
    }

    // ─── Group tasks ──────────────────────────────────────

    pub fn task(&self, group_id: &str, domain_id: i64) -> Result<Option<GroupDomainTask>> {
        let conn = self.lock()?;
        let task = conn
            .query_row(
                &format!("{TASK_SELECT} WHERE t.group_id = ?1 AND t.domain_id = ?2"),
                params![group_id, domain_id],
                map_task,
            )
            .optional()?;
        Ok(task)
    }

    pub fn group_tasks(&self, group_id: &str) -> Result<Vec<GroupDomainTask>> {
        self.query_tasks(
            &format!("{TASK_SELECT} WHERE t.group_id = ?1 ORDER BY t.domain_id"),
            params![group_id],
        )
    }

    pub fn active_group_tasks(&self, group_id: &str) -> Result<Vec<GroupDomainTask>> {
        self.query_tasks(
            &format!("{TASK_SELECT} WHERE t.group_id = ?1 AND t.is_active = 1 ORDER BY t.domain_id"),
            params![group_id],
        )
    }

    /// Active tasks of every group.
    pub fn active_tasks(&self) -> Result<Vec<GroupDomainTask>> {
        self.query_tasks(
            &format!("{TASK_SELECT} WHERE t.is_active = 1 ORDER BY t.group_id, t.domain_id"),
            params![],
        )
    }

    fn query_tasks(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<GroupDomainTask>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, map_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Create the row if missing; an existing row is returned untouched.
    pub fn ensure_task(
        &self,
        group_id: &str,
        domain_id: i64,
        push_time: &str,
        is_active: bool,
    ) -> Result<GroupDomainTask> {
        {
            let conn = self.lock()?;
            insert_task_in(&conn, group_id, domain_id, push_time, is_active)?;
        }
        self.task(group_id, domain_id)?
            .ok_or_else(|| QuizcastError::not_found(format!("task {group_id}/{domain_id}")))
    }

    /// Set push time and active flag, creating the row on first use.
    /// Cursor and strategy of an existing row are kept.
    pub fn upsert_task(
        &self,
        group_id: &str,
        domain_id: i64,
        push_time: &str,
        is_active: bool,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        upsert_task_in(&tx, group_id, domain_id, push_time, is_active)?;
        tx.commit()?;
        tracing::info!(
            "📝 Task {}/{} set active={} at {}",
            group_id,
            domain_id,
            is_active,
            push_time
        );
        Ok(())
    }

    /// Activate every known domain for a group at one push time.
    pub fn set_all_domains_active(&self, group_id: &str, push_time: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let domain_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM domains ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for domain_id in &domain_ids {
            upsert_task_in(&tx, group_id, *domain_id, push_time, true)?;
        }
        tx.commit()?;
        Ok(domain_ids.len())
    }

    /// Turn every task of a group off. Rows (and progress) are kept.
    pub fn deactivate_all(&self, group_id: &str) -> Result<usize> {
        let n = self.lock()?.execute(
            "UPDATE group_tasks SET is_active = 0 WHERE group_id = ?1",
            [group_id],
        )?;
        Ok(n)
    }

    pub fn set_strategy(&self, group_id: &str, domain_id: i64, kind: StrategyKind) -> Result<bool> {
        let n = self.lock()?.execute(
            "UPDATE group_tasks SET strategy_type = ?1 WHERE group_id = ?2 AND domain_id = ?3",
            params![kind.tag(), group_id, domain_id],
        )?;
        Ok(n > 0)
    }

    /// Stored cursor, or the first batch start (1 without batches) when the
    /// row is missing or holds a non-positive value.
    pub fn cursor(&self, group_id: &str, domain_id: i64) -> Result<i64> {
        cursor_in(&*self.lock()?, group_id, domain_id)
    }

    pub fn update_cursor(&self, group_id: &str, domain_id: i64, cursor: i64) -> Result<()> {
        let n = self.lock()?.execute(
            "UPDATE group_tasks SET cursor = ?1 WHERE group_id = ?2 AND domain_id = ?3",
            params![cursor, group_id, domain_id],
        )?;
        if n == 0 {
            return Err(QuizcastError::not_found(format!(
                "no task row for group {group_id}, domain {domain_id}"
            )));
        }
        Ok(())
    }

    /// Move a sequential-batch cursor to the next batch, wrapping to the
    /// first. Read, lookup and write happen in one transaction.
    ///
    /// Returns the new cursor, or `None` when the domain has no batches
    /// (nothing valid to store).
    pub fn advance_cursor(&self, group_id: &str, domain_id: i64) -> Result<Option<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT cursor FROM group_tasks WHERE group_id = ?1 AND domain_id = ?2",
                params![group_id, domain_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(QuizcastError::not_found(format!(
                "no task row for group {group_id}, domain {domain_id}"
            )));
        }

        let Some(first) = first_batch_in(&tx, domain_id)? else {
            return Ok(None);
        };
        let cursor = cursor_in(&tx, group_id, domain_id)?;
        // A cursor that no longer names a batch is treated as the first batch,
        // which is what selection pushed.
        let current = match batch_starting_at_in(&tx, domain_id, cursor)? {
            Some(batch) => batch.start_index,
            None => first.start_index,
        };
        let next = next_batch_after_in(&tx, domain_id, current)?
            .unwrap_or(first)
            .start_index;
        if next <= 0 {
            return Ok(None);
        }

        tx.execute(
            "UPDATE group_tasks SET cursor = ?1 WHERE group_id = ?2 AND domain_id = ?3",
            params![next, group_id, domain_id],
        )?;
        tx.commit()?;
        tracing::info!(
            "➡️ Cursor {} → {} for group {}, domain {}",
            cursor,
            next,
            group_id,
            domain_id
        );
        Ok(Some(next))
    }

    // ─── Push counts ──────────────────────────────────────

    /// The `limit` least-pushed problems of a domain for a group,
    /// ties broken by ascending id. Missing counters count as zero.
    pub fn problems_by_push_count(
        &self,
        group_id: &str,
        domain_id: i64,
        limit: usize,
    ) -> Result<Vec<Problem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.domain_id, p.question, p.answer
             FROM problems p
             LEFT JOIN push_counts pc ON pc.problem_id = p.id AND pc.group_id = ?1
             WHERE p.domain_id = ?2
             ORDER BY COALESCE(pc.push_count, 0) ASC, p.id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![group_id, domain_id, limit as i64], map_problem)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Add one push to each problem id, creating counters on first push.
    pub fn increment_push_counts(&self, group_id: &str, problem_ids: &[i64]) -> Result<()> {
        if problem_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO push_counts (group_id, problem_id, push_count, last_push_time)
                 VALUES (?1, ?2, 1, datetime('now'))
                 ON CONFLICT(group_id, problem_id)
                 DO UPDATE SET push_count = push_count + 1, last_push_time = datetime('now')",
            )?;
            for problem_id in problem_ids {
                stmt.execute(params![group_id, problem_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn push_count(&self, group_id: &str, problem_id: i64) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn
            .query_row(
                "SELECT push_count FROM push_counts WHERE group_id = ?1 AND problem_id = ?2",
                params![group_id, problem_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    pub fn domain_push_stats(&self, group_id: &str, domain_id: i64) -> Result<PushStats> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(COALESCE(pc.push_count, 0)), 0),
                    COALESCE(AVG(COALESCE(pc.push_count, 0)), 0.0),
                    COALESCE(MIN(COALESCE(pc.push_count, 0)), 0),
                    COALESCE(MAX(COALESCE(pc.push_count, 0)), 0)
             FROM problems p
             LEFT JOIN push_counts pc ON pc.problem_id = p.id AND pc.group_id = ?1
             WHERE p.domain_id = ?2",
            params![group_id, domain_id],
            |row| {
                Ok(PushStats {
                    total_problems: row.get(0)?,
                    total_pushes: row.get(1)?,
                    avg_pushes: row.get(2)?,
                    min_pushes: row.get(3)?,
                    max_pushes: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Reset the progress kept by one strategy. Other strategies' state
    /// is left alone.
    pub fn reset_progress(&self, group_id: &str, domain_id: i64, kind: StrategyKind) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        match kind {
            StrategyKind::LeastPushCount => {
                tx.execute(
                    "DELETE FROM push_counts
                     WHERE group_id = ?1
                       AND problem_id IN (SELECT id FROM problems WHERE domain_id = ?2)",
                    params![group_id, domain_id],
                )?;
            }
            StrategyKind::SequentialBatch => {
                let start = first_batch_in(&tx, domain_id)?.map_or(1, |b| b.start_index);
                tx.execute(
                    "UPDATE group_tasks SET cursor = ?1 WHERE group_id = ?2 AND domain_id = ?3",
                    params![start, group_id, domain_id],
                )?;
            }
            StrategyKind::DateModulo => {}
        }
        tx.commit()?;
        tracing::info!("🔄 Progress reset ({}) for group {}, domain {}", kind, group_id, domain_id);
        Ok(())
    }
}

const TASK_SELECT: &str = "SELECT t.group_id, t.domain_id, COALESCE(d.name, ''), t.is_active,
        t.push_time, t.strategy_type, t.cursor
     FROM group_tasks t
     LEFT JOIN domains d ON d.id = t.domain_id";

fn map_domain(row: &rusqlite::Row<'_>) -> rusqlite::Result<Domain> {
    Ok(Domain {
        id: row.get(0)?,
        name: row.get(1)?,
        study_group_id: row.get(2)?,
    })
}

fn map_problem(row: &rusqlite::Row<'_>) -> rusqlite::Result<Problem> {
    Ok(Problem {
        id: row.get(0)?,
        domain_id: row.get(1)?,
        question: row.get(2)?,
        answer: row.get(3)?,
    })
}

fn map_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<Batch> {
    Ok(Batch {
        domain_id: row.get(0)?,
        start_index: row.get(1)?,
        end_index: row.get(2)?,
    })
}

fn map_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupDomainTask> {
    Ok(GroupDomainTask {
        group_id: row.get(0)?,
        domain_id: row.get(1)?,
        domain_name: row.get(2)?,
        is_active: row.get(3)?,
        push_time: row.get(4)?,
        strategy_type: row.get(5)?,
        cursor: row.get(6)?,
    })
}

fn first_batch_in(conn: &Connection, domain_id: i64) -> Result<Option<Batch>> {
    Ok(conn
        .query_row(
            "SELECT domain_id, start_index, end_index FROM domain_batches
             WHERE domain_id = ?1 ORDER BY start_index ASC LIMIT 1",
            [domain_id],
            map_batch,
        )
        .optional()?)
}

fn batch_starting_at_in(conn: &Connection, domain_id: i64, start: i64) -> Result<Option<Batch>> {
    Ok(conn
        .query_row(
            "SELECT domain_id, start_index, end_index FROM domain_batches
             WHERE domain_id = ?1 AND start_index = ?2",
            params![domain_id, start],
            map_batch,
        )
        .optional()?)
}

fn next_batch_after_in(conn: &Connection, domain_id: i64, cursor: i64) -> Result<Option<Batch>> {
    Ok(conn
        .query_row(
            "SELECT domain_id, start_index, end_index FROM domain_batches
             WHERE domain_id = ?1 AND start_index > ?2
             ORDER BY start_index ASC LIMIT 1",
            params![domain_id, cursor],
            map_batch,
        )
        .optional()?)
}

fn cursor_in(conn: &Connection, group_id: &str, domain_id: i64) -> Result<i64> {
    let stored: Option<i64> = conn
        .query_row(
            "SELECT cursor FROM group_tasks WHERE group_id = ?1 AND domain_id = ?2",
            params![group_id, domain_id],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        Some(c) if c > 0 => Ok(c),
        _ => Ok(first_batch_in(conn, domain_id)?.map_or(1, |b| b.start_index)),
    }
}

fn insert_task_in(
    conn: &Connection,
    group_id: &str,
    domain_id: i64,
    push_time: &str,
    is_active: bool,
) -> Result<bool> {
    let initial_cursor = first_batch_in(conn, domain_id)?.map_or(1, |b| b.start_index);
    let n = conn.execute(
        "INSERT OR IGNORE INTO group_tasks
         (group_id, domain_id, is_active, push_time, strategy_type, cursor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            group_id,
            domain_id,
            is_active,
            push_time,
            StrategyKind::default().tag(),
            initial_cursor
        ],
    )?;
    Ok(n > 0)
}

fn upsert_task_in(
    conn: &Connection,
    group_id: &str,
    domain_id: i64,
    push_time: &str,
    is_active: bool,
) -> Result<()> {
    if !insert_task_in(conn, group_id, domain_id, push_time, is_active)? {
        conn.execute(
            "UPDATE group_tasks SET push_time = ?1, is_active = ?2
             WHERE group_id = ?3 AND domain_id = ?4",
            params![push_time, is_active, group_id, domain_id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Domain "rust" with problems 1..=9 and batches [1-3],[4-6],[7-9].
    fn seeded() -> (QuizDb, i64) {
        let db = QuizDb::open_in_memory().unwrap();
        let domain = db.insert_domain("rust", None).unwrap();
        for i in 1..=9 {
            db.insert_problem(domain, &format!("q{i}"), "").unwrap();
        }
        for start in [1, 4, 7] {
            db.add_batch(domain, start, start + 2).unwrap();
        }
        (db, domain)
    }

    #[test]
    fn test_open_and_migrate_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("quiz.db");
        let db = QuizDb::open(&path).unwrap();
        assert!(db.all_domains().unwrap().is_empty());
        drop(db);
        // Reopening runs the idempotent migration again.
        assert!(QuizDb::open(&path).is_ok());
    }

    #[test]
    fn test_batch_lookups() {
        let (db, domain) = seeded();
        assert_eq!(db.batches(domain).unwrap().len(), 3);
        assert_eq!(db.first_batch(domain).unwrap().unwrap().start_index, 1);
        assert_eq!(db.batch_starting_at(domain, 4).unwrap().unwrap().end_index, 6);
        assert!(db.batch_starting_at(domain, 5).unwrap().is_none());
        assert_eq!(db.next_batch_after(domain, 4).unwrap().unwrap().start_index, 7);
        assert!(db.next_batch_after(domain, 7).unwrap().is_none());
    }

    #[test]
    fn test_add_batch_rejects_bad_range() {
        let (db, domain) = seeded();
        assert!(db.add_batch(domain, 0, 3).is_err());
        assert!(db.add_batch(domain, 5, 4).is_err());
    }

    #[test]
    fn test_ensure_task_sets_initial_cursor_once() {
        let (db, domain) = seeded();
        db.remove_batch(domain, 1).unwrap();
        let task = db.ensure_task("g1", domain, "08:00", true).unwrap();
        assert_eq!(task.cursor, 4);
        assert_eq!(task.strategy(), StrategyKind::SequentialBatch);
        assert_eq!(task.domain_name, "rust");

        db.update_cursor("g1", domain, 7).unwrap();
        let again = db.ensure_task("g1", domain, "09:00", false).unwrap();
        assert_eq!(again.cursor, 7);
        assert_eq!(again.push_time, "08:00");
        assert!(again.is_active);
    }

    #[test]
    fn test_upsert_keeps_cursor_and_strategy() {
        let (db, domain) = seeded();
        db.upsert_task("g1", domain, "08:00", true).unwrap();
        db.update_cursor("g1", domain, 4).unwrap();
        db.set_strategy("g1", domain, StrategyKind::DateModulo).unwrap();

        db.upsert_task("g1", domain, "21:30", false).unwrap();
        let task = db.task("g1", domain).unwrap().unwrap();
        assert_eq!(task.push_time, "21:30");
        assert!(!task.is_active);
        assert_eq!(task.cursor, 4);
        assert_eq!(task.strategy(), StrategyKind::DateModulo);
    }

    #[test]
    fn test_cursor_defaults() {
        let (db, domain) = seeded();
        // No row yet: first batch start.
        assert_eq!(db.cursor("g1", domain).unwrap(), 1);
        let empty = db.insert_domain("empty", None).unwrap();
        assert_eq!(db.cursor("g1", empty).unwrap(), 1);
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        db.update_cursor("g1", domain, 0).unwrap();
        assert_eq!(db.cursor("g1", domain).unwrap(), 1);
    }

    #[test]
    fn test_update_cursor_requires_row() {
        let (db, domain) = seeded();
        let err = db.update_cursor("nobody", domain, 4).unwrap_err();
        assert!(matches!(err, QuizcastError::NotFound(_)));
    }

    #[test]
    fn test_advance_cursor_cycles() {
        let (db, domain) = seeded();
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        assert_eq!(db.advance_cursor("g1", domain).unwrap(), Some(4));
        assert_eq!(db.advance_cursor("g1", domain).unwrap(), Some(7));
        assert_eq!(db.advance_cursor("g1", domain).unwrap(), Some(1));
        assert_eq!(db.cursor("g1", domain).unwrap(), 1);
    }

    #[test]
    fn test_advance_cursor_with_stale_cursor_uses_first_batch() {
        let (db, domain) = seeded();
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        db.update_cursor("g1", domain, 5).unwrap();
        // Stale cursor 5: selection pushed batch 1, so the next is 4.
        assert_eq!(db.advance_cursor("g1", domain).unwrap(), Some(4));
    }

    #[test]
    fn test_advance_cursor_without_batches_keeps_cursor() {
        let db = QuizDb::open_in_memory().unwrap();
        let domain = db.insert_domain("plain", None).unwrap();
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        assert_eq!(db.advance_cursor("g1", domain).unwrap(), None);
        assert_eq!(db.task("g1", domain).unwrap().unwrap().cursor, 1);
    }

    #[test]
    fn test_advance_cursor_missing_row_is_error() {
        let (db, domain) = seeded();
        assert!(matches!(
            db.advance_cursor("g1", domain),
            Err(QuizcastError::NotFound(_))
        ));
    }

    #[test]
    fn test_push_counts_and_ordering() {
        let (db, domain) = seeded();
        db.increment_push_counts("g1", &[1, 2, 3]).unwrap();
        db.increment_push_counts("g1", &[1]).unwrap();
        assert_eq!(db.push_count("g1", 1).unwrap(), 2);
        assert_eq!(db.push_count("g2", 1).unwrap(), 0);

        let ids: Vec<i64> = db
            .problems_by_push_count("g1", domain, 4)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![4, 5, 6, 7]);

        let stats = db.domain_push_stats("g1", domain).unwrap();
        assert_eq!(stats.total_problems, 9);
        assert_eq!(stats.total_pushes, 4);
        assert_eq!((stats.min_pushes, stats.max_pushes), (0, 2));
    }

    #[test]
    fn test_stats_for_empty_domain() {
        let db = QuizDb::open_in_memory().unwrap();
        let domain = db.insert_domain("empty", None).unwrap();
        let stats = db.domain_push_stats("g1", domain).unwrap();
        assert_eq!(stats, PushStats::default());
    }

    #[test]
    fn test_reset_progress_is_per_strategy() {
        let (db, domain) = seeded();
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        db.update_cursor("g1", domain, 7).unwrap();
        db.increment_push_counts("g1", &[1, 2]).unwrap();

        db.reset_progress("g1", domain, StrategyKind::LeastPushCount).unwrap();
        assert_eq!(db.push_count("g1", 1).unwrap(), 0);
        assert_eq!(db.cursor("g1", domain).unwrap(), 7);

        db.reset_progress("g1", domain, StrategyKind::SequentialBatch).unwrap();
        assert_eq!(db.cursor("g1", domain).unwrap(), 1);
    }

    #[test]
    fn test_bulk_toggles() {
        let (db, _) = seeded();
        db.insert_domain("go", None).unwrap();
        assert_eq!(db.set_all_domains_active("g1", "10:00").unwrap(), 2);
        assert_eq!(db.active_group_tasks("g1").unwrap().len(), 2);
        assert_eq!(db.active_tasks().unwrap().len(), 2);

        assert_eq!(db.deactivate_all("g1").unwrap(), 2);
        assert!(db.active_group_tasks("g1").unwrap().is_empty());
        assert_eq!(db.group_tasks("g1").unwrap().len(), 2);
    }

    #[test]
    fn test_subscribers_and_domain_lookup() {
        let db = QuizDb::open_in_memory().unwrap();
        let team = db.insert_study_group("backend").unwrap();
        let domain = db.insert_domain("sql", Some(team)).unwrap();
        assert!(db.subscribe(team, "bob").unwrap());
        assert!(db.subscribe(team, "alice").unwrap());
        assert!(!db.subscribe(team, "alice").unwrap());

        let found = db.domain_by_name("sql").unwrap().unwrap();
        assert_eq!(found.id, domain);
        assert_eq!(found.study_group_id, Some(team));
        assert_eq!(db.domain_by_id(domain).unwrap().unwrap().name, "sql");
        assert!(db.domain_by_name("nope").unwrap().is_none());
        assert_eq!(db.subscribers(team).unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_failed_cursor_write_rolls_back() {
        let (db, domain) = seeded();
        db.ensure_task("g1", domain, "08:00", true).unwrap();
        db.update_cursor("g1", domain, 4).unwrap();
        db.execute_raw(
            "CREATE TRIGGER freeze_cursor BEFORE UPDATE OF cursor ON group_tasks
             BEGIN SELECT RAISE(ABORT, 'cursor frozen'); END;",
        )
        .unwrap();

        assert!(db.advance_cursor("g1", domain).is_err());
        assert_eq!(db.cursor("g1", domain).unwrap(), 4);
    }

    #[test]
    fn test_failed_count_write_rolls_back_whole_batch() {
        let (db, _) = seeded();
        db.execute_raw(
            "CREATE TRIGGER reject_second BEFORE INSERT ON push_counts
             WHEN NEW.problem_id = 2
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        assert!(db.increment_push_counts("g1", &[1, 2, 3]).is_err());
        assert_eq!(db.push_count("g1", 1).unwrap(), 0);
        assert_eq!(db.push_count("g1", 3).unwrap(), 0);
    }
}
