//! Durable storage for tasks, runs and schedules.
//!
//! ```text
//! TaskStore / SchedulerEngine
//!        │  WriteOp
//!        ▼
//!   DurableWriter ── retry queue (flushed every tick)
//!        │
//!        ▼
//!  dyn SchedulerBackend ── SchedulerDb (SQLite) | MemoryBackend
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::tasks::{RunStatus, Schedule, Task, TaskRun, TaskStatus};
use crate::trigger::Trigger;

/// Storage seam used by the store and the scheduler.
pub trait SchedulerBackend: Send + Sync {
    fn load_tasks(&self) -> Result<Vec<Task>>;
    fn save_task(&self, task: &Task) -> Result<()>;
    /// Delete a task together with its runs and schedule.
    fn delete_task(&self, task_id: &str) -> Result<()>;

    fn load_runs(&self) -> Result<Vec<TaskRun>>;
    fn save_run(&self, run: &TaskRun) -> Result<()>;
    fn delete_runs(&self, run_ids: &[String]) -> Result<()>;

    fn load_schedules(&self) -> Result<Vec<StoredSchedule>>;
    fn save_schedule(&self, schedule: &Schedule) -> Result<()>;
    fn delete_schedule(&self, task_id: &str) -> Result<()>;
}

/// A schedule row as persisted. The trigger stays encoded until
/// [`StoredSchedule::decode`] so a corrupt row can be reported per task.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSchedule {
    pub task_id: String,
    pub spec: String,
    pub trigger_json: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredSchedule {
    pub fn encode(schedule: &Schedule) -> Result<Self> {
        Ok(Self {
            task_id: schedule.task_id.clone(),
            spec: schedule.spec.clone(),
            trigger_json: serde_json::to_string(&schedule.trigger)?,
            next_run_time: schedule.next_run_time,
            created_at: schedule.created_at,
        })
    }

    pub fn decode(&self) -> Result<Schedule> {
        let trigger: Trigger = serde_json::from_str(&self.trigger_json)?;
        Ok(Schedule::new(
            &self.task_id,
            &self.spec,
            trigger,
            self.next_run_time,
            self.created_at,
        ))
    }
}

// ─── SQLite ───────────────────────────────────────────────

/// SQLite-backed persistence store for all scheduler data.
pub struct SchedulerDb {
    conn: Mutex<rusqlite::Connection>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SchedulerError::Persistence(format!("DB dir: {e}")))?;
        }
        let conn = rusqlite::Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Mutex::new(rusqlite::Connection::open_in_memory()?),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Persistence("connection lock poisoned".into()))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                progress INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                result TEXT,
                error TEXT,
                artifacts TEXT NOT NULL DEFAULT '[]'   -- JSON array
            );

            -- Append-only run history
            CREATE TABLE IF NOT EXISTS task_runs (
                run_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL,                  -- 'running', 'completed', 'failed'
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs (task_id, start_time);

            -- At most one schedule per task
            CREATE TABLE IF NOT EXISTS schedules (
                task_id TEXT PRIMARY KEY,
                spec TEXT NOT NULL,
                trigger_json TEXT NOT NULL,            -- parsed descriptor
                next_run_time TEXT,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl SchedulerBackend for SchedulerDb {
    fn load_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, status, progress, created_at, updated_at, result, error, artifacts
             FROM tasks ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut tasks = Vec::new();
        for row in rows {
            let (id, name, description, status, progress, created, updated, result, error, artifacts) =
                row?;
            let (Some(status), Some(created_at), Some(updated_at)) = (
                TaskStatus::parse(&status),
                parse_ts(&created),
                parse_ts(&updated),
            ) else {
                tracing::warn!("⚠️ Skipping unreadable task row {id}");
                continue;
            };
            let artifacts = match serde_json::from_str(&artifacts) {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!("⚠️ Unreadable artifacts for task {id}, treating as empty: {e}");
                    Vec::new()
                }
            };
            tasks.push(Task {
                id,
                name,
                description,
                status,
                progress: progress.clamp(0, 100) as u8,
                created_at,
                updated_at,
                result,
                error,
                artifacts,
            });
        }
        Ok(tasks)
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO tasks
             (id, name, description, status, progress, created_at, updated_at, result, error, artifacts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                task.id,
                task.name,
                task.description,
                task.status.as_str(),
                task.progress as i64,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.result,
                task.error,
                serde_json::to_string(&task.artifacts)?,
            ],
        )?;
        Ok(())
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM task_runs WHERE task_id = ?1", [task_id])?;
        tx.execute("DELETE FROM schedules WHERE task_id = ?1", [task_id])?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", [task_id])?;
        tx.commit()?;
        Ok(())
    }

    fn load_runs(&self) -> Result<Vec<TaskRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, task_id, start_time, end_time, status, error
             FROM task_runs ORDER BY start_time",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, task_id, start, end, status, error) = row?;
            let (Some(start_time), Some(status)) = (parse_ts(&start), RunStatus::parse(&status))
            else {
                tracing::warn!("⚠️ Skipping unreadable run row {run_id}");
                continue;
            };
            runs.push(TaskRun {
                run_id,
                task_id,
                start_time,
                end_time: end.as_deref().and_then(parse_ts),
                status,
                error,
            });
        }
        Ok(runs)
    }

    fn save_run(&self, run: &TaskRun) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO task_runs (run_id, task_id, start_time, end_time, status, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                run.run_id,
                run.task_id,
                run.start_time.to_rfc3339(),
                run.end_time.map(|t| t.to_rfc3339()),
                run.status.as_str(),
                run.error,
            ],
        )?;
        Ok(())
    }

    fn delete_runs(&self, run_ids: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for id in run_ids {
            tx.execute("DELETE FROM task_runs WHERE run_id = ?1", [id])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_schedules(&self) -> Result<Vec<StoredSchedule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, spec, trigger_json, next_run_time, created_at FROM schedules",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut schedules = Vec::new();
        for row in rows {
            let (task_id, spec, trigger_json, next, created) = row?;
            schedules.push(StoredSchedule {
                task_id,
                spec,
                trigger_json,
                next_run_time: next.as_deref().and_then(parse_ts),
                created_at: parse_ts(&created).unwrap_or_else(Utc::now),
            });
        }
        Ok(schedules)
    }

    fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        let stored = StoredSchedule::encode(schedule)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO schedules (task_id, spec, trigger_json, next_run_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                stored.task_id,
                stored.spec,
                stored.trigger_json,
                stored.next_run_time.map(|t| t.to_rfc3339()),
                stored.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_schedule(&self, task_id: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM schedules WHERE task_id = ?1", [task_id])?;
        Ok(())
    }
}

// ─── In-memory ────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<String, Task>,
    runs: HashMap<String, TaskRun>,
    schedules: HashMap<String, StoredSchedule>,
}

/// Ephemeral backend. Nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every write fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| SchedulerError::Persistence("memory backend lock poisoned".into()))
    }

    fn writable(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::Persistence("backend unavailable".into()));
        }
        self.state()
    }
}

impl SchedulerBackend for MemoryBackend {
    fn load_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.state()?.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        self.writable()?
            .tasks
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let mut state = self.writable()?;
        state.tasks.remove(task_id);
        state.runs.retain(|_, r| r.task_id != task_id);
        state.schedules.remove(task_id);
        Ok(())
    }

    fn load_runs(&self) -> Result<Vec<TaskRun>> {
        let mut runs: Vec<TaskRun> = self.state()?.runs.values().cloned().collect();
        runs.sort_by_key(|r| r.start_time);
        Ok(runs)
    }

    fn save_run(&self, run: &TaskRun) -> Result<()> {
        self.writable()?
            .runs
            .insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn delete_runs(&self, run_ids: &[String]) -> Result<()> {
        let mut state = self.writable()?;
        for id in run_ids {
            state.runs.remove(id);
        }
        Ok(())
    }

    fn load_schedules(&self) -> Result<Vec<StoredSchedule>> {
        Ok(self.state()?.schedules.values().cloned().collect())
    }

    fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        let stored = StoredSchedule::encode(schedule)?;
        self.writable()?
            .schedules
            .insert(stored.task_id.clone(), stored);
        Ok(())
    }

    fn delete_schedule(&self, task_id: &str) -> Result<()> {
        self.writable()?.schedules.remove(task_id);
        Ok(())
    }
}

// ─── Durable writer ───────────────────────────────────────

/// A single persistence write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    SaveTask(Task),
    DeleteTask(String),
    SaveRun(TaskRun),
    DeleteRuns(Vec<String>),
    SaveSchedule(Schedule),
    DeleteSchedule(String),
}

impl WriteOp {
    /// Writes with the same key supersede each other.
    fn key(&self) -> String {
        match self {
            Self::SaveTask(t) => format!("task:{}", t.id),
            Self::DeleteTask(id) => format!("task:{id}"),
            Self::SaveRun(r) => format!("run:{}", r.run_id),
            Self::DeleteRuns(ids) => format!("prune:{}", ids.join(",")),
            Self::SaveSchedule(s) => format!("schedule:{}", s.task_id),
            Self::DeleteSchedule(id) => format!("schedule:{id}"),
        }
    }

    fn task_id(&self) -> Option<&str> {
        match self {
            Self::SaveTask(t) => Some(&t.id),
            Self::DeleteTask(id) | Self::DeleteSchedule(id) => Some(id),
            Self::SaveRun(r) => Some(&r.task_id),
            Self::SaveSchedule(s) => Some(&s.task_id),
            Self::DeleteRuns(_) => None,
        }
    }

    fn apply(&self, backend: &dyn SchedulerBackend) -> Result<()> {
        match self {
            Self::SaveTask(t) => backend.save_task(t),
            Self::DeleteTask(id) => backend.delete_task(id),
            Self::SaveRun(r) => backend.save_run(r),
            Self::DeleteRuns(ids) => backend.delete_runs(ids),
            Self::SaveSchedule(s) => backend.save_schedule(s),
            Self::DeleteSchedule(id) => backend.delete_schedule(id),
        }
    }
}

struct PendingWrite {
    op: WriteOp,
    retries: u32,
}

/// Applies writes to the backend, queueing failures for bounded retry.
///
/// In-memory state is always ahead of or equal to the backend; the number of
/// queued writes is how far behind the backend is.
pub struct DurableWriter {
    backend: Arc<dyn SchedulerBackend>,
    pending: Mutex<VecDeque<PendingWrite>>,
    max_retries: u32,
}

impl DurableWriter {
    pub fn new(backend: Arc<dyn SchedulerBackend>, max_retries: u32) -> Self {
        Self {
            backend,
            pending: Mutex::new(VecDeque::new()),
            max_retries,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SchedulerBackend> {
        &self.backend
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<PendingWrite>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a write now; on failure queue it for retry.
    pub fn submit(&self, op: WriteOp) {
        let mut pending = self.pending();

        let key = op.key();
        pending.retain(|p| p.op.key() != key);
        match &op {
            WriteOp::DeleteTask(id) => {
                pending.retain(|p| p.op.task_id() != Some(id.as_str()));
            }
            WriteOp::DeleteRuns(ids) => {
                pending.retain(|p| !matches!(&p.op, WriteOp::SaveRun(r) if ids.contains(&r.run_id)));
            }
            _ => {}
        }

        if let Err(e) = op.apply(self.backend.as_ref()) {
            tracing::warn!("⚠️ Persist failed for {key}, queued for retry: {e}");
            pending.push_back(PendingWrite { op, retries: 0 });
        }
    }

    /// Retry queued writes once. Returns how many are still queued.
    pub fn flush_pending(&self) -> usize {
        let mut pending = self.pending();
        if pending.is_empty() {
            return 0;
        }

        let mut still_pending = VecDeque::new();
        while let Some(mut write) = pending.pop_front() {
            match write.op.apply(self.backend.as_ref()) {
                Ok(()) => tracing::debug!("Persisted queued write {}", write.op.key()),
                Err(e) => {
                    write.retries += 1;
                    if write.retries >= self.max_retries {
                        tracing::error!(
                            "❌ Dropping write {} after {} retries: {e}",
                            write.op.key(),
                            write.retries
                        );
                    } else {
                        still_pending.push_back(write);
                    }
                }
            }
        }

        *pending = still_pending;
        pending.len()
    }

    /// Number of writes the backend has not yet accepted.
    pub fn stale_writes(&self) -> usize {
        self.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_task(name: &str) -> Task {
        Task::new(name, "do things", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    fn sample_schedule(task_id: &str) -> Schedule {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let trigger = Trigger::parse("every 1h").unwrap();
        let next = trigger.first_fire(now);
        Schedule::new(task_id, "every 1h", trigger, next, now)
    }

    #[test]
    fn test_sqlite_task_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("scheduler.db");

        let mut task = sample_task("report");
        task.status = TaskStatus::Completed;
        task.progress = 100;
        task.result = Some("done".into());
        task.artifacts = vec!["s3://bucket/report.pdf".into()];

        {
            let db = SchedulerDb::open(&path).unwrap();
            db.save_task(&task).unwrap();
        }

        let db = SchedulerDb::open(&path).unwrap();
        let loaded = db.load_tasks().unwrap();
        assert_eq!(loaded, vec![task]);
    }

    #[test]
    fn test_sqlite_runs_and_schedules() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let task = sample_task("t");
        db.save_task(&task).unwrap();

        let mut run = TaskRun::start(&task.id, task.created_at);
        db.save_run(&run).unwrap();
        run.end_time = Some(task.created_at + chrono::Duration::seconds(5));
        run.status = RunStatus::Failed;
        run.error = Some("boom".into());
        db.save_run(&run).unwrap();

        let runs = db.load_runs().unwrap();
        assert_eq!(runs, vec![run]);

        let schedule = sample_schedule(&task.id);
        db.save_schedule(&schedule).unwrap();
        let stored = db.load_schedules().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].decode().unwrap(), schedule);
    }

    #[test]
    fn test_sqlite_delete_task_cascades() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let task = sample_task("t");
        let other = sample_task("other");
        db.save_task(&task).unwrap();
        db.save_task(&other).unwrap();
        db.save_run(&TaskRun::start(&task.id, task.created_at)).unwrap();
        db.save_run(&TaskRun::start(&other.id, other.created_at)).unwrap();
        db.save_schedule(&sample_schedule(&task.id)).unwrap();

        db.delete_task(&task.id).unwrap();

        let tasks = db.load_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, other.id);
        let runs = db.load_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].task_id, other.id);
        assert!(db.load_schedules().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_trigger_fails_decode_only() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO schedules (task_id, spec, trigger_json, next_run_time, created_at)
                 VALUES ('t1', 'every 1h', '{not json', NULL, '2026-01-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
        let stored = db.load_schedules().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(matches!(stored[0].decode(), Err(SchedulerError::Persistence(_))));
    }

    #[test]
    fn test_memory_backend_cascade() {
        let backend = MemoryBackend::new();
        let task = sample_task("t");
        backend.save_task(&task).unwrap();
        backend.save_run(&TaskRun::start(&task.id, task.created_at)).unwrap();
        backend.save_schedule(&sample_schedule(&task.id)).unwrap();

        backend.delete_task(&task.id).unwrap();
        assert!(backend.load_tasks().unwrap().is_empty());
        assert!(backend.load_runs().unwrap().is_empty());
        assert!(backend.load_schedules().unwrap().is_empty());
    }

    #[test]
    fn test_writer_queues_and_retries() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DurableWriter::new(backend.clone(), 5);
        let task = sample_task("t");

        backend.set_unavailable(true);
        writer.submit(WriteOp::SaveTask(task.clone()));
        assert_eq!(writer.stale_writes(), 1);
        assert_eq!(writer.flush_pending(), 1);

        backend.set_unavailable(false);
        assert_eq!(writer.flush_pending(), 0);
        assert_eq!(writer.stale_writes(), 0);
        assert_eq!(backend.load_tasks().unwrap(), vec![task]);
    }

    #[test]
    fn test_writer_drops_after_max_retries() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DurableWriter::new(backend.clone(), 2);

        backend.set_unavailable(true);
        writer.submit(WriteOp::SaveTask(sample_task("t")));
        assert_eq!(writer.flush_pending(), 1);
        assert_eq!(writer.flush_pending(), 0);
        assert_eq!(writer.stale_writes(), 0);
    }

    #[test]
    fn test_newer_write_supersedes_queued_one() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DurableWriter::new(backend.clone(), 5);
        let mut task = sample_task("t");

        backend.set_unavailable(true);
        writer.submit(WriteOp::SaveTask(task.clone()));
        task.progress = 50;
        writer.submit(WriteOp::SaveTask(task.clone()));
        assert_eq!(writer.stale_writes(), 1);

        backend.set_unavailable(false);
        writer.flush_pending();
        assert_eq!(backend.load_tasks().unwrap()[0].progress, 50);
    }

    #[test]
    fn test_delete_discards_queued_writes_for_task() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DurableWriter::new(backend.clone(), 5);
        let task = sample_task("t");

        backend.set_unavailable(true);
        writer.submit(WriteOp::SaveTask(task.clone()));
        writer.submit(WriteOp::SaveRun(TaskRun::start(&task.id, task.created_at)));
        assert_eq!(writer.stale_writes(), 2);

        backend.set_unavailable(false);
        writer.submit(WriteOp::DeleteTask(task.id.clone()));
        assert_eq!(writer.stale_writes(), 0);
        assert!(backend.load_runs().unwrap().is_empty());
    }

    #[test]
    fn test_prune_discards_queued_run_saves() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DurableWriter::new(backend.clone(), 5);
        let task = sample_task("t");
        let pruned = TaskRun::start(&task.id, task.created_at);
        let kept = TaskRun::start(&task.id, task.created_at);

        backend.set_unavailable(true);
        writer.submit(WriteOp::SaveRun(pruned.clone()));
        writer.submit(WriteOp::SaveRun(kept.clone()));
        writer.submit(WriteOp::DeleteRuns(vec![pruned.run_id.clone()]));
        // the kept save and the prune itself
        assert_eq!(writer.stale_writes(), 2);

        backend.set_unavailable(false);
        assert_eq!(writer.flush_pending(), 0);
        let runs = backend.load_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, kept.run_id);
    }

    #[test]
    fn test_corrupt_artifacts_load_as_empty() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut task = sample_task("t");
        task.artifacts = vec!["a.md".into()];
        db.save_task(&task).unwrap();
        db.conn()
            .unwrap()
            .execute("UPDATE tasks SET artifacts = '[oops' WHERE id = ?1", [&task.id])
            .unwrap();

        let tasks = db.load_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].artifacts.is_empty());
    }
}
