//! Task store: the single owner of task and run state.
//!
//! Every mutation goes through a per-task mutex and is applied to a copy that
//! is committed only if the mutator succeeds. Committed state is then handed
//! to the [`DurableWriter`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Duration;
use scout_core::config::RetentionConfig;

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::persistence::{DurableWriter, WriteOp};
use crate::tasks::{RunStatus, Task, TaskRun, TaskStatus};

/// Error recorded on tasks and runs found running at startup.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

type TaskCell = Arc<Mutex<Task>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory task and run state, written through to a backend.
pub struct TaskStore {
    tasks: RwLock<HashMap<String, TaskCell>>,
    runs: Mutex<HashMap<String, Vec<TaskRun>>>,
    journal: DurableWriter,
    clock: Arc<dyn Clock>,
    retention: RetentionConfig,
}

impl TaskStore {
    /// Empty store.
    pub fn new(journal: DurableWriter, clock: Arc<dyn Clock>, retention: RetentionConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            journal,
            clock,
            retention,
        }
    }

    /// Load tasks and runs from the journal's backend.
    ///
    /// Tasks persisted as running were interrupted: they are marked failed and
    /// their open runs closed as failed.
    pub fn load(journal: DurableWriter, clock: Arc<dyn Clock>, retention: RetentionConfig) -> Result<Self> {
        let backend = journal.backend().clone();
        let tasks = backend.load_tasks()?;
        let runs = backend.load_runs()?;
        let store = Self::new(journal, clock, retention);
        let now = store.clock.now();

        let mut recovered = 0;
        {
            let mut map = store.tasks.write().unwrap_or_else(|e| e.into_inner());
            for mut task in tasks {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Failed;
                    task.error = Some(INTERRUPTED_BY_RESTART.to_string());
                    task.updated_at = now;
                    store.journal.submit(WriteOp::SaveTask(task.clone()));
                    recovered += 1;
                }
                map.insert(task.id.clone(), Arc::new(Mutex::new(task)));
            }
        }

        let mut orphans = Vec::new();
        {
            let known = store.tasks.read().unwrap_or_else(|e| e.into_inner());
            let mut by_task = lock(&store.runs);
            for mut run in runs {
                if !known.contains_key(&run.task_id) {
                    orphans.push(run.run_id);
                    continue;
                }
                if run.is_open() {
                    run.end_time = Some(now);
                    run.status = RunStatus::Failed;
                    run.error = Some(INTERRUPTED_BY_RESTART.to_string());
                    store.journal.submit(WriteOp::SaveRun(run.clone()));
                }
                by_task.entry(run.task_id.clone()).or_default().push(run);
            }
            for list in by_task.values_mut() {
                list.sort_by_key(|r| r.start_time);
            }
        }
        if !orphans.is_empty() {
            tracing::warn!("⚠️ Dropping {} runs of deleted tasks", orphans.len());
            store.journal.submit(WriteOp::DeleteRuns(orphans));
        }

        if recovered > 0 {
            tracing::warn!("⚠️ {recovered} task(s) were running at shutdown, marked failed");
        }
        tracing::info!("📂 Loaded {} task(s) from storage", store.len());
        Ok(store)
    }

    pub fn journal(&self) -> &DurableWriter {
        &self.journal
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, id: &str) -> Result<TaskCell> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(format!("task {id}")))
    }

    fn contains(&self, id: &str) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Create a pending task.
    pub fn create(&self, name: &str, description: &str) -> Task {
        let task = Task::new(name, description, self.clock.now());
        let cell = Arc::new(Mutex::new(task.clone()));
        {
            let guard = lock(&cell);
            self.tasks
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(task.id.clone(), cell.clone());
            self.journal.submit(WriteOp::SaveTask(guard.clone()));
        }
        tracing::info!("📋 Task created: '{}' ({})", task.name, task.id);
        task
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        let cell = self.cell(id)?;
        let task = lock(&cell).clone();
        Ok(task)
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let cells: Vec<TaskCell> = self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let mut tasks: Vec<Task> = cells.iter().map(|c| lock(c).clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Atomic read-modify-write of one task.
    ///
    /// The mutator sees a copy; returning `Err` discards it and nothing is
    /// written. On success `updated_at` is stamped and the new state persisted.
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let cell = self.cell(id)?;
        let mut current = lock(&cell);
        if !self.contains(id) {
            return Err(SchedulerError::NotFound(format!("task {id}")));
        }

        let mut draft = current.clone();
        mutator(&mut draft)?;
        draft.id = current.id.clone();
        draft.updated_at = self.clock.now();

        *current = draft.clone();
        self.journal.submit(WriteOp::SaveTask(draft.clone()));
        Ok(draft)
    }

    /// Remove a task with its runs and persisted schedule.
    pub fn delete(&self, id: &str) -> Result<Task> {
        let cell = self
            .tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {id}")))?;

        let task = lock(&cell).clone();
        let mut runs = lock(&self.runs);
        runs.remove(id);
        self.journal.submit(WriteOp::DeleteTask(id.to_string()));
        drop(runs);

        tracing::info!("🗑️ Task deleted: '{}' ({})", task.name, task.id);
        Ok(task)
    }

    /// Append a run to a task's history.
    pub fn append_run(&self, task_id: &str, run: TaskRun) -> Result<TaskRun> {
        let mut runs = lock(&self.runs);
        if !self.contains(task_id) {
            return Err(SchedulerError::NotFound(format!("task {task_id}")));
        }

        let mut run = run;
        run.task_id = task_id.to_string();
        let list = runs.entry(task_id.to_string()).or_default();
        list.push(run.clone());
        self.journal.submit(WriteOp::SaveRun(run.clone()));

        if let Some(max) = self.retention.max_runs_per_task {
            let pruned = prune_to_count(list, max);
            if !pruned.is_empty() {
                tracing::debug!("Pruned {} old run(s) of task {task_id}", pruned.len());
                self.journal.submit(WriteOp::DeleteRuns(pruned));
            }
        }

        Ok(run)
    }

    /// Close an open run. Closing an already-closed run is an error.
    pub fn close_run(
        &self,
        task_id: &str,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<TaskRun> {
        let mut runs = lock(&self.runs);
        let run = runs
            .get_mut(task_id)
            .and_then(|list| list.iter_mut().find(|r| r.run_id == run_id))
            .ok_or_else(|| SchedulerError::NotFound(format!("run {run_id}")))?;

        if !run.is_open() {
            return Err(SchedulerError::RunClosed(run_id.to_string()));
        }

        run.end_time = Some(self.clock.now());
        run.status = status;
        run.error = error;
        let closed = run.clone();
        self.journal.submit(WriteOp::SaveRun(closed.clone()));
        Ok(closed)
    }

    /// A task's runs, oldest first.
    pub fn list_runs(&self, task_id: &str) -> Result<Vec<TaskRun>> {
        let runs = lock(&self.runs);
        if !self.contains(task_id) {
            return Err(SchedulerError::NotFound(format!("task {task_id}")));
        }
        Ok(runs.get(task_id).cloned().unwrap_or_default())
    }

    /// Most recent runs across all tasks, newest first.
    pub fn recent_runs(&self, limit: usize) -> Vec<TaskRun> {
        let mut all: Vec<TaskRun> = lock(&self.runs).values().flatten().cloned().collect();
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        all.truncate(limit);
        all
    }

    /// Age-based retention: drop closed runs older than `max_age_days`.
    pub fn prune_expired_runs(&self) -> usize {
        let Some(days) = self.retention.max_age_days else {
            return 0;
        };
        let cutoff = self.clock.now() - Duration::days(days as i64);

        let mut runs = lock(&self.runs);
        let mut pruned = Vec::new();
        for list in runs.values_mut() {
            list.retain(|r| {
                let expired = r.end_time.is_some_and(|end| end < cutoff);
                if expired {
                    pruned.push(r.run_id.clone());
                }
                !expired
            });
        }

        let count = pruned.len();
        if count > 0 {
            tracing::info!("🧹 Pruned {count} run(s) older than {days} day(s)");
            self.journal.submit(WriteOp::DeleteRuns(pruned));
        }
        count
    }
}

/// Drop the oldest closed runs until at most `max` remain. Open runs are kept.
fn prune_to_count(list: &mut Vec<TaskRun>, max: usize) -> Vec<String> {
    let mut excess = list.len().saturating_sub(max);
    let mut pruned = Vec::new();
    list.retain(|r| {
        if excess > 0 && !r.is_open() {
            excess -= 1;
            pruned.push(r.run_id.clone());
            false
        } else {
            true
        }
    });
    pruned
}
