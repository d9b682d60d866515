//! Execution coordinator: runs tasks through the external [`TaskRunner`].
//!
//! At most one run per task is in flight. The check-and-set is a
//! [`TaskStore::update`] mutator, so a losing request gets `AlreadyRunning`
//! instead of queueing.
//!
//! ```text
//! run_task ──► store.update(pending → running) ──► append TaskRun
//!                                 │
//!            tokio::spawn(supervise) ── timeout(max_run, spawn(runner.execute))
//!                                 │
//!            completed | failed | timeout ──► close run ──► task_update
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use scout_core::config::{DeletePolicy, SchedulerConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::error::{Result, SchedulerError};
use crate::events::{Event, EventBus};
use crate::store::TaskStore;
use crate::tasks::{RunStatus, Task, TaskRun, TaskStatus};

/// Error recorded when a running task is deleted under the abort policy.
pub const CANCELLED_BY_DELETE: &str = "cancelled: task deleted";

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub result: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// The external collaborator that actually performs a task.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn execute(&self, task: Task, progress: ProgressReporter) -> anyhow::Result<RunOutcome>;
}

struct InFlight {
    run_id: String,
    runner: AbortHandle,
    done: watch::Receiver<bool>,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<String, InFlight>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handed to the runner to report progress of one run.
///
/// Reports are clamped to 0–100, ignored unless they raise the current value,
/// and ignored once the run is no longer the task's current run.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<TaskStore>,
    events: EventBus,
    in_flight: InFlightMap,
    task_id: String,
    run_id: String,
}

impl ProgressReporter {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Report progress in percent. Returns whether it was applied.
    pub fn report(&self, percent: i64) -> bool {
        let percent = percent.clamp(0, 100) as u8;

        let updated = {
            let in_flight = lock(&self.in_flight);
            let current = in_flight
                .get(&self.task_id)
                .is_some_and(|f| f.run_id == self.run_id);
            if !current {
                return false;
            }
            self.store.update(&self.task_id, |t| {
                if !t.is_running() || percent <= t.progress {
                    return Err(SchedulerError::RunClosed(self.run_id.clone()));
                }
                t.progress = percent;
                Ok(())
            })
        };

        match updated {
            Ok(task) => {
                self.events.publish(Event::TaskUpdate { task });
                true
            }
            Err(_) => false,
        }
    }
}

/// Starts runs, supervises them, and records their outcome.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<TaskStore>,
    events: EventBus,
    runner: Arc<dyn TaskRunner>,
    max_run: Duration,
    on_delete: DeletePolicy,
    in_flight: InFlightMap,
}

impl Coordinator {
    pub fn new(
        store: Arc<TaskStore>,
        events: EventBus,
        runner: Arc<dyn TaskRunner>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            events,
            runner,
            max_run: Duration::from_secs(config.max_run_secs),
            on_delete: config.on_delete_running,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a run of `task_id` now. Returns the opened run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run_task(&self, task_id: &str) -> Result<TaskRun> {
        let started = self.store.update(task_id, |t| {
            if t.is_running() {
                return Err(SchedulerError::AlreadyRunning(t.id.clone()));
            }
            t.status = TaskStatus::Running;
            t.progress = 0;
            t.result = None;
            t.error = None;
            t.artifacts.clear();
            Ok(())
        })?;

        let run = match self
            .store
            .append_run(task_id, TaskRun::start(task_id, self.store.clock().now()))
        {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!("⚠️ Could not open run for task {task_id}: {e}");
                return Err(e);
            }
        };
        self.events.publish(Event::TaskUpdate {
            task: started.clone(),
        });
        tracing::info!("▶️ Run started: '{}' ({})", started.name, run.run_id);

        let reporter = ProgressReporter {
            store: self.store.clone(),
            events: self.events.clone(),
            in_flight: self.in_flight.clone(),
            task_id: task_id.to_string(),
            run_id: run.run_id.clone(),
        };
        let (done_tx, done_rx) = watch::channel(false);

        let inner = {
            let mut in_flight = lock(&self.in_flight);
            let runner = self.runner.clone();
            let inner = tokio::spawn(async move { runner.execute(started, reporter).await });
            in_flight.insert(
                task_id.to_string(),
                InFlight {
                    run_id: run.run_id.clone(),
                    runner: inner.abort_handle(),
                    done: done_rx,
                },
            );
            inner
        };

        let this = self.clone();
        let task_id = task_id.to_string();
        let run_id = run.run_id.clone();
        tokio::spawn(async move {
            this.supervise(&task_id, &run_id, inner).await;
            let _ = done_tx.send(true);
        });

        Ok(run)
    }

    async fn supervise(
        &self,
        task_id: &str,
        run_id: &str,
        mut inner: JoinHandle<anyhow::Result<RunOutcome>>,
    ) {
        let outcome = match tokio::time::timeout(self.max_run, &mut inner).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => Err(SchedulerError::Runner(format!("{e:#}"))),
            Ok(Err(join_err)) => Err(SchedulerError::Runner(describe_join_error(join_err))),
            Err(_) => {
                inner.abort();
                Err(SchedulerError::Timeout(self.max_run.as_secs()))
            }
        };
        self.finish(task_id, run_id, outcome);
    }

    fn finish(&self, task_id: &str, run_id: &str, outcome: Result<RunOutcome>) {
        {
            let mut in_flight = lock(&self.in_flight);
            let current = in_flight.get(task_id).is_some_and(|f| f.run_id == run_id);
            if !current {
                tracing::debug!("Run {run_id} was cancelled, nothing to record");
                return;
            }
            in_flight.remove(task_id);
        }

        let (run_status, run_error) = match &outcome {
            Ok(_) => (RunStatus::Completed, None),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self.store.close_run(task_id, run_id, run_status, run_error) {
            tracing::warn!("⚠️ Could not close run {run_id}: {e}");
        }

        let updated = match outcome {
            Ok(out) => self.store.update(task_id, move |t| {
                t.status = TaskStatus::Completed;
                t.progress = 100;
                t.result = Some(out.result);
                t.artifacts = out.artifacts;
                t.error = None;
                Ok(())
            }),
            Err(e) => self.store.update(task_id, move |t| {
                t.status = TaskStatus::Failed;
                t.error = Some(e.to_string());
                t.result = None;
                t.artifacts.clear();
                Ok(())
            }),
        };

        match updated {
            Ok(task) => {
                match task.status {
                    TaskStatus::Completed => tracing::info!("✅ Task completed: '{}'", task.name),
                    _ => tracing::warn!(
                        "⚠️ Task failed: '{}': {}",
                        task.name,
                        task.error.as_deref().unwrap_or_default()
                    ),
                }
                self.events.publish(Event::TaskUpdate { task });
            }
            Err(e) => tracing::debug!("Run {run_id} finished after task went away: {e}"),
        }
    }

    /// Whether a run of `task_id` is in flight.
    pub fn is_running(&self, task_id: &str) -> bool {
        lock(&self.in_flight).contains_key(task_id)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Wait until the current run of `task_id`, if any, has been recorded.
    pub async fn wait_idle(&self, task_id: &str) {
        let rx = lock(&self.in_flight).get(task_id).map(|f| f.done.clone());
        let Some(mut rx) = rx else {
            return;
        };
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Apply the delete policy to an in-flight run before its task is removed.
    pub async fn release_for_delete(&self, task_id: &str) {
        match self.on_delete {
            DeletePolicy::Await => self.wait_idle(task_id).await,
            DeletePolicy::Abort => {
                let Some(flight) = lock(&self.in_flight).remove(task_id) else {
                    return;
                };
                flight.runner.abort();
                if let Err(e) = self.store.close_run(
                    task_id,
                    &flight.run_id,
                    RunStatus::Failed,
                    Some(CANCELLED_BY_DELETE.to_string()),
                ) {
                    tracing::warn!("⚠️ Could not close cancelled run {}: {e}", flight.run_id);
                }
                tracing::info!("🛑 Aborted run {} of deleted task {task_id}", flight.run_id);
            }
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return "runner cancelled".to_string();
    }
    let payload = err.into_panic();
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("runner panicked: {msg}")
}
