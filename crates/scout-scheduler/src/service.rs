//! `TaskService`: the API exposed to agents, the gateway and the binary.
//!
//! Wires the store, coordinator, engine and event bus together over one
//! storage backend.

use std::sync::Arc;
use std::time::Duration;

use scout_core::ScoutConfig;
use scout_core::config::{RetentionConfig, SchedulerConfig};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::coordinator::{Coordinator, TaskRunner};
use crate::engine::{self, SchedulerEngine};
use crate::error::{Result, SchedulerError};
use crate::events::{Event, EventBus, EventSubscription};
use crate::persistence::{DurableWriter, MemoryBackend, SchedulerBackend, SchedulerDb};
use crate::store::TaskStore;
use crate::tasks::{Schedule, Task, TaskRun};

/// Facade over the scheduler components.
pub struct TaskService {
    store: Arc<TaskStore>,
    engine: Arc<SchedulerEngine>,
    events: EventBus,
}

impl TaskService {
    /// Build from config: storage backend per `[storage]`, wall-clock time.
    pub fn open(config: &ScoutConfig, runner: Arc<dyn TaskRunner>) -> Result<Self> {
        let backend: Arc<dyn SchedulerBackend> = match config.storage.backend.as_str() {
            "sqlite" => {
                let path = config.storage.resolved_path();
                tracing::info!("💾 Using SQLite storage at {}", path.display());
                Arc::new(SchedulerDb::open(&path)?)
            }
            "memory" => {
                tracing::info!("💾 Using in-memory storage (nothing survives restart)");
                Arc::new(MemoryBackend::new())
            }
            other => {
                return Err(SchedulerError::Persistence(format!(
                    "Unknown storage backend '{other}' (expected sqlite or memory)"
                )));
            }
        };
        Self::with_backend(
            &config.scheduler,
            config.retention.clone(),
            backend,
            Arc::new(SystemClock),
            runner,
        )
    }

    /// Load state from `backend` and re-arm persisted schedules.
    pub fn with_backend(
        config: &SchedulerConfig,
        retention: RetentionConfig,
        backend: Arc<dyn SchedulerBackend>,
        clock: Arc<dyn Clock>,
        runner: Arc<dyn TaskRunner>,
    ) -> Result<Self> {
        let journal = DurableWriter::new(backend, config.persist_max_retries);
        let store = Arc::new(TaskStore::load(journal, clock, retention)?);
        let events = EventBus::new(config.event_capacity);
        let coordinator = Coordinator::new(store.clone(), events.clone(), runner, config);
        let engine = Arc::new(SchedulerEngine::new(
            store.clone(),
            coordinator,
            events.clone(),
            config,
        ));
        engine.restore()?;

        Ok(Self {
            store,
            engine,
            events,
        })
    }

    pub fn engine(&self) -> &Arc<SchedulerEngine> {
        &self.engine
    }

    /// Start the tick loop on the current runtime.
    pub fn spawn_scheduler(&self, tick_interval: Duration) -> JoinHandle<()> {
        tokio::spawn(engine::spawn_scheduler(self.engine.clone(), tick_interval))
    }

    /// Start only the write-retry loop, for processes that do not tick.
    pub fn spawn_journal_flush(&self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(engine::spawn_journal_flush(self.store.clone(), interval))
    }

    // ─── Tasks ────────────────────────────────────────────

    /// Create a task, optionally scheduling it. A bad schedule rejects the
    /// whole call and leaves no task behind.
    ///
    /// Subscribers see the task's `task_update` before its `schedule_update`.
    pub fn create_task(&self, name: &str, description: &str, schedule: Option<&str>) -> Result<Task> {
        let first = schedule
            .map(|spec| self.engine.first_fire(spec).map(|(trigger, next)| (spec, trigger, next)))
            .transpose()?;

        let task = self.store.create(name, description);
        self.events.publish(Event::TaskUpdate { task: task.clone() });

        if let Some((spec, trigger, next)) = first {
            self.engine.arm(&task.id, spec, trigger, next)?;
        }
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.store.get(id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.store.list()
    }

    /// Delete a task, its runs and its schedule. An in-flight run is aborted
    /// or awaited per `on_delete_running`.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        self.store.get(id)?;
        self.engine.cancel_task(id);
        self.engine.coordinator().release_for_delete(id).await;
        self.store.delete(id)?;
        // a schedule attached while the delete was in progress
        self.engine.cancel_task(id);
        Ok(())
    }

    /// Start a run now, outside any schedule.
    pub fn run_task_now(&self, id: &str) -> Result<TaskRun> {
        self.engine.coordinator().run_task(id)
    }

    /// Wait until the current run of `id`, if any, has finished.
    pub async fn wait_idle(&self, id: &str) {
        self.engine.coordinator().wait_idle(id).await
    }

    // ─── Schedules ────────────────────────────────────────

    pub fn schedule_task(&self, id: &str, spec: &str) -> Result<Schedule> {
        self.engine.schedule_task(id, spec)
    }

    pub fn cancel_schedule(&self, id: &str) -> bool {
        self.engine.cancel_task(id)
    }

    pub fn get_schedule(&self, id: &str) -> Option<Schedule> {
        self.engine.get_schedule(id)
    }

    pub fn list_schedules(&self) -> Vec<Schedule> {
        self.engine.list_schedules()
    }

    pub fn upcoming_schedules(&self, limit: usize) -> Vec<Schedule> {
        self.engine.upcoming(limit)
    }

    // ─── Runs ─────────────────────────────────────────────

    pub fn list_runs(&self, id: &str) -> Result<Vec<TaskRun>> {
        self.store.list_runs(id)
    }

    /// Most recent runs across all tasks, newest first.
    pub fn run_history(&self, limit: usize) -> Vec<TaskRun> {
        self.store.recent_runs(limit)
    }

    // ─── Events ───────────────────────────────────────────

    pub fn subscribe_events(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Subscribe, then capture the current state. Nothing published after
    /// the snapshot is missed.
    pub fn subscribe_with_snapshot(&self) -> (Event, EventSubscription) {
        let subscription = self.events.subscribe();
        let snapshot = Event::InitialState {
            tasks: self.store.list(),
            schedules: self.engine.list_schedules(),
        };
        (snapshot, subscription)
    }

    /// Writes not yet accepted by storage.
    pub fn stale_writes(&self) -> usize {
        self.store.journal().stale_writes()
    }
}
