//! # Scout Scheduler
//!
//! Task store, schedule parsing, drift-free scheduling, run coordination and
//! change events for agent-created tasks.
//!
//! ## Design Principles
//! - One owner of task state (`TaskStore`), mutated only through atomic updates
//! - Schedule strings parsed once into a `Trigger`; the descriptor is persisted
//! - SQLite persistence with retried writes, survives restarts
//! - Tokio timers only: one tick loop, one tokio task per run
//!
//! ## Architecture
//! ```text
//! TaskService
//!   ├── TaskStore ── DurableWriter ── SchedulerDb | MemoryBackend
//!   ├── SchedulerEngine (tokio interval)
//!   │     ├── cron:0 0 * * *   → next midnight
//!   │     ├── every 30m        → prior + 30m
//!   │     ├── at:2026-02-22T15:00:00
//!   │     └── in:5m
//!   │           └── due → Coordinator ── TaskRunner (timeout, progress)
//!   └── EventBus (broadcast) → task_update | schedule_update | schedule_removed
//! ```

pub mod clock;
pub mod coordinator;
pub mod cron;
pub mod engine;
pub mod error;
pub mod events;
pub mod persistence;
pub mod service;
pub mod store;
pub mod tasks;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, ProgressReporter, RunOutcome, TaskRunner};
pub use cron::CronExpr;
pub use engine::SchedulerEngine;
pub use error::{ParseError, Result, SchedulerError};
pub use events::{Event, EventBus, EventSubscription};
pub use persistence::{DurableWriter, MemoryBackend, SchedulerBackend, SchedulerDb};
pub use service::TaskService;
pub use store::TaskStore;
pub use tasks::{RunStatus, Schedule, ScheduleKind, Task, TaskRun, TaskStatus};
pub use trigger::{TimeUnit, Trigger};
