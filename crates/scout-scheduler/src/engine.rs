//! Scheduler Engine: arms schedules and fires due tasks.
//! Uses tokio::interval for ticking (sleeps between checks).
//!
//! Per schedule: `Unscheduled → Armed(next) → Armed(next') | Fired → Unscheduled`.
//! Recurring triggers advance from their intended fire time, not from when
//! the tick observed them, so they never drift.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use scout_core::config::{MissedOneOffPolicy, PastOneOffPolicy, SchedulerConfig};

use crate::coordinator::Coordinator;
use crate::error::{ParseError, Result, SchedulerError};
use crate::events::{Event, EventBus};
use crate::persistence::WriteOp;
use crate::store::TaskStore;
use crate::tasks::Schedule;
use crate::trigger::Trigger;

/// The scheduler engine: owns schedules and hands due tasks to the coordinator.
pub struct SchedulerEngine {
    store: Arc<TaskStore>,
    coordinator: Coordinator,
    events: EventBus,
    past_one_off: PastOneOffPolicy,
    missed_one_off: MissedOneOffPolicy,
    armed: Mutex<HashMap<String, Schedule>>,
    last_prune: Mutex<Option<NaiveDate>>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<TaskStore>,
        coordinator: Coordinator,
        events: EventBus,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            events,
            past_one_off: config.past_one_off,
            missed_one_off: config.missed_one_off,
            armed: Mutex::new(HashMap::new()),
            last_prune: Mutex::new(None),
        }
    }

    fn armed(&self) -> MutexGuard<'_, HashMap<String, Schedule>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Parse `spec` and arm it for `task_id`, replacing any prior schedule.
    pub fn schedule_task(&self, task_id: &str, spec: &str) -> Result<Schedule> {
        self.store.get(task_id)?;
        let (trigger, next) = self.first_fire(spec)?;
        self.arm(task_id, spec, trigger, next)
    }

    /// Parse `spec` and work out its first fire time without arming anything.
    pub(crate) fn first_fire(&self, spec: &str) -> Result<(Trigger, DateTime<Utc>)> {
        let trigger = Trigger::parse(spec)?;
        let now = self.store.clock().now();

        let next = match &trigger {
            Trigger::Once { at } if *at <= now => match self.past_one_off {
                PastOneOffPolicy::Reject => {
                    return Err(ParseError::InPast(at.to_rfc3339()).into());
                }
                PastOneOffPolicy::FireImmediately => Some(now),
            },
            _ => trigger.first_fire(now),
        };
        let Some(next) = next else {
            return Err(match &trigger {
                Trigger::Cron { expr } => ParseError::InvalidCronField {
                    token: expr.expression.clone(),
                    reason: "expression never matches".into(),
                },
                _ => ParseError::InvalidValue(spec.trim().to_string()),
            }
            .into());
        };
        Ok((trigger, next))
    }

    /// Arm an already validated trigger for `task_id`.
    pub(crate) fn arm(
        &self,
        task_id: &str,
        spec: &str,
        trigger: Trigger,
        next: DateTime<Utc>,
    ) -> Result<Schedule> {
        let now = self.store.clock().now();
        let schedule = Schedule::new(task_id, spec, trigger, Some(next), now);
        {
            let mut armed = self.armed();
            // re-check under the lock so a concurrent delete cannot leave an orphan
            self.store.get(task_id)?;
            armed.insert(task_id.to_string(), schedule.clone());
            self.store
                .journal()
                .submit(WriteOp::SaveSchedule(schedule.clone()));
        }

        tracing::info!(
            "📅 Task {task_id} scheduled: {} (next {next})",
            schedule.human_readable
        );
        self.events.publish(Event::ScheduleUpdate {
            task_id: task_id.to_string(),
            schedule: schedule.clone(),
        });
        Ok(schedule)
    }

    /// Remove a task's schedule. Returns `false` if it had none.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let removed = {
            let mut armed = self.armed();
            let removed = armed.remove(task_id);
            if removed.is_some() {
                self.store
                    .journal()
                    .submit(WriteOp::DeleteSchedule(task_id.to_string()));
            }
            removed
        };

        match removed {
            Some(_) => {
                tracing::info!("📅 Schedule cancelled for task {task_id}");
                self.events.publish(Event::ScheduleRemoved {
                    task_id: task_id.to_string(),
                });
                true
            }
            None => false,
        }
    }

    pub fn get_schedule(&self, task_id: &str) -> Option<Schedule> {
        self.armed().get(task_id).cloned()
    }

    /// All schedules, soonest first; fired one-offs last.
    pub fn list_schedules(&self) -> Vec<Schedule> {
        let mut all: Vec<Schedule> = self.armed().values().cloned().collect();
        all.sort_by(|a, b| {
            let key = |s: &Schedule| (s.next_run_time.is_none(), s.next_run_time);
            key(a).cmp(&key(b)).then_with(|| a.task_id.cmp(&b.task_id))
        });
        all
    }

    /// Armed schedules with a pending fire, soonest first.
    pub fn upcoming(&self, limit: usize) -> Vec<Schedule> {
        let mut pending: Vec<Schedule> = self
            .list_schedules()
            .into_iter()
            .filter(|s| s.next_run_time.is_some())
            .collect();
        pending.truncate(limit);
        pending
    }

    pub fn schedule_count(&self) -> usize {
        self.armed().len()
    }

    /// Advance every schedule due at `now` and return the task ids to fire,
    /// ordered by intended fire time, then task id.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut updated = Vec::new();
        let mut broken = Vec::new();

        let mut due: Vec<(DateTime<Utc>, String)>;
        {
            let mut armed = self.armed();
            due = armed
                .values()
                .filter_map(|s| match s.next_run_time {
                    Some(next) if next <= now => Some((next, s.task_id.clone())),
                    _ => None,
                })
                .collect();
            due.sort();

            for (prior, task_id) in &due {
                let Some(schedule) = armed.get_mut(task_id) else {
                    continue;
                };
                if schedule.trigger.is_recurring() {
                    match schedule.trigger.next_after(*prior, now) {
                        Some(next) => schedule.next_run_time = Some(next),
                        None => {
                            tracing::error!(
                                "❌ Cannot compute next fire for task {task_id} ({}), unscheduling",
                                schedule.spec
                            );
                            armed.remove(task_id);
                            self.store
                                .journal()
                                .submit(WriteOp::DeleteSchedule(task_id.clone()));
                            broken.push(task_id.clone());
                            continue;
                        }
                    }
                } else {
                    schedule.next_run_time = None;
                }
                self.store
                    .journal()
                    .submit(WriteOp::SaveSchedule(schedule.clone()));
                updated.push(schedule.clone());
            }
        }

        for schedule in updated {
            self.events.publish(Event::ScheduleUpdate {
                task_id: schedule.task_id.clone(),
                schedule,
            });
        }
        for task_id in broken {
            self.events.publish(Event::ScheduleRemoved { task_id });
        }

        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Tick: evaluate schedules and dispatch due tasks.
    /// Returns the ids whose run actually started.
    pub fn tick(&self) -> Vec<String> {
        let now = self.store.clock().now();
        let mut started = Vec::new();

        for task_id in self.evaluate(now) {
            tracing::info!("🔔 Task triggered: {task_id}");
            match self.coordinator.run_task(&task_id) {
                Ok(_) => started.push(task_id),
                Err(SchedulerError::AlreadyRunning(_)) => {
                    tracing::info!("⏭️ Task {task_id} still running, skipping this fire");
                }
                Err(SchedulerError::NotFound(_)) => {
                    tracing::warn!("⚠️ Scheduled task {task_id} no longer exists, unscheduling");
                    self.cancel_task(&task_id);
                }
                Err(e) => tracing::warn!("⚠️ Failed to dispatch task {task_id}: {e}"),
            }
        }

        started
    }

    /// Re-arm persisted schedules after a restart. Returns how many were armed.
    ///
    /// Intervals keep their grid, cron takes its next match after now, missed
    /// recurring fires are not backfilled, and a missed one-off follows the
    /// `missed_one_off` policy.
    pub fn restore(&self) -> Result<usize> {
        let stored = self.store.journal().backend().load_schedules()?;
        let now = self.store.clock().now();
        let mut removed = Vec::new();
        let mut restored = Vec::new();

        for row in stored {
            if self.store.get(&row.task_id).is_err() {
                tracing::warn!("⚠️ Dropping schedule of unknown task {}", row.task_id);
                self.store
                    .journal()
                    .submit(WriteOp::DeleteSchedule(row.task_id.clone()));
                continue;
            }

            let mut schedule = match row.decode() {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("❌ Unreadable schedule for task {}: {e}", row.task_id);
                    self.store
                        .journal()
                        .submit(WriteOp::DeleteSchedule(row.task_id.clone()));
                    removed.push(row.task_id);
                    continue;
                }
            };

            let next = match (&schedule.trigger, schedule.next_run_time) {
                (Trigger::Interval { .. } | Trigger::Delay { .. }, Some(at)) if at > now => {
                    within_one_period(&schedule, at, now)
                }
                (Trigger::Interval { .. }, Some(prior)) => schedule.trigger.next_after(prior, now),
                (Trigger::Interval { .. } | Trigger::Cron { .. }, _) => {
                    schedule.trigger.first_fire(now)
                }
                (_, None) => None,
                (_, Some(at)) if at > now => Some(at),
                (_, Some(at)) => match self.missed_one_off {
                    MissedOneOffPolicy::FireOnce => {
                        tracing::info!(
                            "⏰ One-off for task {} was missed at {at}, firing now",
                            schedule.task_id
                        );
                        Some(now)
                    }
                    MissedOneOffPolicy::Skip => {
                        tracing::info!(
                            "⏭️ One-off for task {} was missed at {at}, skipping",
                            schedule.task_id
                        );
                        None
                    }
                },
            };

            if schedule.trigger.is_recurring() && next.is_none() {
                tracing::error!(
                    "❌ Schedule for task {} ({}) has no future fire, unscheduling",
                    schedule.task_id,
                    schedule.spec
                );
                self.store
                    .journal()
                    .submit(WriteOp::DeleteSchedule(schedule.task_id.clone()));
                removed.push(schedule.task_id);
                continue;
            }

            if next != schedule.next_run_time {
                schedule.next_run_time = next;
                self.store
                    .journal()
                    .submit(WriteOp::SaveSchedule(schedule.clone()));
            }
            restored.push(schedule);
        }

        let count = restored.len();
        {
            let mut armed = self.armed();
            for schedule in restored {
                armed.insert(schedule.task_id.clone(), schedule);
            }
        }
        for task_id in removed {
            self.events.publish(Event::ScheduleRemoved { task_id });
        }

        tracing::info!("📅 Restored {count} schedule(s)");
        Ok(count)
    }

    /// Age-based run retention, at most once per calendar day.
    pub fn prune_daily(&self) -> usize {
        let today = self.store.clock().now().date_naive();
        {
            let mut last = self.last_prune.lock().unwrap_or_else(|e| e.into_inner());
            if *last == Some(today) {
                return 0;
            }
            *last = Some(today);
        }
        self.store.prune_expired_runs()
    }
}

/// A stored fire time more than one period ahead was written under a clock
/// that ran ahead of this one; re-anchor it on `now`.
fn within_one_period(schedule: &Schedule, at: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule.trigger.period() {
        Some(period) if at - now > period => {
            tracing::warn!(
                "⚠️ Stored next run {at} for task {} is more than one period ahead, re-anchoring",
                schedule.task_id
            );
            schedule.trigger.first_fire(now)
        }
        _ => Some(at),
    }
}

/// Run the scheduler loop forever; spawn it as a background tokio task.
/// Each tick fires due tasks, retries queued writes and applies daily retention.
pub async fn spawn_scheduler(engine: Arc<SchedulerEngine>, tick_interval: std::time::Duration) {
    tracing::info!("⏰ Scheduler started (tick every {}ms)", tick_interval.as_millis());

    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let fired = engine.tick();
        if !fired.is_empty() {
            tracing::debug!("Tick fired {} task(s)", fired.len());
        }

        flush_journal(engine.store());
        engine.prune_daily();
    }
}

/// Retry queued writes on an interval without evaluating schedules; used
/// when the tick loop is not running.
pub async fn spawn_journal_flush(store: Arc<TaskStore>, flush_interval: std::time::Duration) {
    tracing::info!("💾 Write retry loop started (every {}ms)", flush_interval.as_millis());

    let mut interval = tokio::time::interval(flush_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        flush_journal(&store);
    }
}

fn flush_journal(store: &TaskStore) {
    let stale = store.journal().flush_pending();
    if stale > 0 {
        tracing::debug!("{stale} write(s) still waiting for storage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::coordinator::{ProgressReporter, RunOutcome, TaskRunner};
    use crate::persistence::{DurableWriter, MemoryBackend, SchedulerBackend};
    use crate::tasks::{ScheduleKind, Task};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use scout_core::config::RetentionConfig;

    struct NoopRunner;

    #[async_trait]
    impl TaskRunner for NoopRunner {
        async fn execute(&self, _: Task, _: ProgressReporter) -> anyhow::Result<RunOutcome> {
            Ok(RunOutcome::default())
        }
    }

    struct Harness {
        engine: SchedulerEngine,
        store: Arc<TaskStore>,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
        events: EventBus,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap()
    }

    fn harness_with(backend: Arc<MemoryBackend>, clock: Arc<ManualClock>, config: SchedulerConfig) -> Harness {
        let store = Arc::new(
            TaskStore::load(
                DurableWriter::new(backend.clone(), 5),
                clock.clone(),
                RetentionConfig::default(),
            )
            .unwrap(),
        );
        let events = EventBus::new(64);
        let coordinator = Coordinator::new(store.clone(), events.clone(), Arc::new(NoopRunner), &config);
        let engine = SchedulerEngine::new(store.clone(), coordinator, events.clone(), &config);
        Harness {
            engine,
            store,
            backend,
            clock,
            events,
        }
    }

    fn harness(config: SchedulerConfig) -> Harness {
        harness_with(
            Arc::new(MemoryBackend::new()),
            Arc::new(ManualClock::new(start())),
            config,
        )
    }

    #[test]
    fn test_schedule_get_cancel() {
        let h = harness(SchedulerConfig::default());
        let mut sub = h.events.subscribe();
        let task = h.store.create("t", "");

        let schedule = h.engine.schedule_task(&task.id, "every 1h").unwrap();
        assert_eq!(schedule.kind, ScheduleKind::Interval);
        assert_eq!(schedule.next_run_time, Some(start() + Duration::hours(1)));
        assert_eq!(h.engine.get_schedule(&task.id), Some(schedule.clone()));
        assert_eq!(h.backend.load_schedules().unwrap().len(), 1);

        assert!(h.engine.cancel_task(&task.id));
        assert_eq!(h.engine.get_schedule(&task.id), None);
        assert!(h.backend.load_schedules().unwrap().is_empty());
        assert!(!h.engine.cancel_task(&task.id));

        assert!(matches!(sub.try_recv(), Some(Event::ScheduleUpdate { .. })));
        assert!(matches!(sub.try_recv(), Some(Event::ScheduleRemoved { .. })));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_reschedule_overwrites() {
        let h = harness(SchedulerConfig::default());
        let task = h.store.create("t", "");
        h.engine.schedule_task(&task.id, "every 1h").unwrap();
        let replaced = h.engine.schedule_task(&task.id, "cron:0 0 * * *").unwrap();
        assert_eq!(h.engine.get_schedule(&task.id), Some(replaced));
        assert_eq!(h.engine.schedule_count(), 1);
    }

    #[test]
    fn test_schedule_errors_leave_state_untouched() {
        let h = harness(SchedulerConfig::default());
        assert!(matches!(
            h.engine.schedule_task("missing", "every 1h"),
            Err(SchedulerError::NotFound(_))
        ));

        let task = h.store.create("t", "");
        assert!(matches!(
            h.engine.schedule_task(&task.id, "every 0h"),
            Err(SchedulerError::Parse(ParseError::InvalidValue(_)))
        ));
        assert!(matches!(
            h.engine.schedule_task(&task.id, "cron:0 0 30 2 *"),
            Err(SchedulerError::Parse(ParseError::InvalidCronField { .. }))
        ));
        assert!(h.engine.get_schedule(&task.id).is_none());
    }

    #[test]
    fn test_past_one_off_policies() {
        let h = harness(SchedulerConfig::default());
        let task = h.store.create("t", "");
        assert!(matches!(
            h.engine.schedule_task(&task.id, "at:2026-03-10T13:00:00"),
            Err(SchedulerError::Parse(ParseError::InPast(_)))
        ));

        let h = harness(SchedulerConfig {
            past_one_off: PastOneOffPolicy::FireImmediately,
            ..SchedulerConfig::default()
        });
        let task = h.store.create("t", "");
        let s = h.engine.schedule_task(&task.id, "at:2026-03-10T13:00:00").unwrap();
        assert_eq!(s.next_run_time, Some(start()));
        assert_eq!(h.engine.evaluate(start()), vec![task.id.clone()]);
    }

    #[test]
    fn test_interval_fires_once_per_period_without_drift() {
        let h = harness(SchedulerConfig::default());
        let task = h.store.create("t", "");
        h.engine.schedule_task(&task.id, "every 1m").unwrap();

        h.clock.advance(Duration::seconds(59));
        assert!(h.engine.evaluate(h.clock.now()).is_empty());

        h.clock.advance(Duration::milliseconds(1_500));
        assert_eq!(h.engine.evaluate(h.clock.now()), vec![task.id.clone()]);
        assert_eq!(
            h.engine.get_schedule(&task.id).unwrap().next_run_time,
            Some(start() + Duration::seconds(120))
        );
        assert!(h.engine.evaluate(h.clock.now()).is_empty());
    }

    #[test]
    fn test_missed_periods_coalesce() {
        let h = harness(SchedulerConfig::default());
        let task = h.store.create("t", "");
        h.engine.schedule_task(&task.id, "every 1m").unwrap();

        h.clock.advance(Duration::seconds(5 * 60 + 30));
        assert_eq!(h.engine.evaluate(h.clock.now()).len(), 1);
        assert_eq!(
            h.engine.get_schedule(&task.id).unwrap().next_run_time,
            Some(start() + Duration::seconds(6 * 60))
        );
    }

    #[test]
    fn test_one_off_fires_once() {
        let h = harness(SchedulerConfig::default());
        let task = h.store.create("t", "");
        h.engine.schedule_task(&task.id, "in:5m").unwrap();

        h.clock.advance(Duration::minutes(5));
        assert_eq!(h.engine.evaluate(h.clock.now()), vec![task.id.clone()]);
        let fired = h.engine.get_schedule(&task.id).unwrap();
        assert_eq!(fired.next_run_time, None);

        h.clock.advance(Duration::minutes(5));
        assert!(h.engine.evaluate(h.clock.now()).is_empty());
        assert!(h.engine.upcoming(10).is_empty());
        assert_eq!(h.engine.list_schedules().len(), 1);
    }

    #[test]
    fn test_due_order_by_time_then_id() {
        let h = harness(SchedulerConfig::default());
        let a = h.store.create("a", "");
        let b = h.store.create("b", "");
        let c = h.store.create("c", "");
        h.engine.schedule_task(&a.id, "in:3m").unwrap();
        h.engine.schedule_task(&b.id, "in:1m").unwrap();
        h.engine.schedule_task(&c.id, "in:1m").unwrap();

        h.clock.advance(Duration::minutes(10));
        let mut first_two = vec![b.id.clone(), c.id.clone()];
        first_two.sort();
        let due = h.engine.evaluate(h.clock.now());
        assert_eq!(due[..2], first_two[..]);
        assert_eq!(due[2], a.id);
    }

    #[test]
    fn test_upcoming_sorted_and_limited() {
        let h = harness(SchedulerConfig::default());
        let a = h.store.create("a", "");
        let b = h.store.create("b", "");
        h.engine.schedule_task(&a.id, "every 2h").unwrap();
        h.engine.schedule_task(&b.id, "every 1h").unwrap();

        let upcoming = h.engine.upcoming(1);
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].task_id, b.id);
    }

    #[test]
    fn test_restore_recomputes_next_run() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(start()));
        let (interval_id, cron_id, missed_id) = {
            let h = harness_with(backend.clone(), clock.clone(), SchedulerConfig::default());
            let i = h.store.create("interval", "");
            let c = h.store.create("cron", "");
            let m = h.store.create("missed", "");
            h.engine.schedule_task(&i.id, "every 1h").unwrap();
            h.engine.schedule_task(&c.id, "cron:0 0 * * *").unwrap();
            h.engine.schedule_task(&m.id, "in:10m").unwrap();
            (i.id, c.id, m.id)
        };

        // Down for 3.5 hours
        clock.advance(Duration::minutes(210));
        let h = harness_with(backend, clock.clone(), SchedulerConfig::default());
        assert_eq!(h.engine.restore().unwrap(), 3);

        assert_eq!(
            h.engine.get_schedule(&interval_id).unwrap().next_run_time,
            Some(start() + Duration::hours(4))
        );
        assert_eq!(
            h.engine.get_schedule(&cron_id).unwrap().next_run_time,
            Some(Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap())
        );
        assert_eq!(
            h.engine.get_schedule(&missed_id).unwrap().next_run_time,
            Some(clock.now())
        );
        assert_eq!(h.engine.evaluate(clock.now()), vec![missed_id]);
    }

    #[test]
    fn test_restore_reanchors_fire_times_from_a_fast_clock() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(start() + Duration::days(1)));
        let (interval_id, delay_id, near_id) = {
            let h = harness_with(backend.clone(), clock.clone(), SchedulerConfig::default());
            let i = h.store.create("interval", "");
            let d = h.store.create("delay", "");
            let n = h.store.create("near", "");
            h.engine.schedule_task(&i.id, "every 1m").unwrap();
            h.engine.schedule_task(&d.id, "in:10m").unwrap();
            (i.id, d.id, n.id)
        };
        // written at the corrected time, so still within one period
        let near = Schedule::new(
            &near_id,
            "every 1h",
            Trigger::parse("every 1h").unwrap(),
            Some(start() + Duration::minutes(30)),
            start(),
        );
        backend.save_schedule(&near).unwrap();

        // Clock corrected back by a day
        clock.set(start());
        let h = harness_with(backend, clock.clone(), SchedulerConfig::default());
        assert_eq!(h.engine.restore().unwrap(), 3);

        assert_eq!(
            h.engine.get_schedule(&interval_id).unwrap().next_run_time,
            Some(start() + Duration::minutes(1))
        );
        assert_eq!(
            h.engine.get_schedule(&delay_id).unwrap().next_run_time,
            Some(start() + Duration::minutes(10))
        );
        assert_eq!(
            h.engine.get_schedule(&near_id).unwrap().next_run_time,
            Some(start() + Duration::minutes(30))
        );

        clock.advance(Duration::minutes(1));
        assert_eq!(h.engine.evaluate(clock.now()), vec![interval_id]);
    }

    #[test]
    fn test_restore_skip_policy_marks_fired() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(start()));
        let task_id = {
            let h = harness_with(backend.clone(), clock.clone(), SchedulerConfig::default());
            let t = h.store.create("t", "");
            h.engine.schedule_task(&t.id, "in:1m").unwrap();
            t.id
        };

        clock.advance(Duration::hours(1));
        let config = SchedulerConfig {
            missed_one_off: MissedOneOffPolicy::Skip,
            ..SchedulerConfig::default()
        };
        let h = harness_with(backend, clock.clone(), config);
        h.engine.restore().unwrap();
        assert_eq!(h.engine.get_schedule(&task_id).unwrap().next_run_time, None);
        assert!(h.engine.evaluate(clock.now()).is_empty());
    }

    #[test]
    fn test_restore_drops_orphan_rows() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(start()));
        backend.save_task(&Task::new("t", "", start())).unwrap();

        let orphan = Schedule::new(
            "ghost",
            "every 1h",
            Trigger::parse("every 1h").unwrap(),
            Some(start() + Duration::hours(1)),
            start(),
        );
        backend.save_schedule(&orphan).unwrap();

        let h = harness_with(backend.clone(), clock, SchedulerConfig::default());
        assert_eq!(h.engine.restore().unwrap(), 0);
        assert!(backend.load_schedules().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_dispatches_and_skips_running() {
        let h = harness(SchedulerConfig::default());
        let task = h.store.create("t", "");
        h.engine.schedule_task(&task.id, "every 1m").unwrap();

        h.clock.advance(Duration::seconds(60));
        assert_eq!(h.engine.tick(), vec![task.id.clone()]);
        h.engine.coordinator().wait_idle(&task.id).await;
        assert_eq!(h.store.list_runs(&task.id).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_daily_runs_once_per_day() {
        let h = harness(SchedulerConfig::default());
        h.engine.prune_daily();
        assert_eq!(*h.engine.last_prune.lock().unwrap(), Some(start().date_naive()));
        h.clock.advance(Duration::days(1));
        h.engine.prune_daily();
        assert_eq!(
            *h.engine.last_prune.lock().unwrap(),
            Some((start() + Duration::days(1)).date_naive())
        );
    }
}
