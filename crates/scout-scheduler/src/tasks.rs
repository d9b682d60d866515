//! Task definitions: the core data model for scheduled work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trigger::Trigger;

/// A unit of work created by an external agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID (UUID v4).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What the runner is asked to do.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Progress of the current run, 0–100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Output of the last successful run.
    pub result: Option<String>,
    /// Error of the last failed run.
    pub error: Option<String>,
    /// References produced by the last successful run.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Task {
    /// Create a new pending task.
    pub fn new(name: &str, description: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }
}

/// One execution of a task. Append-only; immutable once `end_time` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub run_id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl TaskRun {
    /// Open a new run for `task_id`.
    pub fn start(task_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            start_time: now,
            end_time: None,
            status: RunStatus::Running,
            error: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Kind of schedule attached to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    OneOff,
    Interval,
    Cron,
    Delay,
}

/// The schedule attached to a task (at most one per task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub task_id: String,
    pub kind: ScheduleKind,
    /// The schedule string as submitted.
    pub spec: String,
    pub human_readable: String,
    /// Parsed descriptor; this, not `spec`, is what gets re-armed.
    pub trigger: Trigger,
    /// `None` once a one-off has fired.
    pub next_run_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        task_id: &str,
        spec: &str,
        trigger: Trigger,
        next_run_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind: trigger.kind(),
            spec: spec.trim().to_string(),
            human_readable: trigger.human_readable(),
            trigger,
            next_run_time,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let now = Utc::now();
        let task = Task::new("Daily Report", "Summarize yesterday", now);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.created_at, now);
        assert_eq!(task.updated_at, now);
        assert!(task.result.is_none() && task.error.is_none());
        assert!(task.artifacts.is_empty());
    }

    #[test]
    fn test_task_ids_are_unique() {
        let now = Utc::now();
        let a = Task::new("a", "", now);
        let b = Task::new("a", "", now);
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_status_strings() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("disabled"), None);
        assert_eq!(
            serde_json::to_string(&TaskStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_run_starts_open() {
        let run = TaskRun::start("t1", Utc::now());
        assert!(run.is_open());
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.task_id, "t1");
    }

    #[test]
    fn test_schedule_derives_kind_and_label() {
        let trigger = Trigger::parse("every 2h").unwrap();
        let now = Utc::now();
        let schedule = Schedule::new("t1", " every 2h ", trigger, None, now);
        assert_eq!(schedule.kind, ScheduleKind::Interval);
        assert_eq!(schedule.spec, "every 2h");
        assert_eq!(schedule.human_readable, "Every 2 hour(s)");

        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["kind"], "interval");
    }
}
