//! Scheduler error types.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// A malformed schedule spec. Every variant names the offending token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown schedule format: '{0}' (expected cron:, every, at: or in:)")]
    UnknownFormat(String),
    #[error("Invalid value '{0}': amount must be a positive integer")]
    InvalidValue(String),
    #[error("Unknown time unit '{0}' (expected s, m, h or d)")]
    UnknownUnit(String),
    #[error("Invalid cron expression: expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("Invalid cron field '{token}': {reason}")]
    InvalidCronField { token: String, reason: String },
    #[error("Invalid datetime '{0}' (expected ISO-8601)")]
    InvalidDateTime(String),
    #[error("Datetime '{0}' is in the past")]
    InPast(String),
}

/// Errors surfaced by the store, scheduler and coordinator.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task {0} is already running")]
    AlreadyRunning(String),

    /// The runner's own message, recorded verbatim on the task and run.
    #[error("{0}")]
    Runner(String),

    #[error("timeout: run exceeded {0}s")]
    Timeout(u64),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Run {0} is already closed")]
    RunClosed(String),
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        SchedulerError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Persistence(format!("Serialize error: {e}"))
    }
}
