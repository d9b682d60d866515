//! In-process event bus for task and schedule changes.
//!
//! Best-effort and non-durable: a bounded `broadcast` channel where a slow
//! subscriber loses its oldest events and publishers never wait.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::tasks::{Schedule, Task};

/// A state change observers can react to. Serialized as `{"type": "<tag>", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    InitialState {
        tasks: Vec<Task>,
        schedules: Vec<Schedule>,
    },
    TaskUpdate {
        task: Task,
    },
    ScheduleUpdate {
        task_id: String,
        schedule: Schedule,
    },
    ScheduleRemoved {
        task_id: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialState { .. } => "initial_state",
            Self::TaskUpdate { .. } => "task_update",
            Self::ScheduleUpdate { .. } => "schedule_update",
            Self::ScheduleRemoved { .. } => "schedule_removed",
        }
    }
}

/// Fan-out of [`Event`]s to every current subscriber.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to all current subscribers. Never blocks; no subscribers is fine.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(n) => tracing::debug!(event = kind, subscribers = n, "event published"),
            Err(_) => tracing::trace!(event = kind, "event published with no subscribers"),
        }
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A subscriber handle.
pub struct EventSubscription {
    rx: broadcast::Receiver<Event>,
}

impl EventSubscription {
    /// Next event; `None` once the bus is gone. Lag is logged and skipped over.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event subscriber lagged; some events were dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event subscriber lagged; some events were dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
