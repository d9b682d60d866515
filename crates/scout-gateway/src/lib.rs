//! # Scout Gateway
//!
//! HTTP + WebSocket API over the task service.
//!
//! - `/api/tasks/...` and `/api/schedules/...` map onto `TaskService`
//! - `/api/ws` streams the event bus, starting with a full snapshot

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{AppState, build_router, start};
