//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use scout_scheduler::SchedulerError;
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

const DEFAULT_RUNS_LIMIT: usize = 50;
const DEFAULT_UPCOMING_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn ok(body: serde_json::Value) -> ApiResponse {
    let mut body = body;
    if let Some(map) = body.as_object_mut() {
        map.insert("ok".into(), serde_json::Value::Bool(true));
    }
    (StatusCode::OK, Json(body))
}

fn fail(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({"ok": false, "error": message.into()})),
    )
}

/// Map a scheduler error onto an HTTP status.
fn error_response(err: SchedulerError) -> ApiResponse {
    match err {
        SchedulerError::Parse(e) => fail(StatusCode::BAD_REQUEST, e.to_string()),
        SchedulerError::NotFound(_) => fail(StatusCode::NOT_FOUND, err.to_string()),
        SchedulerError::AlreadyRunning(_) => fail(StatusCode::CONFLICT, err.to_string()),
        other => {
            tracing::error!("❌ Request failed: {other}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ---- Health ----

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResponse {
    ok(serde_json::json!({
        "status": "ok",
        "service": "scout-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "stale_writes": state.service.stale_writes(),
        "tasks": state.service.list_tasks().len(),
        "schedules": state.service.list_schedules().len(),
    }))
}

// ---- Tasks ----

/// List all tasks, oldest first.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResponse {
    let tasks = state.service.list_tasks();
    ok(serde_json::json!({"count": tasks.len(), "tasks": tasks}))
}

/// Create a task, optionally scheduling it and starting a run right away.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let name = body["name"].as_str().unwrap_or("").trim();
    if name.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "'name' is required");
    }
    let description = body["description"].as_str().unwrap_or("");
    let schedule = body["schedule"].as_str().filter(|s| !s.trim().is_empty());
    let run_now = body["run_now"].as_bool().unwrap_or(false);

    let task = match state.service.create_task(name, description, schedule) {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    tracing::info!("📝 Task created: {} ({})", task.name, task.id);

    let run = if run_now {
        match state.service.run_task_now(&task.id) {
            Ok(run) => Some(run),
            Err(e) => return error_response(e),
        }
    } else {
        None
    };

    let (_, body) = ok(serde_json::json!({
        "task": task,
        "schedule": state.service.get_schedule(&task.id),
        "run": run,
    }));
    (StatusCode::CREATED, body)
}

pub async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.service.get_task(&id) {
        Ok(task) => ok(serde_json::json!({
            "task": task,
            "schedule": state.service.get_schedule(&id),
        })),
        Err(e) => error_response(e),
    }
}

/// Delete a task together with its runs and schedule.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.service.delete_task(&id).await {
        Ok(()) => {
            tracing::info!("🗑️ Task deleted: {id}");
            ok(serde_json::json!({"id": id}))
        }
        Err(e) => error_response(e),
    }
}

/// Start a run now, outside any schedule.
pub async fn run_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.service.run_task_now(&id) {
        Ok(run) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"ok": true, "run": run})),
        ),
        Err(e) => error_response(e),
    }
}

/// The newest `limit` runs of a task, oldest first.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResponse {
    let runs = match state.service.list_runs(&id) {
        Ok(runs) => runs,
        Err(e) => return error_response(e),
    };
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    let skip = runs.len().saturating_sub(limit);
    let runs: Vec<_> = runs.into_iter().skip(skip).collect();
    ok(serde_json::json!({"count": runs.len(), "runs": runs}))
}

// ---- Schedules ----

/// Attach or replace a task's schedule. Body: `{"schedule": "every 30m"}`.
pub async fn schedule_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(spec) = body["schedule"].as_str() else {
        return fail(StatusCode::BAD_REQUEST, "'schedule' is required");
    };
    match state.service.schedule_task(&id, spec) {
        Ok(schedule) => {
            tracing::info!("⏰ Scheduled {id}: {}", schedule.human_readable);
            ok(serde_json::json!({"schedule": schedule}))
        }
        Err(e) => error_response(e),
    }
}

pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    if let Err(e) = state.service.get_task(&id) {
        return error_response(e);
    }
    match state.service.get_schedule(&id) {
        Some(schedule) => ok(serde_json::json!({"schedule": schedule})),
        None => fail(StatusCode::NOT_FOUND, format!("Task {id} has no schedule")),
    }
}

pub async fn cancel_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    if let Err(e) = state.service.get_task(&id) {
        return error_response(e);
    }
    let cancelled = state.service.cancel_schedule(&id);
    ok(serde_json::json!({"cancelled": cancelled}))
}

/// All schedules, soonest first.
pub async fn list_schedules(State(state): State<Arc<AppState>>) -> ApiResponse {
    let schedules = state.service.list_schedules();
    ok(serde_json::json!({"count": schedules.len(), "schedules": schedules}))
}

pub async fn upcoming_schedules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResponse {
    let schedules = state
        .service
        .upcoming_schedules(query.limit.unwrap_or(DEFAULT_UPCOMING_LIMIT));
    ok(serde_json::json!({"count": schedules.len(), "schedules": schedules}))
}

/// Recent runs across all tasks, newest first.
pub async fn run_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResponse {
    let runs = state
        .service
        .run_history(query.limit.unwrap_or(DEFAULT_RUNS_LIMIT));
    ok(serde_json::json!({"count": runs.len(), "runs": runs}))
}
