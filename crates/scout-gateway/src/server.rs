//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use scout_core::config::GatewayConfig;
use scout_scheduler::TaskService;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TaskService>,
    pub gateway_config: GatewayConfig,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(service: Arc<TaskService>, gateway_config: GatewayConfig) -> Self {
        Self {
            service,
            gateway_config,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let cors = cors_layer(&shared.gateway_config.cors_origins);

    Router::new()
        // Tasks
        .route(
            "/api/tasks",
            get(super::routes::list_tasks).post(super::routes::create_task),
        )
        .route(
            "/api/tasks/{id}",
            get(super::routes::get_task).delete(super::routes::delete_task),
        )
        .route("/api/tasks/{id}/run", post(super::routes::run_task))
        .route(
            "/api/tasks/{id}/schedule",
            get(super::routes::get_schedule)
                .post(super::routes::schedule_task)
                .delete(super::routes::cancel_schedule),
        )
        .route("/api/tasks/{id}/runs", get(super::routes::list_runs))
        // Schedules
        .route("/api/schedules", get(super::routes::list_schedules))
        .route(
            "/api/schedules/upcoming",
            get(super::routes::upcoming_schedules),
        )
        .route("/api/schedules/history", get(super::routes::run_history))
        // Health + live updates
        .route("/api/health", get(super::routes::health_check))
        .route("/api/ws", get(super::ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// CORS for the configured origins; an empty list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let allowed: Vec<_> = origins
        .iter()
        .filter_map(|s| match s.trim().parse::<axum::http::HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring invalid CORS origin '{s}'");
                None
            }
        })
        .collect();
    cors.allow_origin(allowed)
}

/// Start the HTTP server and serve until the listener fails.
pub async fn start(config: &GatewayConfig, service: Arc<TaskService>) -> anyhow::Result<()> {
    let app = build_router(AppState::new(service, config.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

