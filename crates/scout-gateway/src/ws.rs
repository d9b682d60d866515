//! WebSocket handler for live task and schedule updates.
//!
//! Protocol:
//! ← Server sends: {"type":"initial_state","tasks":[...],"schedules":[...]}
//! ← Server sends: {"type":"task_update","task":{...}}
//! ← Server sends: {"type":"schedule_update","task_id":"...","schedule":{...}}
//! ← Server sends: {"type":"schedule_removed","task_id":"..."}
//! → Client sends: {"type":"ping"}
//! ← Server sends: {"type":"pong","timestamp":1700000000000}

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use scout_scheduler::Event;
use std::sync::Arc;

use super::server::AppState;

type WsSender = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (snapshot, mut events) = state.service.subscribe_with_snapshot();
    tracing::info!("🔌 WebSocket client connected");

    if send_event(&mut sender, &snapshot).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if handle_client_message(&mut sender, &text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WS receive failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!("WebSocket client disconnected");
}

async fn handle_client_message(sender: &mut WsSender, text: &str) -> Result<(), ()> {
    let json = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(j) => j,
        Err(e) => return send_error(sender, &format!("Invalid JSON: {e}")).await,
    };

    match json["type"].as_str().unwrap_or("unknown") {
        "ping" => {
            let pong = serde_json::json!({
                "type": "pong",
                "timestamp": chrono::Utc::now().timestamp_millis(),
            });
            send_json(sender, &pong).await
        }
        other => send_error(sender, &format!("Unknown message type: {other}")).await,
    }
}

// ═══════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════

async fn send_event(sender: &mut WsSender, event: &Event) -> Result<(), ()> {
    match serde_json::to_value(event) {
        Ok(value) => send_json(sender, &value).await,
        Err(e) => {
            tracing::error!("Failed to serialize {} event: {e}", event.kind());
            Ok(())
        }
    }
}

async fn send_json(sender: &mut WsSender, value: &serde_json::Value) -> Result<(), ()> {
    sender
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| {
            tracing::error!("WS send failed: {e}");
        })
}

async fn send_error(sender: &mut WsSender, message: &str) -> Result<(), ()> {
    let error = serde_json::json!({
        "type": "error",
        "message": message,
    });
    send_json(sender, &error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scout_core::config::{GatewayConfig, RetentionConfig, SchedulerConfig};
    use scout_scheduler::{
        MemoryBackend, ProgressReporter, RunOutcome, SystemClock, Task, TaskRunner, TaskService,
    };
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

    struct NoopRunner;

    #[async_trait]
    impl TaskRunner for NoopRunner {
        async fn execute(&self, _: Task, _: ProgressReporter) -> anyhow::Result<RunOutcome> {
            Ok(RunOutcome::default())
        }
    }

    async fn serve(service: Arc<TaskService>) -> String {
        let app = crate::server::build_router(AppState::new(service, GatewayConfig::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("ws://{addr}/api/ws")
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures::Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("no message within 5s")
                .unwrap()
                .unwrap();
            if msg.is_text() {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_socket_snapshot_events_and_ping() {
        let service = Arc::new(
            TaskService::with_backend(
                &SchedulerConfig::default(),
                RetentionConfig::default(),
                Arc::new(MemoryBackend::new()),
                Arc::new(SystemClock),
                Arc::new(NoopRunner),
            )
            .unwrap(),
        );
        let task = service.create_task("existing", "", None).unwrap();
        let url = serve(service.clone()).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let first = next_json(&mut ws).await;
        assert_eq!(first["type"], "initial_state");
        assert_eq!(first["tasks"][0]["id"], task.id.as_str());
        assert_eq!(first["schedules"].as_array().unwrap().len(), 0);

        service.schedule_task(&task.id, "every 1h").unwrap();
        let update = next_json(&mut ws).await;
        assert_eq!(update["type"], "schedule_update");
        assert_eq!(update["task_id"], task.id.as_str());

        ws.send(WsMessage::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        let pong = next_json(&mut ws).await;
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_i64());

        ws.send(WsMessage::Text(r#"{"type":"chat"}"#.into())).await.unwrap();
        let error = next_json(&mut ws).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "Unknown message type: chat");
    }
}
