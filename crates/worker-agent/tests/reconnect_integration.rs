///! Scenario E from SPEC_FULL.md §8: an agent that drops mid-task reconnects
///! and still delivers the terminal frame for the task it was running.
///! Self-contained — a mock orchestrator and a mock local scraper API both
///! run in-process, so no external infra is required and the test is not
///! `#[ignore]`d.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use orchestrator_common::{ServerFrame, TaskId, WorkerFrame};
use tokio::sync::Mutex;
use worker_agent::config::AgentConfig;

#[derive(Clone, Default)]
struct MockOrchestrator {
    connections: Arc<AtomicUsize>,
    last_terminal: Arc<Mutex<Option<WorkerFrame>>>,
}

async fn mock_worker_ws(
    ws: WebSocketUpgrade,
    State(mock): State<MockOrchestrator>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_mock_session(socket, mock))
}

async fn handle_mock_session(mut socket: WebSocket, mock: MockOrchestrator) {
    let connection_number = mock.connections.fetch_add(1, Ordering::SeqCst);

    // First frame must be auth.
    let Some(Ok(AxumMessage::Text(text))) = socket.recv().await else {
        return;
    };
    let WorkerFrame::Auth { .. } = serde_json::from_str(&text).unwrap() else {
        return;
    };

    let worker_id = orchestrator_common::WorkerId::new();
    let reply = serde_json::to_string(&ServerFrame::AuthSuccess { worker_id }).unwrap();
    socket.send(AxumMessage::Text(reply.into())).await.unwrap();

    if connection_number == 0 {
        // On the first connection, dispatch a task then drop the socket
        // before the agent can deliver its terminal frame.
        let task_id = TaskId::new();
        let task_frame = ServerFrame::Task {
            task_id,
            report_id: "r1".into(),
            action: "search_with_rank".into(),
            payload: serde_json::json!({}),
        };
        socket
            .send(AxumMessage::Text(
                serde_json::to_string(&task_frame).unwrap().into(),
            ))
            .await
            .unwrap();

        // Wait for the agent to acknowledge it started the task, then vanish.
        let _ = socket.recv().await;
        return;
    }

    // Second connection onward: just drain frames, recording the first
    // terminal (complete/error) frame we see.
    while let Some(Ok(msg)) = socket.recv().await {
        if let AxumMessage::Text(text) = msg {
            if let Ok(frame) = serde_json::from_str::<WorkerFrame>(&text) {
                if matches!(frame, WorkerFrame::Complete { .. } | WorkerFrame::Error { .. }) {
                    *mock.last_terminal.lock().await = Some(frame);
                    return;
                }
            }
        }
    }
}

async fn mock_local_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn mock_local_search(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    Json(serde_json::json!({"echo": body, "companies": []}))
}

#[tokio::test]
async fn reconnect_preserves_terminal_delivery() {
    let mock = MockOrchestrator::default();
    let orchestrator_router = Router::new()
        .route("/worker", get(mock_worker_ws))
        .with_state(mock.clone());
    let orchestrator_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let orchestrator_addr = orchestrator_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(orchestrator_listener, orchestrator_router)
            .await
            .ok();
    });

    let local_api_router = Router::new()
        .route("/health", get(mock_local_health))
        .route(
            "/search/crunchbase/top-similar-with-rank",
            post(mock_local_search),
        );
    let local_api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_api_addr = local_api_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(local_api_listener, local_api_router).await.ok();
    });

    let config = AgentConfig {
        orchestrator_ws_url: format!("ws://{orchestrator_addr}/worker"),
        api_type: "crunchbase".into(),
        worker_token: "test-token".into(),
        local_api_url: format!("http://{local_api_addr}"),
        agent_status_port: 19080,
        heartbeat_interval_secs: 30,
        worker_name: "test-agent".into(),
        worker_version: "0.0.0-test".into(),
        max_reconnect_attempts: 5,
        reconnect_delay_secs: 1,
    };

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(worker_agent::client::run(config, shutdown_rx));

    // The mock orchestrator's first connection dispatches a task, then
    // drops before the result arrives; the agent reconnects on its own
    // linear backoff and the second connection must see the terminal frame.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("terminal frame was never delivered after reconnect");
        }
        if mock.last_terminal.lock().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let terminal = mock.last_terminal.lock().await.take().unwrap();
    assert!(matches!(terminal, WorkerFrame::Complete { .. }));
    assert!(mock.connections.load(Ordering::SeqCst) >= 2);
}
