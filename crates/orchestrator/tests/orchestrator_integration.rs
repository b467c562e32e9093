///! End-to-end scenarios A-C and F from SPEC_FULL.md §8, driven against the
///! real HTTP + worker-session surface.
///! All tests are `#[ignore]` — run with `cargo test -- --ignored` against a
///! live Redis (`REDIS_URL`, defaults to `redis://127.0.0.1:6379/15`).
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use orchestrator::circuit_breaker::CircuitBreakerRegistry;
use orchestrator::config::OrchestratorConfig;
use orchestrator::control_plane::ControlPlane;
use orchestrator::queue::TaskQueue;
use orchestrator::registry::WorkerRegistry;
use orchestrator::state_store::{RedisStateStore, StateStore};
use orchestrator::status_relay::StatusRelay;
use orchestrator::{build_router, AppState};
use orchestrator_common::{ApiType, ServerFrame, WorkerFrame};
use tokio_tungstenite::tungstenite::Message;

/// Spins up a full orchestrator instance bound to an ephemeral localhost
/// port, backed by a live Redis. Returns the base HTTP URL and the ws URL.
async fn spawn_orchestrator(task_retry_limit: u32) -> (String, String) {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into());

    let mut config = OrchestratorConfig::from_env();
    config.redis_url = redis_url;
    config.task_retry_limit = task_retry_limit;
    config
        .worker_tokens
        .insert("crunchbase".into(), vec!["test-token".into()]);
    let config = Arc::new(config);

    let store: Arc<dyn StateStore> = Arc::new(
        RedisStateStore::connect(&config.redis_url)
            .await
            .expect("failed to connect to Redis for integration test"),
    );

    let circuit_breakers = Arc::new(CircuitBreakerRegistry::new());
    let registry = Arc::new(WorkerRegistry::new(store.clone(), config.clone()));
    let (queue, terminal_rx) = TaskQueue::new(store, registry.clone(), config.clone());
    let queue = Arc::new(queue);
    let control_plane = Arc::new(ControlPlane::new(&config, circuit_breakers.clone()));
    let status_relay = StatusRelay::new(&config, circuit_breakers.clone());

    tokio::spawn(registry.clone().run_heartbeat_monitor(
        queue.clone(),
        tokio::sync::watch::channel(false).1,
    ));
    tokio::spawn(orchestrator::assignment::run_assignment_loop(
        queue.clone(),
        registry.clone(),
        circuit_breakers.clone(),
        tokio::sync::watch::channel(false).1,
    ));
    tokio::spawn(orchestrator::enrichment::run_completion_wiring(
        terminal_rx,
        control_plane.clone(),
    ));

    let state = Arc::new(AppState {
        registry,
        queue,
        status_relay,
        metrics_handle: metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle(),
        shutdown_rx: tokio::sync::watch::channel(false).1,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://{addr}"), format!("ws://{addr}/worker"))
}

async fn connect_worker(ws_url: &str, token: &str) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .expect("worker failed to connect");

    let auth = WorkerFrame::Auth {
        api_type: ApiType::crunchbase(),
        token: token.to_string(),
        metadata: HashMap::new(),
    };
    ws.send(Message::Text(serde_json::to_string(&auth).unwrap().into()))
        .await
        .unwrap();

    let reply = ws.next().await.expect("no auth reply").unwrap();
    let Message::Text(text) = reply else { panic!("expected text frame") };
    match serde_json::from_str::<ServerFrame>(&text).unwrap() {
        ServerFrame::AuthSuccess { .. } => {}
        other => panic!("expected auth_success, got {other:?}"),
    }
    ws
}

async fn next_task_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> ServerFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for server frame")
            .expect("stream ended")
            .expect("ws error");
        let Message::Text(text) = msg else { continue };
        let frame: ServerFrame = serde_json::from_str(&text).unwrap();
        if matches!(frame, ServerFrame::HeartbeatAck { .. } | ServerFrame::Ping) {
            continue;
        }
        return frame;
    }
}

#[tokio::test]
#[ignore]
async fn scenario_a_happy_path() {
    let (http_url, ws_url) = spawn_orchestrator(3).await;
    let client = reqwest::Client::new();

    let mut worker = connect_worker(&ws_url, "test-token").await;

    let submit: serde_json::Value = client
        .post(format!("{http_url}/tasks/submit"))
        .json(&serde_json::json!({
            "api_type": "crunchbase",
            "action": "search_with_rank",
            "report_id": "r1",
            "payload": {"q": "ai"},
            "priority": 5,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = submit["task_id"].as_str().unwrap().to_string();

    let ServerFrame::Task { task_id: dispatched, .. } = next_task_frame(&mut worker).await else {
        panic!("expected a task frame");
    };
    assert_eq!(dispatched.to_string(), task_id);

    worker
        .send(Message::Text(
            serde_json::to_string(&WorkerFrame::Running {
                task_id: dispatched,
            })
            .unwrap()
            .into(),
        ))
        .await
        .unwrap();
    worker
        .send(Message::Text(
            serde_json::to_string(&WorkerFrame::Complete {
                task_id: dispatched,
                result: serde_json::json!({"companies": []}),
            })
            .unwrap()
            .into(),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let task: serde_json::Value = client
        .get(format!("{http_url}/tasks/{task_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(task["status"], "completed");
}

#[tokio::test]
#[ignore]
async fn scenario_b_priority_preemption() {
    let (http_url, ws_url) = spawn_orchestrator(3).await;
    let client = reqwest::Client::new();

    let submit_one = |priority: i64| {
        let client = client.clone();
        let http_url = http_url.clone();
        async move {
            let resp: serde_json::Value = client
                .post(format!("{http_url}/tasks/submit"))
                .json(&serde_json::json!({
                    "api_type": "crunchbase",
                    "action": "search_with_rank",
                    "report_id": "r",
                    "payload": {},
                    "priority": priority,
                }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            resp["task_id"].as_str().unwrap().to_string()
        }
    };

    let low = submit_one(0).await;
    let high = submit_one(10).await;

    let mut worker = connect_worker(&ws_url, "test-token").await;
    let ServerFrame::Task { task_id: dispatched, .. } = next_task_frame(&mut worker).await else {
        panic!("expected a task frame");
    };

    assert_eq!(dispatched.to_string(), high);
    assert_ne!(dispatched.to_string(), low);
}

#[tokio::test]
#[ignore]
async fn scenario_c_retry_then_fail() {
    let (http_url, ws_url) = spawn_orchestrator(1).await;
    let client = reqwest::Client::new();
    let mut worker = connect_worker(&ws_url, "test-token").await;

    let submit: serde_json::Value = client
        .post(format!("{http_url}/tasks/submit"))
        .json(&serde_json::json!({
            "api_type": "crunchbase",
            "action": "search_with_rank",
            "report_id": "r1",
            "payload": {},
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = submit["task_id"].as_str().unwrap().to_string();

    // First attempt: fail it. max_retries=1 means one retry is allowed.
    let ServerFrame::Task { task_id: first, .. } = next_task_frame(&mut worker).await else {
        panic!("expected a task frame");
    };
    worker
        .send(Message::Text(
            serde_json::to_string(&WorkerFrame::Error {
                task_id: first,
                error: "scrape failed".into(),
            })
            .unwrap()
            .into(),
        ))
        .await
        .unwrap();

    // Second attempt (the retry): fail it again, exhausting the budget.
    let ServerFrame::Task { task_id: second, .. } = next_task_frame(&mut worker).await else {
        panic!("expected a retried task frame");
    };
    assert_eq!(second.to_string(), task_id);
    worker
        .send(Message::Text(
            serde_json::to_string(&WorkerFrame::Error {
                task_id: second,
                error: "scrape failed again".into(),
            })
            .unwrap()
            .into(),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let task: serde_json::Value = client
        .get(format!("{http_url}/tasks/{task_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(task["status"], "failed");
    assert_eq!(task["retry_count"], 1);
}

#[tokio::test]
#[ignore]
async fn scenario_cancel_pending_task_is_idempotent() {
    let (http_url, _ws_url) = spawn_orchestrator(3).await;
    let client = reqwest::Client::new();

    let submit: serde_json::Value = client
        .post(format!("{http_url}/tasks/submit"))
        .json(&serde_json::json!({
            "api_type": "crunchbase",
            "action": "search_with_rank",
            "report_id": "r1",
            "payload": {},
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = submit["task_id"].as_str().unwrap().to_string();

    let first: serde_json::Value = client
        .delete(format!("{http_url}/tasks/{task_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = client
        .delete(format!("{http_url}/tasks/{task_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["cancelled"], true);
    assert_eq!(second["cancelled"], true);

    let task: serde_json::Value = client
        .get(format!("{http_url}/tasks/{task_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(task["status"], "cancelled");
}
