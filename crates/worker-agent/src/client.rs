use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use orchestrator_common::{ServerFrame, WorkerFrame};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::state::AgentState;
use crate::status_server::StatusUpdate;
use crate::task_executor::TaskExecutor;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const RECV_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Holds the live session's write half, if connected. Task-execution results
/// always go through this so a terminal frame either ships immediately or is
/// queued on [`AgentState`] for the next session — survives across reconnects
/// because this handle, unlike the socket, is never replaced on disconnect.
struct ConnectionHandle {
    sink: Mutex<Option<WsSink>>,
    healthy: AtomicBool,
}

impl ConnectionHandle {
    fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            healthy: AtomicBool::new(false),
        }
    }

    async fn attach(&self, sink: WsSink) {
        *self.sink.lock().await = Some(sink);
        self.healthy.store(true, Ordering::SeqCst);
    }

    async fn detach(&self) {
        *self.sink.lock().await = None;
        self.healthy.store(false, Ordering::SeqCst);
    }

    async fn try_send(&self, frame: &WorkerFrame) -> bool {
        if !self.healthy.load(Ordering::SeqCst) {
            return false;
        }
        let text = serde_json::to_string(frame).expect("WorkerFrame always serializes");
        let mut guard = self.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            if sink.send(Message::Text(text.into())).await.is_ok() {
                return true;
            }
        }
        drop(guard);
        self.healthy.store(false, Ordering::SeqCst);
        false
    }

    /// Fire-and-forget send: dropped silently on failure (status updates, pings).
    async fn send_if_connected(&self, frame: WorkerFrame) {
        let _ = self.try_send(&frame).await;
    }

    /// Must-deliver send: queued on [`AgentState`] if the session is down.
    async fn send_safe(&self, frame: WorkerFrame, state: &AgentState) {
        if !self.try_send(&frame).await {
            tracing::info!("queueing frame for delivery after reconnect");
            state.queue_pending(frame).await;
        }
    }
}

/// Runs the agent until `shutdown` reports `true` or the reconnect-attempt
/// budget is exhausted. SIGTERM/SIGINT are the caller's responsibility (see
/// `worker_agent::main`, which installs the handlers and drives `shutdown`);
/// this function only reacts to the signal, closing the session and
/// returning instead of reconnecting (SPEC_FULL.md §5).
pub async fn run(config: AgentConfig, mut shutdown: watch::Receiver<bool>) {
    let config = Arc::new(config);
    let state = Arc::new(AgentState::new());
    let executor = Arc::new(TaskExecutor::new(
        config.local_api_url.clone(),
        config.api_type.clone(),
    ));
    let conn = Arc::new(ConnectionHandle::new());

    tracing::info!(api_type = %config.api_type, orchestrator = %config.orchestrator_ws_url, "starting worker agent");

    if !executor.wait_for_ready(120).await {
        tracing::error!("cannot start worker agent, local API not available");
        return;
    }

    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<StatusUpdate>();
    spawn_status_server(config.clone(), state.clone(), status_tx);

    let mut reconnect_attempts: u32 = 0;
    loop {
        if *shutdown.borrow() {
            tracing::info!("shutdown requested, not connecting");
            break;
        }

        match connect_and_run(
            &config,
            &conn,
            &state,
            &executor,
            &mut status_rx,
            &mut reconnect_attempts,
            &mut shutdown,
        )
        .await
        {
            Ok(()) => {}
            Err(e) => tracing::error!(error = %e, "connection error"),
        }

        if *shutdown.borrow() {
            tracing::info!("shutdown requested, worker agent stopping");
            break;
        }

        reconnect_attempts += 1;
        if config.max_reconnect_attempts > 0 && reconnect_attempts >= config.max_reconnect_attempts {
            tracing::error!("max reconnection attempts reached, giving up");
            break;
        }
        let delay = (config.reconnect_delay_secs * reconnect_attempts as u64).min(60);
        tracing::info!(delay, attempt = reconnect_attempts, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            _ = shutdown.changed() => {}
        }
    }
}

fn spawn_status_server(
    config: Arc<AgentConfig>,
    state: Arc<AgentState>,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
) {
    let router = crate::status_server::router(state, status_tx);
    let addr = format!("0.0.0.0:{}", config.agent_status_port);
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!(addr = %addr, "status receiver listening");
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::error!(error = %e, "status receiver exited");
                }
            }
            Err(e) => tracing::error!(addr = %addr, error = %e, "failed to bind status receiver"),
        }
    });
}

async fn connect_and_run(
    config: &Arc<AgentConfig>,
    conn: &Arc<ConnectionHandle>,
    state: &Arc<AgentState>,
    executor: &Arc<TaskExecutor>,
    status_rx: &mut mpsc::UnboundedReceiver<StatusUpdate>,
    reconnect_attempts: &mut u32,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!(url = %config.orchestrator_ws_url, "connecting to orchestrator");
    let (ws_stream, _) = connect_async(&config.orchestrator_ws_url)
        .await
        .map_err(|e| AgentError::Connection(e.to_string()))?;
    let (sink, mut source) = ws_stream.split();
    conn.attach(sink).await;

    authenticate(config, conn, state).await?;
    *reconnect_attempts = 0;

    for frame in state.drain_pending().await {
        if !conn.try_send(&frame).await {
            state.requeue_front(frame).await;
            break;
        }
    }

    let heartbeat_conn = conn.clone();
    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let heartbeat_handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            heartbeat_conn.send_if_connected(WorkerFrame::Heartbeat).await;
        }
    });

    let result = message_loop(&mut source, conn, state, executor, status_rx, shutdown).await;

    heartbeat_handle.abort();
    conn.detach().await;
    result
}

async fn authenticate(
    config: &Arc<AgentConfig>,
    conn: &Arc<ConnectionHandle>,
    state: &Arc<AgentState>,
) -> Result<()> {
    let mut metadata = HashMap::new();
    metadata.insert("name".to_string(), serde_json::json!(config.worker_name));
    metadata.insert("version".to_string(), serde_json::json!(config.worker_version));
    metadata.insert("local_api_url".to_string(), serde_json::json!(config.local_api_url));
    let in_progress = state.current_task_id().await;
    metadata.insert(
        "in_progress_task".to_string(),
        match in_progress {
            Some(task_id) => serde_json::json!(task_id.to_string()),
            None => serde_json::Value::Null,
        },
    );

    let auth_frame = WorkerFrame::Auth {
        api_type: config.api_type.as_str().into(),
        token: config.worker_token.clone(),
        metadata,
    };

    if !conn.try_send(&auth_frame).await {
        return Err(AgentError::Connection("failed to send auth frame".into()));
    }

    tracing::info!("authenticated, awaiting confirmation (handled in message loop)");
    Ok(())
}

async fn message_loop(
    source: &mut WsSource,
    conn: &Arc<ConnectionHandle>,
    state: &Arc<AgentState>,
    executor: &Arc<TaskExecutor>,
    status_rx: &mut mpsc::UnboundedReceiver<StatusUpdate>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut authenticated = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("shutdown signal received, closing worker session");
                    return Ok(());
                }
            }
            message = tokio::time::timeout(RECV_IDLE_TIMEOUT, source.next()) => {
                let message = match message {
                    Ok(Some(Ok(message))) => message,
                    Ok(Some(Err(e))) => {
                        tracing::warn!(error = %e, "session recv error");
                        return Ok(());
                    }
                    Ok(None) => {
                        tracing::warn!("session closed by orchestrator");
                        return Ok(());
                    }
                    Err(_) => {
                        tracing::warn!("no frame received within idle timeout, reconnecting");
                        return Ok(());
                    }
                };

                let Message::Text(text) = message else { continue };

                if !authenticated {
                    authenticated = handle_auth_response(&text)?;
                    if !authenticated {
                        return Err(AgentError::AuthFailed("rejected by orchestrator".into()));
                    }
                    continue;
                }

                handle_server_frame(&text, conn, state, executor).await;
            }
            Some(update) = status_rx.recv() => {
                if state.current_task_id().await == Some(update.task_id) {
                    conn.send_if_connected(WorkerFrame::Status {
                        task_id: update.task_id,
                        step_key: update.step_key,
                        detail_type: update.detail_type,
                        message: update.message,
                        data: update.data,
                    }).await;
                }
            }
        }
    }
}

fn handle_auth_response(text: &str) -> Result<bool> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    match frame {
        ServerFrame::AuthSuccess { worker_id } => {
            tracing::info!(worker_id = %worker_id, "authenticated");
            Ok(true)
        }
        ServerFrame::AuthFailed { error } => {
            tracing::error!(error = %error, "authentication rejected");
            Ok(false)
        }
        _ => {
            tracing::warn!("expected auth response, got a different frame, treating as rejection");
            Ok(false)
        }
    }
}

async fn handle_server_frame(
    text: &str,
    conn: &Arc<ConnectionHandle>,
    state: &Arc<AgentState>,
    executor: &Arc<TaskExecutor>,
) {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed server frame, dropping");
            return;
        }
    };

    let frame: ServerFrame = match serde_json::from_value(raw.clone()) {
        Ok(frame) => frame,
        Err(_) => {
            let frame_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or("<missing type>");
            tracing::debug!(frame_type, "unrecognized server frame type, dropping");
            return;
        }
    };

    match frame {
        ServerFrame::Task {
            task_id,
            report_id,
            action,
            payload,
        } => handle_task(task_id, report_id, action, payload, conn, state, executor).await,
        ServerFrame::Cancel { task_id } => {
            if state.current_task_id().await == Some(task_id) {
                tracing::warn!(task_id = %task_id, "cancellation requested, will complete current call before reporting");
            }
        }
        ServerFrame::Ping => {
            conn.send_if_connected(WorkerFrame::Pong).await;
        }
        ServerFrame::HeartbeatAck { worker_id, status, current_task } => {
            tracing::debug!(worker_id = %worker_id, ?status, ?current_task, "heartbeat acknowledged");
        }
        ServerFrame::AuthSuccess { .. } | ServerFrame::AuthFailed { .. } => {
            tracing::warn!("unexpected auth frame mid-session, ignoring");
        }
        ServerFrame::Goodbye => {
            tracing::info!("orchestrator sent goodbye, session will close");
        }
    }
}

async fn handle_task(
    task_id: orchestrator_common::TaskId,
    report_id: String,
    action: String,
    payload: serde_json::Value,
    conn: &Arc<ConnectionHandle>,
    state: &Arc<AgentState>,
    executor: &Arc<TaskExecutor>,
) {
    if state.is_completed(task_id).await {
        tracing::warn!(task_id = %task_id, "task already completed, skipping duplicate");
        return;
    }
    if state.current_task_id().await == Some(task_id) {
        tracing::warn!(task_id = %task_id, "task already in progress, skipping duplicate");
        return;
    }
    if let Some(current) = state.current_task_id().await {
        tracing::warn!(task_id = %task_id, current = %current, "already working on another task, refusing");
        return;
    }

    tracing::info!(task_id = %task_id, action = %action, "received task");
    state.start_task(task_id).await;
    conn.send_if_connected(WorkerFrame::Running { task_id }).await;

    let conn = conn.clone();
    let state = state.clone();
    let executor = executor.clone();
    tokio::spawn(async move {
        let outcome = executor.execute(&action, &payload, &report_id).await;
        let frame = match outcome {
            Ok(result) => {
                tracing::info!(task_id = %task_id, "task completed successfully");
                WorkerFrame::Complete { task_id, result }
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "task failed");
                WorkerFrame::Error {
                    task_id,
                    error: e.to_string(),
                }
            }
        };
        state.finish_task(task_id).await;
        conn.send_safe(frame, &state).await;
    });
}
