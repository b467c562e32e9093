use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;

use orchestrator::circuit_breaker::CircuitBreakerRegistry;
use orchestrator::config::OrchestratorConfig;
use orchestrator::control_plane::ControlPlane;
use orchestrator::queue::TaskQueue;
use orchestrator::registry::WorkerRegistry;
use orchestrator::state_store::{GuardedStateStore, RedisStateStore, StateStore};
use orchestrator::status_relay::StatusRelay;
use orchestrator::{build_router, enrichment, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("orchestrator starting");

    let config = OrchestratorConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "configuration invalid, refusing to start");
        std::process::exit(1);
    }
    let config = Arc::new(config);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    let raw_store: Arc<dyn StateStore> = match RedisStateStore::connect(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to state store, refusing to start");
            std::process::exit(1);
        }
    };

    let circuit_breakers = Arc::new(CircuitBreakerRegistry::new());
    let store: Arc<dyn StateStore> = Arc::new(GuardedStateStore::new(
        raw_store,
        circuit_breakers.state_store.clone(),
    ));
    let registry = Arc::new(WorkerRegistry::new(store.clone(), config.clone()));
    let (queue, terminal_rx) = TaskQueue::new(store, registry.clone(), config.clone());
    let queue = Arc::new(queue);
    let control_plane = Arc::new(ControlPlane::new(&config, circuit_breakers.clone()));
    let status_relay = StatusRelay::new(&config, circuit_breakers.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(registry.clone().run_heartbeat_monitor(queue.clone(), shutdown_rx.clone()));
    tokio::spawn(orchestrator::assignment::run_assignment_loop(
        queue.clone(),
        registry.clone(),
        circuit_breakers.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(enrichment::run_enrichment_loop(
        queue.clone(),
        registry.clone(),
        control_plane.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(enrichment::run_completion_wiring(terminal_rx, control_plane.clone()));
    tokio::spawn(report_circuit_metrics(circuit_breakers.clone(), shutdown_rx.clone()));

    let state = Arc::new(AppState {
        registry,
        queue,
        status_relay,
        metrics_handle,
        shutdown_rx: shutdown_rx.clone(),
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %addr, "orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("server error");

    tracing::info!("orchestrator shut down");
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining background loops");
    let _ = shutdown_tx.send(true);
}

async fn report_circuit_metrics(
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(15)) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
        circuit_breakers.report_metrics();
    }
}
