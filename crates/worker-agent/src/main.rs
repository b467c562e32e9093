#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("worker agent starting");

    let config = worker_agent::config::AgentConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    worker_agent::client::run(config, shutdown_rx).await;
}

/// Mirrors the orchestrator's ctrl_c/SIGTERM convention (`orchestrator::main`)
/// so `client::run`'s reconnect loop can observe `stop()`-equivalent shutdown
/// (SPEC_FULL.md §5: "SIGTERM/SIGINT trigger `stop()`...").
async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
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

    tracing::info!("shutdown signal received, closing worker agent session");
    let _ = shutdown_tx.send(true);
}
