//! `serve`: run the engine until Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;

use flowforge_types::config::EngineConfig;

use crate::http::router::build_router;
use crate::state::AppState;

const PLUGIN_PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub async fn serve(config: &EngineConfig, data_dir: PathBuf, bind: Option<String>) -> Result<()> {
    let (state, receiver) = AppState::init(config, data_dir).await?;
    let cancel = CancellationToken::new();

    let routes = state
        .http_triggers
        .reload(&state.repo)
        .await
        .context("failed to load http trigger routes")?;

    let workers = receiver.spawn_workers(Arc::clone(&state.orchestrator), config.queue.workers, cancel.clone());
    spawn_recovery(&state, cancel.clone());
    let time_triggers = Arc::clone(&state.time_triggers).spawn(cancel.clone());
    state.plugins.spawn_purge(PLUGIN_PURGE_INTERVAL, cancel.clone());

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %addr,
        data_dir = %state.data_dir.display(),
        workers = config.queue.workers,
        http_routes = routes,
        "flowforge engine started"
    );
    println!(
        "  {} Flowforge listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}")).cyan()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let router = build_router(state);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "execution worker ended abnormally");
        }
    }
    if let Err(e) = time_triggers.await {
        tracing::warn!(error = %e, "time trigger processor ended abnormally");
    }

    served.context("http server failed")?;
    println!("\n  Engine stopped.");
    Ok(())
}

/// Re-enqueue executions a previous run left behind. Runs in the background
/// because the backlog may exceed the queue capacity.
fn spawn_recovery(state: &AppState, cancel: CancellationToken) {
    let launcher = Arc::clone(&state.launcher);
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            recovered = launcher.recover() => match recovered {
                Ok(count) => tracing::debug!(count, "execution recovery finished"),
                Err(e) => tracing::error!(error = %e, "execution recovery failed"),
            },
        }
    });
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
