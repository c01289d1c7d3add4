use anyhow::{Context, Result};
use lib_telemetry::http::{self, AppState};
use lib_telemetry::persistence::DocumentStatus;
use lib_telemetry::tasks::spawn_periodic_tasks;
use lib_telemetry::{StateStore, TelemetryEngine};
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod aggregator_logic;
use aggregator_logic::config::{self, FileSource};
use aggregator_logic::logger;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let (config, file_source) = config::load_config();
    let _log_guard = logger::setup_logging(&config.log_dir(), config.log_level())?;
    match &file_source {
        FileSource::Loaded(path) => info!("Configuration loaded from {}", path.display()),
        FileSource::NotFound(path) => {
            info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display())
        }
        FileSource::Invalid(path, reason) => {
            warn!("Failed to load config file {}: {}. Falling back to other sources.", path.display(), reason)
        }
    }

    let settings = config.engine_settings();
    let intervals = config.task_intervals();

    let store = StateStore::new(config.data_dir());
    let outcome = store.load();
    for (document, status) in &outcome.statuses {
        if let DocumentStatus::Corrupt { .. } | DocumentStatus::Unreadable = status {
            warn!(document, ?status, "persisted document could not be recovered");
        }
    }
    let mut engine = TelemetryEngine::new(settings);
    engine.restore(outcome.state);
    info!(
        live = engine.devices().live_count(),
        archived = engine.devices().archived_count(),
        snapshots = engine.snapshots().len(),
        "state recovered"
    );

    let app_state = AppState::new(engine, store);
    let shutdown = CancellationToken::new();
    let tasks = spawn_periodic_tasks(app_state.clone(), intervals, shutdown.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("Aggregator listening on http://{}", addr);

    let server_shutdown = shutdown.clone();
    let router = http::router(app_state.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            info!("SIGTERM received, initiating shutdown.");
        }
    }

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => info!("HTTP server drained"),
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }
    tasks.join().await;

    if let Err(e) = app_state.persist().await {
        error!("Final persistence failed: {}", e);
    } else {
        info!("Final state persisted");
    }

    info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
