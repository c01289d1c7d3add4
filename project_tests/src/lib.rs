//! # End-to-end Test Harness
//!
//! Boots the aggregator router on an ephemeral loopback port so the tests in
//! `tests/` can drive it with a real HTTP client.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Result;
use lib_telemetry::http::{self, AppState};
use lib_telemetry::{EngineSettings, StateStore, TelemetryEngine};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    /// Starts a server with default settings and its data dir at `data_dir`.
    pub async fn start(data_dir: &Path) -> Result<Self> {
        Self::start_with(TelemetryEngine::new(EngineSettings::default()), data_dir).await
    }

    pub async fn start_with(engine: TelemetryEngine, data_dir: &Path) -> Result<Self> {
        let state = AppState::new(engine, StateStore::new(data_dir));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let router = http::router(state.clone());
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });

        Ok(Self {
            addr,
            state,
            shutdown,
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle.await??;
        Ok(())
    }
}
