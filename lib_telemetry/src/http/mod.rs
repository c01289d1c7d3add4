//! # HTTP Surface
//!
//! axum router for the ingestion endpoint and the dashboard API, plus the
//! [`AppState`] shared with the periodic tasks.
//!
//! Handlers take the engine lock, run one synchronous engine method and
//! release it before any I/O. Request bodies are parsed before the lock is
//! taken.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::core::TelemetryEngine;
use crate::persistence::{PersistError, StateStore};

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<TelemetryEngine>>,
    pub store: Arc<StateStore>,
    pub started_at: DateTime<Utc>,
    /// Serializes writers so an older copy never lands after a newer one.
    persist_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(engine: TelemetryEngine, store: StateStore) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            store: Arc::new(store),
            started_at: Utc::now(),
            persist_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn uptime_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.started_at).num_seconds()).unwrap_or(0)
    }

    /// Copies the durable state under the engine lock and writes it on a
    /// blocking thread once the lock is released.
    pub async fn persist(&self) -> Result<(), PersistError> {
        let _gate = self.persist_gate.lock().await;
        let state = self.engine.lock().await.persisted_state(Utc::now());
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .map_err(|err| PersistError::Worker(err.to_string()))?;
        if result.is_ok() {
            debug!(dir = %self.store.dir().display(), "persisted");
        }
        result
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/receiver-data", post(handlers::receive_batch))
        .route("/api/dashboard", get(handlers::dashboard))
        .route("/api/devices", get(handlers::list_devices))
        .route("/api/devices/{id}", get(handlers::get_device))
        .route("/api/receivers", get(handlers::list_receivers))
        .route("/api/receivers/{id}", get(handlers::get_receiver))
        .route("/api/history", get(handlers::history))
        .route("/api/history/clear", post(handlers::clear_history))
        .route("/api/reset", post(handlers::reset))
        .route("/health", get(handlers::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
