use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use tracing::{debug, warn};

use super::{ApiError, AppState};
use crate::core::views::{DashboardSummary, DeviceListing, DeviceView, HistoryListing, ReceiverView};
use crate::ingest::parse_batch;

/// `POST /api/receiver-data`
pub async fn receive_batch(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, ApiError> {
    let batch = parse_batch(&body).inspect_err(|err| debug!(error = %err, bytes = body.len(), "batch rejected"))?;

    let summary = state.engine.lock().await.ingest(&batch, Utc::now());
    debug!(
        receiver_id = %summary.receiver_id,
        accepted = summary.accepted,
        skipped = summary.skipped,
        registered = summary.registered.len(),
        reconnected = summary.reconnected.len(),
        "batch ingested"
    );
    Ok((
        StatusCode::OK,
        format!("OK: accepted {} of {} readings", summary.accepted, batch.entry_count),
    ))
}

pub async fn dashboard(State(state): State<AppState>) -> Json<DashboardSummary> {
    let uptime = state.uptime_secs(Utc::now());
    Json(state.engine.lock().await.dashboard(uptime))
}

pub async fn list_devices(State(state): State<AppState>) -> Json<DeviceListing> {
    Json(state.engine.lock().await.device_listing())
}

pub async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<DeviceView>, ApiError> {
    let view = state.engine.lock().await.device_view(&id);
    view.map(Json).ok_or_else(|| ApiError::not_found("device", id))
}

pub async fn list_receivers(State(state): State<AppState>) -> Json<Vec<ReceiverView>> {
    Json(state.engine.lock().await.receiver_listing())
}

pub async fn get_receiver(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReceiverView>, ApiError> {
    let view = state.engine.lock().await.receiver_view(&id);
    view.map(Json).ok_or_else(|| ApiError::not_found("receiver", id))
}

pub async fn history(State(state): State<AppState>) -> Json<HistoryListing> {
    Json(state.engine.lock().await.history_listing())
}

/// `POST /api/history/clear`: rebaselines live devices and drops the rest.
pub async fn clear_history(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.engine.lock().await.clear_history(Utc::now());
    state.persist().await.inspect_err(|err| warn!(error = %err, "history cleared in memory only"))?;
    Ok((StatusCode::OK, "OK: history cleared"))
}

/// `POST /api/reset`
pub async fn reset(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.engine.lock().await.reset(Utc::now());
    state.persist().await.inspect_err(|err| warn!(error = %err, "reset applied in memory only"))?;
    Ok((StatusCode::OK, "OK: all data reset"))
}

pub async fn health() -> &'static str {
    "OK"
}
