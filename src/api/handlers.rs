use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PoolError;
use crate::models::{Credential, HealthRecord, MonitorReport, PoolMetrics, RotationResult};
use crate::telemetry;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RotateRequest {
    pub credential_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct ResetUsageResponse {
    pub service: String,
    pub reset: u64,
}

#[derive(Serialize)]
pub struct StateChangeResponse {
    pub id: Uuid,
    pub is_active: bool,
}

// ── Handlers ─────────────────────────────────────────────────

pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<Vec<Credential>>, PoolError> {
    Ok(Json(state.pool.list(&service).await?))
}

pub async fn check_health(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<Vec<HealthRecord>>, PoolError> {
    Ok(Json(state.coordinator.check_all(&service).await?))
}

pub async fn pool_metrics(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<PoolMetrics>, PoolError> {
    Ok(Json(state.coordinator.metrics(&service).await?))
}

pub async fn run_monitor(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<MonitorReport>, PoolError> {
    Ok(Json(state.coordinator.monitor_and_recover(&service).await?))
}

/// An empty body rotates without retiring anything.
pub async fn rotate(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    body: Option<Json<RotateRequest>>,
) -> Result<Json<RotationResult>, PoolError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let reason = req.reason.unwrap_or_else(|| "manual rotation".to_string());
    let result = state
        .coordinator
        .rotate(&service, req.credential_id, &reason)
        .await?;
    Ok(Json(result))
}

pub async fn reset_usage(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<ResetUsageResponse>, PoolError> {
    let reset = state.pool.reset_usage(&service).await?;
    Ok(Json(ResetUsageResponse { service, reset }))
}

pub async fn deactivate_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StateChangeResponse>, PoolError> {
    state.pool.deactivate(id, "deactivated by operator").await?;
    Ok(Json(StateChangeResponse {
        id,
        is_active: false,
    }))
}

pub async fn reactivate_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StateChangeResponse>, PoolError> {
    state.pool.reactivate(id).await?;
    Ok(Json(StateChangeResponse {
        id,
        is_active: true,
    }))
}

pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::render(),
    )
}
