//! API handlers for the operations API

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::alerting::{
    aggregate, AlertRepository, CounterSource, DetectionState, DetectorId, StateStore,
};
use crate::models::{OutcomeCounts, ScopeKey, StoredAlert};

const DEFAULT_ALERT_LIMIT: i64 = 50;
const MAX_ALERT_LIMIT: i64 = 500;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub alert_repo: Option<AlertRepository>,
    pub counters: Arc<dyn CounterSource>,
    pub key_prefix: String,
    pub detection_state: Arc<StateStore>,
    pub prometheus: Option<PrometheusHandle>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tracked_keys: usize,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tracked_keys: state.detection_state.len(),
    })
}

/// Query parameters for listing alerts
#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub limit: Option<i64>,
}

/// List alerts response
#[derive(Serialize)]
pub struct ListAlertsResponse {
    pub alerts: Vec<StoredAlert>,
    pub total: usize,
}

/// Most recent alerts, newest first
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> Result<Json<ListAlertsResponse>, (StatusCode, String)> {
    let repo = state
        .alert_repo
        .ok_or((StatusCode::SERVICE_UNAVAILABLE, "Alert store not configured".to_string()))?;

    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT).clamp(1, MAX_ALERT_LIMIT);
    let alerts = repo
        .list_recent(limit)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let total = alerts.len();
    Ok(Json(ListAlertsResponse { alerts, total }))
}

/// Current metrics of one scope key
#[derive(Debug, Serialize, PartialEq)]
pub struct ScopeMetrics {
    pub scope: ScopeKey,
    pub counts: OutcomeCounts,
    pub total: u64,
    pub approval_rate: f64,
    pub error_rate: f64,
    pub decline_rate: f64,
}

/// Recent metrics response
#[derive(Serialize)]
pub struct RecentMetricsResponse {
    pub scopes: Vec<ScopeMetrics>,
}

/// Aggregated snapshot of the windowed counters
pub async fn recent_metrics(
    State(state): State<AppState>,
) -> Result<Json<RecentMetricsResponse>, (StatusCode, String)> {
    let entries = state
        .counters
        .scan_counters()
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    let scopes = aggregate(entries, &state.key_prefix)
        .into_iter()
        .map(|snapshot| {
            let counts = snapshot.counts;
            ScopeMetrics {
                scope: snapshot.scope,
                counts,
                total: counts.total(),
                approval_rate: counts.approval_rate(),
                error_rate: counts.error_rate(),
                decline_rate: counts.decline_rate(),
            }
        })
        .collect();

    Ok(Json(RecentMetricsResponse { scopes }))
}

/// One tracked evaluation key
#[derive(Serialize)]
pub struct TrackedKey {
    pub key: String,
    pub scope: ScopeKey,
    pub detector: DetectorId,
    #[serde(flatten)]
    pub state: DetectionState,
}

/// Detection state response
#[derive(Serialize)]
pub struct DetectionStateResponse {
    pub keys: Vec<TrackedKey>,
    pub total: usize,
}

/// Keys the engine currently tracks
pub async fn detection_state(State(state): State<AppState>) -> Json<DetectionStateResponse> {
    let keys: Vec<TrackedKey> = state
        .detection_state
        .snapshot()
        .into_iter()
        .map(|(key, state)| TrackedKey {
            key: key.to_string(),
            detector: key.detector,
            scope: key.scope,
            state,
        })
        .collect();

    let total = keys.len();
    Json(DetectionStateResponse { keys, total })
}

/// Prometheus scrape endpoint
pub async fn prometheus_metrics(
    State(state): State<AppState>,
) -> Result<String, (StatusCode, String)> {
    state
        .prometheus
        .map(|handle| handle.render())
        .ok_or((StatusCode::SERVICE_UNAVAILABLE, "Metrics recorder not installed".to_string()))
}
