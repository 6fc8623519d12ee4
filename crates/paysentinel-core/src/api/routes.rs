//! API routes

use axum::{routing::get, Router};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Alerts
        .route("/api/v1/alerts", get(handlers::list_alerts))

        // Live counters and detection state
        .route("/api/v1/metrics/recent", get(handlers::recent_metrics))
        .route("/api/v1/detection/state", get(handlers::detection_state))

        // Self-monitoring
        .route("/metrics", get(handlers::prometheus_metrics))

        .with_state(state)
}
