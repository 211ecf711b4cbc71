//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (database answers)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 once the database answers a trivial query.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /health
///
/// Full health status with store and hub counters.
pub async fn full_health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let hub = state.hub.stats();

    match state.store.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                storage: "ok".to_string(),
                uptime_seconds: state.uptime_seconds(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                devices: stats.device_count,
                readings: stats.reading_count,
                database_size_bytes: stats.database_size_bytes,
                hub,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Storage health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    storage: "error".to_string(),
                    uptime_seconds: state.uptime_seconds(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    devices: 0,
                    readings: 0,
                    database_size_bytes: 0,
                    hub,
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let status = liveness().await;
        assert_eq!(status, StatusCode::OK);
    }
}
