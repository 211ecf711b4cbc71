//! Agrotel REST API
//!
//! HTTP and WebSocket surface, built with Axum.
//!
//! # Endpoints
//!
//! ## Devices
//! - `POST /api/v1/register` - Self-registration (idempotent)
//! - `GET /api/v1/devices` - List devices with latest readings
//! - `POST /api/v1/devices` - Strict create (admin)
//! - `GET /api/v1/devices/:id` - Device detail
//! - `PUT /api/v1/devices/:id` - Update metadata / status (admin)
//! - `DELETE /api/v1/devices/:id` - Delete device and history (admin)
//! - `POST /api/v1/devices/:id/rotate-key` - Rotate API key (admin)
//!
//! ## Ingest
//! - `POST /api/v1/submit` - Device reports a reading
//!
//! ## Readings
//! - `GET /api/v1/devices/:id/readings` - Paged history
//! - `GET /api/v1/devices/:id/latest` - Latest reading
//! - `GET /api/v1/devices/:id/aggregate` - Hour / day buckets
//! - `GET /api/v1/devices/:id/stats` - Summary statistics
//! - `GET /api/v1/devices/:id/export` - CSV / JSON / NDJSON download
//! - `GET /api/v1/overview` - Fleet summary
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /ws/dashboard` - Every accepted reading
//! - `GET /ws/devices/:id` - Readings of one device
//!
//! # Example
//!
//! ```rust,ignore
//! use agrotel::api::{serve, ApiConfig, AppState};
//! use agrotel::storage::{StorageConfig, TelemetryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TelemetryStore::open(StorageConfig::default()).await?;
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(store, config.clone());
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod dto;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

pub use auth::AdminAccess;
pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::websocket::{dashboard_socket, device_socket};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));
    let body_limit = state.config.max_body_bytes;
    let cors = cors_layer(&state.config.cors_origins);

    let api_routes = Router::new()
        // Device-facing routes
        .route("/register", post(routes::devices::register_device))
        .route("/submit", post(routes::ingest::submit_reading))
        // Device management
        .route(
            "/devices",
            get(routes::devices::list_devices).post(routes::devices::create_device),
        )
        .route(
            "/devices/:device_id",
            get(routes::devices::get_device)
                .put(routes::devices::update_device)
                .delete(routes::devices::delete_device),
        )
        .route(
            "/devices/:device_id/rotate-key",
            post(routes::devices::rotate_key),
        )
        // Reading queries
        .route(
            "/devices/:device_id/readings",
            get(routes::readings::device_readings),
        )
        .route(
            "/devices/:device_id/latest",
            get(routes::readings::latest_reading),
        )
        .route(
            "/devices/:device_id/aggregate",
            get(routes::readings::aggregate_readings),
        )
        .route(
            "/devices/:device_id/stats",
            get(routes::readings::device_stats),
        )
        .route(
            "/devices/:device_id/export",
            get(routes::export::export_readings),
        )
        .route("/overview", get(routes::overview::overview))
        .layer(DefaultBodyLimit::max(body_limit))
        // Long-lived WebSocket connections are mounted outside this layer
        .layer(TimeoutLayer::new(timeout));

    let ws_routes = Router::new()
        .route("/dashboard", get(dashboard_socket))
        .route("/devices/:device_id", get(device_socket));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/ws", ws_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// CORS policy from the configured origins; empty or `*` allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> std::io::Result<()> {
    if !state.admin_protected() {
        tracing::warn!("No admin token configured; device management routes are disabled");
    }

    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Agrotel API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Agrotel API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
