//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::broadcast::{BroadcastHub, Broadcaster, HubConfig};
use crate::ingest::IngestionService;
use crate::query::QueryService;
use crate::registry::DeviceRegistry;
use crate::storage::TelemetryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Telemetry store (used directly by health checks)
    pub store: TelemetryStore,
    /// Device registry
    pub registry: DeviceRegistry,
    /// Reading ingestion
    pub ingest: IngestionService,
    /// Read-only queries
    pub query: QueryService,
    /// Live fan-out to WebSocket subscribers
    pub hub: Arc<dyn Broadcaster>,
    /// Hub settings the transport needs (queue capacity)
    pub hub_config: HubConfig,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Create state with an in-process hub using default settings
    pub fn new(store: TelemetryStore, config: ApiConfig) -> Self {
        Self::with_hub_config(store, config, HubConfig::default())
    }

    /// Create state with an in-process hub using the given settings
    pub fn with_hub_config(store: TelemetryStore, config: ApiConfig, hub_config: HubConfig) -> Self {
        let hub: Arc<dyn Broadcaster> = Arc::new(BroadcastHub::new(hub_config.clone()));
        Self::with_broadcaster(store, config, hub, hub_config)
    }

    /// Create state around an existing broadcaster backend
    pub fn with_broadcaster(
        store: TelemetryStore,
        config: ApiConfig,
        hub: Arc<dyn Broadcaster>,
        hub_config: HubConfig,
    ) -> Self {
        let registry = DeviceRegistry::new(store.clone());
        let ingest = IngestionService::new(registry.clone(), store.clone(), Arc::clone(&hub));
        let query = QueryService::new(store.clone());

        Self {
            store,
            registry,
            ingest,
            query,
            hub,
            hub_config,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether admin routes require a token
    pub fn admin_protected(&self) -> bool {
        self.config.admin_token.is_some()
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins, empty or `["*"]` allows any
    pub cors_origins: Vec<String>,
    /// Request timeout in seconds (WebSocket upgrades are exempt)
    pub request_timeout_secs: u64,
    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
    /// Largest window a single export may return
    pub max_export_readings: usize,
    /// Token for administrative routes; admin routes are disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            max_body_bytes: 64 * 1024,
            max_export_readings: 100_000,
            admin_token: None,
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Require this token on admin routes
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
