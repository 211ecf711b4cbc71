//! Ingestion Service
//!
//! `submit` = authenticate → validate → persist → publish.
//! Submissions are independent; SQLite serializes only the write itself.

use crate::broadcast::{
    device_topic, Broadcaster, ReadingEvent, ServerMessage, DASHBOARD_TOPIC,
};
use crate::ingest::error::IngestResult;
use crate::ingest::validate::{validate, RawChannels};
use crate::registry::DeviceRegistry;
use crate::storage::{SensorReading, TelemetryStore};
use std::sync::Arc;

/// Accepts readings from devices and fans them out to live observers
#[derive(Clone)]
pub struct IngestionService {
    registry: DeviceRegistry,
    store: TelemetryStore,
    hub: Arc<dyn Broadcaster>,
}

impl IngestionService {
    pub fn new(registry: DeviceRegistry, store: TelemetryStore, hub: Arc<dyn Broadcaster>) -> Self {
        Self {
            registry,
            store,
            hub,
        }
    }

    /// Accept one reading.
    ///
    /// Nothing is written on authentication or validation failure. Publishing
    /// happens after the write commits and never fails the submission.
    pub async fn submit(
        &self,
        device_id: &str,
        api_key: &str,
        channels: RawChannels,
    ) -> IngestResult<SensorReading> {
        self.registry.authenticate(device_id, api_key).await?;

        let fields = validate(&channels).map_err(|e| {
            tracing::warn!(device_id = %device_id, error = %e, "Rejected reading");
            e
        })?;

        let reading = self.store.append_reading(device_id, api_key, fields).await?;

        tracing::info!(
            device_id = %device_id,
            reading_id = reading.id,
            channels = fields.populated_count(),
            "Reading accepted"
        );

        self.publish(&reading);
        Ok(reading)
    }

    fn publish(&self, reading: &SensorReading) {
        let message = Arc::new(ServerMessage::SensorUpdate {
            data: ReadingEvent::from(reading),
        });

        let to_device = self
            .hub
            .publish(&device_topic(&reading.device_id), Arc::clone(&message));
        let to_dashboard = self.hub.publish(DASHBOARD_TOPIC, message);

        tracing::debug!(
            device_id = %reading.device_id,
            reading_id = reading.id,
            to_device,
            to_dashboard,
            "Reading broadcast"
        );
    }
}
