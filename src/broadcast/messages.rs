//! Broadcast Message Types
//!
//! Defines the frames exchanged with live observers (dashboards and
//! per-device views) over the WebSocket transport.

use crate::storage::{SensorFields, SensorReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive; the timestamp is echoed back verbatim
    Ping {
        #[serde(default)]
        timestamp: Option<serde_json::Value>,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection
    ConnectionEstablished {
        topic: String,
        message: String,
    },
    /// A reading was accepted
    SensorUpdate { data: ReadingEvent },
    /// Reply to a ping
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<serde_json::Value>,
    },
    /// Malformed or unsupported inbound frame
    Error { message: String },
}

impl ServerMessage {
    pub fn connection_established(topic: &str) -> Self {
        ServerMessage::ConnectionEstablished {
            topic: topic.to_string(),
            message: format!("Connected to {}", topic),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Shared, immutable message handed to every subscriber of a publish
pub type HubMessage = Arc<ServerMessage>;

/// Payload of a `sensor_update`: only populated channels are present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingEvent {
    pub reading_id: i64,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: SensorFields,
}

impl From<&SensorReading> for ReadingEvent {
    fn from(reading: &SensorReading) -> Self {
        Self {
            reading_id: reading.id,
            device_id: reading.device_id.clone(),
            timestamp: reading.timestamp,
            fields: reading.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "ping", "timestamp": 1700000000}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Ping {
                timestamp: Some(serde_json::json!(1700000000))
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping { timestamp: None });

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "subscribe"}"#).is_err());
    }

    #[test]
    fn test_sensor_update_serialization() {
        let event = ReadingEvent {
            reading_id: 42,
            device_id: "ESP32-001".to_string(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            fields: SensorFields::default().temperature(24.5).soil_raw(1800),
        };

        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::SensorUpdate { data: event }.to_json().unwrap())
                .unwrap();

        assert_eq!(json["type"], "sensor_update");
        assert_eq!(json["data"]["reading_id"], 42);
        assert_eq!(json["data"]["temperature"], 24.5);
        assert_eq!(json["data"]["soil_raw"], 1800);
        assert!(json["data"].get("humidity").is_none());
    }

    #[test]
    fn test_control_frames() {
        let json = ServerMessage::connection_established("dashboard").to_json().unwrap();
        assert!(json.contains(r#""type":"connection_established""#));
        assert!(json.contains(r#""topic":"dashboard""#));

        let json = ServerMessage::Pong { timestamp: None }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let json = ServerMessage::error("Invalid JSON").to_json().unwrap();
        assert_eq!(json, r#"{"type":"error","message":"Invalid JSON"}"#);
    }
}
