//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle.
//!
//! Each connection owns an `OutboundQueue` subscribed to exactly one topic.
//! A writer task drains the queue to the socket; the reader loop answers
//! pings and reports malformed frames. Whichever side ends first aborts the
//! other, then the subscription is removed and the queue closed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::api::AppState;
use crate::broadcast::{
    device_topic, Broadcaster, ClientMessage, HubMessage, OutboundQueue, ServerMessage,
    DASHBOARD_TOPIC,
};

/// `GET /ws/dashboard`: every accepted reading
pub async fn dashboard_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, &state, DASHBOARD_TOPIC.to_string())
}

/// `GET /ws/devices/:device_id`: readings of one device
///
/// The device does not have to exist yet; the socket simply stays quiet
/// until it reports.
pub async fn device_socket(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, &state, device_topic(&device_id))
}

fn upgrade(ws: WebSocketUpgrade, state: &AppState, topic: String) -> Response {
    let hub = Arc::clone(&state.hub);
    let capacity = state.hub_config.queue_capacity;
    ws.on_upgrade(move |socket| handle_socket(socket, hub, topic, capacity))
}

/// Handle an established WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    hub: Arc<dyn Broadcaster>,
    topic: String,
    queue_capacity: usize,
) {
    let (mut sender, mut receiver) = socket.split();

    // Confirmation goes in first so it precedes any broadcast
    let queue: Arc<OutboundQueue<HubMessage>> = Arc::new(OutboundQueue::new(queue_capacity));
    let _ = queue.push_control(Arc::new(ServerMessage::connection_established(&topic)));

    let handle = match hub.subscribe(&topic, queue.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "WebSocket subscription refused");
            if let Ok(text) = ServerMessage::error(e.to_string()).to_json() {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let subscription_id = handle.id();
    tracing::info!(topic = %topic, subscription_id = %subscription_id, "WebSocket connected");

    // Task to forward queued messages to the socket
    let writer_queue = Arc::clone(&queue);
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = writer_queue.recv().await {
            match message.to_json() {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        tracing::debug!(
                            subscription_id = %subscription_id,
                            "WebSocket send failed, closing connection"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                }
            }
        }
        let _ = sender.close().await;
    });

    // Task to receive frames from the socket and answer them
    let reader_queue = Arc::clone(&queue);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(message) => {
                    if !handle_ws_message(&reader_queue, message) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    hub.unsubscribe(&handle);
    queue.close();

    tracing::info!(
        topic = %topic,
        subscription_id = %subscription_id,
        dropped = queue.dropped(),
        "WebSocket disconnected"
    );
}

/// Handle a received WebSocket frame
///
/// Returns false if the connection should be closed.
fn handle_ws_message(queue: &OutboundQueue<HubMessage>, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            if let Some(reply) = reply_to_text(&text) {
                // A closed queue means the connection is already going away
                if queue.push_control(Arc::new(reply)).is_err() {
                    return false;
                }
            }
            true
        }
        Message::Binary(_) => queue
            .push_control(Arc::new(ServerMessage::error("Binary messages not supported")))
            .is_ok(),
        // Axum answers protocol pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}

/// Response to an inbound text frame, if any
pub(crate) fn reply_to_text(text: &str) -> Option<ServerMessage> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Some(ServerMessage::error("Invalid JSON")),
    };

    match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(ClientMessage::Ping { timestamp }) => Some(ServerMessage::Pong { timestamp }),
        Err(_) => {
            let kind = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing>");
            Some(ServerMessage::error(format!("Unsupported message type: {}", kind)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{build_router, ApiConfig};
    use crate::ingest::RawChannels;
    use crate::registry::DeviceRegistration;
    use crate::storage::{StorageConfig, TelemetryStore};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio_tungstenite::tungstenite::Message as ClientFrame;

    type ClientSocket =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn serve_test_app() -> (std::net::SocketAddr, AppState, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = TelemetryStore::open(StorageConfig::new(dir.path()))
            .await
            .unwrap();
        let state = AppState::new(store, ApiConfig::default());
        let router = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (addr, state, dir)
    }

    async fn next_json(socket: &mut ClientSocket) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("timed out waiting for a frame")
                .unwrap()
                .unwrap();
            if let ClientFrame::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_dashboard_socket_lifecycle() {
        let (addr, state, _dir) = serve_test_app().await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/dashboard", addr))
            .await
            .unwrap();

        let hello = next_json(&mut socket).await;
        assert_eq!(hello["type"], "connection_established");
        assert_eq!(hello["topic"], DASHBOARD_TOPIC);
        assert_eq!(state.hub.stats().subscriptions, 1);

        socket.send(ClientFrame::Text("not json".to_string())).await.unwrap();
        let reply = next_json(&mut socket).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Invalid JSON");

        socket
            .send(ClientFrame::Text(r#"{"type":"ping","timestamp":42}"#.to_string()))
            .await
            .unwrap();
        let reply = next_json(&mut socket).await;
        assert_eq!(reply, json!({"type": "pong", "timestamp": 42}));

        let api_key = state
            .registry
            .register(DeviceRegistration::new("D1", "Bed 1"))
            .await
            .unwrap()
            .api_key
            .unwrap();
        let reading = state
            .ingest
            .submit(
                "D1",
                &api_key,
                RawChannels {
                    temperature: Some(24.5),
                    humidity: Some(60.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let update = next_json(&mut socket).await;
        assert_eq!(update["type"], "sensor_update");
        assert_eq!(update["data"]["reading_id"], reading.id);
        assert_eq!(update["data"]["device_id"], "D1");
        assert_eq!(update["data"]["temperature"], 24.5);
        assert!(update["data"].get("soil_moisture").is_none());

        socket.close(None).await.unwrap();

        let mut remaining = state.hub.stats().subscriptions;
        for _ in 0..100 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = state.hub.stats().subscriptions;
        }
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_device_socket_only_sees_its_device() {
        let (addr, state, _dir) = serve_test_app().await;

        let mut keys = Vec::new();
        for id in ["D1", "D2"] {
            let registered = state
                .registry
                .register(DeviceRegistration::new(id, "Bed"))
                .await
                .unwrap();
            keys.push(registered.api_key.unwrap());
        }

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/devices/D2", addr))
            .await
            .unwrap();
        let hello = next_json(&mut socket).await;
        assert_eq!(hello["topic"], "device:D2");

        let channels = RawChannels {
            soil_moisture: Some(33.0),
            ..Default::default()
        };
        state.ingest.submit("D1", &keys[0], channels).await.unwrap();
        let expected = state.ingest.submit("D2", &keys[1], channels).await.unwrap();

        let update = next_json(&mut socket).await;
        assert_eq!(update["type"], "sensor_update");
        assert_eq!(update["data"]["device_id"], "D2");
        assert_eq!(update["data"]["reading_id"], expected.id);
    }

    #[test]
    fn test_ping_echoes_timestamp() {
        let reply = reply_to_text(r#"{"type": "ping", "timestamp": 1700000000123}"#).unwrap();
        assert_eq!(
            reply,
            ServerMessage::Pong {
                timestamp: Some(json!(1700000000123u64))
            }
        );

        let reply = reply_to_text(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(reply, ServerMessage::Pong { timestamp: None });
    }

    #[test]
    fn test_malformed_frames_get_error() {
        assert_eq!(
            reply_to_text("not json").unwrap(),
            ServerMessage::error("Invalid JSON")
        );
        assert_eq!(
            reply_to_text(r#"{"type": "subscribe", "topics": ["x"]}"#).unwrap(),
            ServerMessage::error("Unsupported message type: subscribe")
        );
        assert_eq!(
            reply_to_text(r#"{"hello": 1}"#).unwrap(),
            ServerMessage::error("Unsupported message type: <missing>")
        );
    }

    #[tokio::test]
    async fn test_frames_answered_through_queue() {
        let queue: OutboundQueue<HubMessage> = OutboundQueue::new(8);

        assert!(handle_ws_message(&queue, Message::Text(r#"{"type":"ping"}"#.to_string())));
        assert!(handle_ws_message(&queue, Message::Binary(vec![1, 2, 3])));
        assert!(!handle_ws_message(&queue, Message::Close(None)));

        assert_eq!(*queue.recv().await.unwrap(), ServerMessage::Pong { timestamp: None });
        assert_eq!(
            *queue.recv().await.unwrap(),
            ServerMessage::error("Binary messages not supported")
        );
    }

    #[test]
    fn test_closed_queue_ends_reader() {
        let queue: OutboundQueue<HubMessage> = OutboundQueue::new(8);
        queue.close();
        assert!(!handle_ws_message(&queue, Message::Text(r#"{"type":"ping"}"#.to_string())));
    }
}
