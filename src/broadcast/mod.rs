//! Live broadcast of accepted readings
//!
//! - **hub**: `Broadcaster` trait and the in-process `BroadcastHub`
//! - **queue**: `OutboundQueue`, the bounded per-connection subscriber
//! - **topic**: `dashboard` and `device:{id}` topic names
//! - **messages**: Wire frames (`sensor_update`, `pong`, ...)
//!
//! # Architecture
//!
//! ```text
//! IngestionService ──publish(topic, msg)──▶ BroadcastHub
//!                                              │ snapshot subscribers (read lock)
//!                                              ▼
//!                              OutboundQueue (per connection, drop-oldest)
//!                                              │ recv().await
//!                                              ▼
//!                                     WebSocket writer task
//! ```

pub mod hub;
pub mod messages;
pub mod queue;
pub mod topic;

pub use hub::{
    BroadcastHub, Broadcaster, Delivery, HubConfig, HubError, HubStats, SendError, Subscriber,
    SubscriptionHandle, SubscriptionId,
};
pub use messages::{ClientMessage, HubMessage, ReadingEvent, ServerMessage};
pub use queue::OutboundQueue;
pub use topic::{device_topic, Topic, DASHBOARD_TOPIC};
