//! WebSocket Real-Time Streaming
//!
//! Bridges the broadcast hub to browser dashboards and device views.
//!
//! ## Endpoints
//!
//! - `/ws/dashboard` - every accepted reading (`dashboard` topic)
//! - `/ws/devices/{device_id}` - one device (`device:{device_id}` topic)
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8000/ws/dashboard');
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 'sensor_update') console.log(msg.data);
//! };
//!
//! ws.send(JSON.stringify({type: 'ping', timestamp: Date.now()}));
//! ```

mod handler;

pub use handler::{dashboard_socket, device_socket};
