//! Broadcast topics
//!
//! Topics are plain strings on the hub. Two families exist:
//! `dashboard` (every accepted reading) and `device:{id}` (one device).

use std::fmt;

/// Topic carrying every reading from every device
pub const DASHBOARD_TOPIC: &str = "dashboard";

const DEVICE_PREFIX: &str = "device:";

/// A well-known topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Dashboard,
    Device(String),
}

impl Topic {
    pub fn device(device_id: impl Into<String>) -> Self {
        Topic::Device(device_id.into())
    }

    /// Parse a topic string; anything but the two known families is `None`
    pub fn parse(topic: &str) -> Option<Self> {
        if topic == DASHBOARD_TOPIC {
            return Some(Topic::Dashboard);
        }
        topic
            .strip_prefix(DEVICE_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|id| Topic::Device(id.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Dashboard => f.write_str(DASHBOARD_TOPIC),
            Topic::Device(id) => write!(f, "{}{}", DEVICE_PREFIX, id),
        }
    }
}

/// `device:{device_id}`
pub fn device_topic(device_id: &str) -> String {
    Topic::device(device_id).to_string()
}
