//! Broadcast Hub
//!
//! In-process topic fan-out. Publishers hand a message to a topic; every
//! subscription registered on exactly that topic at the moment of the call
//! receives it. Nothing is retained for late subscribers.
//!
//! # Failure policy
//! - `SendError::Closed` evicts the subscription immediately
//! - any other send error evicts after `max_send_failures` consecutive failures
//!
//! Evicted subscribers are closed so their transport tears down.

use crate::broadcast::messages::HubMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Outcome of a successful non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queued, but the oldest pending message was discarded to make room
    DroppedOldest,
}

/// Why a subscriber could not accept a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("subscriber closed")]
    Closed,
    #[error("send failed: {0}")]
    Failed(String),
}

/// A live observer attached to the hub
pub trait Subscriber: Send + Sync {
    /// Non-blocking hand-off
    fn send(&self, message: HubMessage) -> Result<Delivery, SendError>;

    /// Ask the subscriber to shut down
    fn close(&self);
}

/// Unique identifier for a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned by `subscribe`; pass back to `unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Hub errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Too many subscriptions (limit {0})")]
    TooManySubscriptions(usize),

    #[error("Invalid topic: {0:?}")]
    InvalidTopic(String),
}

/// Configuration for the broadcast hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum number of live subscriptions across all topics
    pub max_subscriptions: usize,
    /// Per-connection outbound queue capacity
    pub queue_capacity: usize,
    /// Consecutive send failures before a subscriber is evicted
    pub max_send_failures: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 1000,
            queue_capacity: 256,
            max_send_failures: 3,
        }
    }
}

/// Hub counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub topics: usize,
    pub subscriptions: usize,
    /// Calls to `publish`
    pub published: u64,
    /// Successful sends across all subscribers
    pub delivered: u64,
    /// Sends that displaced an older queued message
    pub dropped: u64,
    /// Subscriptions removed by the failure policy
    pub evicted: u64,
}

/// Pluggable fan-out backend
pub trait Broadcaster: Send + Sync {
    fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionHandle, HubError>;

    /// Idempotent; returns whether a registration was removed
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool;

    /// Deliver to the current subscribers of `topic`; returns how many accepted it
    fn publish(&self, topic: &str, message: HubMessage) -> usize;

    fn stats(&self) -> HubStats;
}

struct Registration {
    subscriber: Arc<dyn Subscriber>,
    failures: AtomicU32,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<String, HashMap<SubscriptionId, Arc<Registration>>>,
    active: usize,
}

impl Registry {
    fn remove(&mut self, topic: &str, id: SubscriptionId) -> Option<Arc<Registration>> {
        let subscribers = self.topics.get_mut(topic)?;
        let removed = subscribers.remove(&id)?;
        if subscribers.is_empty() {
            self.topics.remove(topic);
        }
        self.active -= 1;
        Some(removed)
    }
}

/// In-process `Broadcaster`
pub struct BroadcastHub {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    config: HubConfig,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            config,
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Number of live subscriptions on one topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .topics
            .get(topic)
            .map_or(0, HashMap::len)
    }

    fn evict(&self, topic: &str, ids: Vec<SubscriptionId>) {
        let removed: Vec<_> = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            ids.into_iter()
                .filter_map(|id| registry.remove(topic, id).map(|reg| (id, reg)))
                .collect()
        };

        for (id, registration) in removed {
            registration.subscriber.close();
            self.evicted.fetch_add(1, Ordering::Relaxed);
            tracing::info!(topic = %topic, subscription_id = %id, "Subscriber evicted");
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Broadcaster for BroadcastHub {
    fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionHandle, HubError> {
        if topic.is_empty() {
            return Err(HubError::InvalidTopic(topic.to_string()));
        }

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.active >= self.config.max_subscriptions {
            tracing::warn!(topic = %topic, limit = self.config.max_subscriptions, "Subscription limit reached");
            return Err(HubError::TooManySubscriptions(self.config.max_subscriptions));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        registry
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(
                id,
                Arc::new(Registration {
                    subscriber,
                    failures: AtomicU32::new(0),
                }),
            );
        registry.active += 1;

        tracing::debug!(topic = %topic, subscription_id = %id, "Subscribed");
        Ok(SubscriptionHandle {
            id,
            topic: topic.to_string(),
        })
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.topic, handle.id)
            .is_some();

        if removed {
            tracing::debug!(topic = %handle.topic, subscription_id = %handle.id, "Unsubscribed");
        }
        removed
    }

    fn publish(&self, topic: &str, message: HubMessage) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot under the read lock, send outside it
        let targets: Vec<(SubscriptionId, Arc<Registration>)> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            match registry.topics.get(topic) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|(id, reg)| (*id, Arc::clone(reg)))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut to_evict = Vec::new();

        for (id, registration) in targets {
            match registration.subscriber.send(Arc::clone(&message)) {
                Ok(delivery) => {
                    registration.failures.store(0, Ordering::Relaxed);
                    delivered += 1;
                    if delivery == Delivery::DroppedOldest {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(SendError::Closed) => to_evict.push(id),
                Err(e) => {
                    let failures = registration.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        topic = %topic,
                        subscription_id = %id,
                        failures,
                        error = %e,
                        "Send to subscriber failed"
                    );
                    if failures >= self.config.max_send_failures {
                        to_evict.push(id);
                    }
                }
            }
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);

        if !to_evict.is_empty() {
            self.evict(topic, to_evict);
        }

        delivered
    }

    fn stats(&self) -> HubStats {
        let (topics, subscriptions) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            (registry.topics.len(), registry.active)
        };

        HubStats {
            topics,
            subscriptions,
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}
