//! Bounded per-connection outbound queue
//!
//! Each live connection owns one `OutboundQueue`. The hub pushes into it
//! without blocking; the transport's writer task drains it with `recv`.
//! When full, the oldest message is dropped to make room for the newest.
//!
//! Replies to the connection's own client (`pong`, `error`, the connect
//! confirmation) travel in a separate control lane that `recv` drains first,
//! so a burst of broadcasts can never displace them.

use crate::broadcast::hub::{Delivery, SendError, Subscriber};
use crate::broadcast::messages::HubMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct QueueState<T> {
    control: VecDeque<T>,
    messages: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO with drop-oldest overflow
pub struct OutboundQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> OutboundQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                control: VecDeque::new(),
                messages: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue without blocking. Fails only once the queue is closed.
    pub fn push(&self, item: T) -> Result<Delivery, SendError> {
        self.enqueue(item, |state| &mut state.messages)
    }

    /// Enqueue on the control lane, ahead of every pending broadcast.
    ///
    /// The lane has the same capacity and overflow rule as the main one.
    pub fn push_control(&self, item: T) -> Result<Delivery, SendError> {
        self.enqueue(item, |state| &mut state.control)
    }

    fn enqueue(
        &self,
        item: T,
        lane: impl FnOnce(&mut QueueState<T>) -> &mut VecDeque<T>,
    ) -> Result<Delivery, SendError> {
        let delivery = {
            let mut state = self.lock();
            if state.closed {
                return Err(SendError::Closed);
            }

            let pending = lane(&mut *state);
            let delivery = if pending.len() >= self.capacity {
                pending.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::DroppedOldest
            } else {
                Delivery::Queued
            };
            pending.push_back(item);
            delivery
        };

        self.notify.notify_one();
        Ok(delivery)
    }

    /// Wait for the next message. Returns `None` once the queue is closed.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.control.pop_front() {
                    return Some(item);
                }
                if let Some(item) = state.messages.pop_front() {
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue, discarding anything still pending and waking the reader
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.control.clear();
            state.messages.clear();
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        let state = self.lock();
        state.control.len() + state.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages discarded to make room since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Subscriber for OutboundQueue<HubMessage> {
    fn send(&self, message: HubMessage) -> Result<Delivery, SendError> {
        self.push(message)
    }

    fn close(&self) {
        OutboundQueue::close(self)
    }
}
