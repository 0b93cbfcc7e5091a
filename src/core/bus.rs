//! Topic-based publish/subscribe bus with bounded per-subscriber queues
//!
//! Every subscriber owns its own bounded queue. `publish` never blocks and
//! never fails: when a queue is full the bus applies its
//! [`BackpressurePolicy`] to that queue only, so a slow consumer can never
//! stall the pipeline or starve other subscribers.
//!
//! `tokio::sync::broadcast` is not used here because its lagging receivers
//! lose their position in the stream; the drop policies below keep each
//! subscriber's queue coherent instead.
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new(256, BackpressurePolicy::DropOldest);
//! let alerts = bus.subscribe("alerts");
//! bus.publish("alerts", "kill switch engaged".to_string());
//! assert_eq!(alerts.recv().await.as_deref(), Some("kill switch engaged"));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::core::events::Event;

/// Default per-subscriber queue capacity
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Bus carrying the engine's pipeline events
pub type SharedEventBus = Arc<EventBus<Event>>;

/// What a full subscriber queue does with a new message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Evict the oldest buffered message to admit the new one
    #[default]
    DropOldest,
    /// Discard the incoming message
    DropNewest,
}

// =============================================================================
// Subscriber queue
// =============================================================================

#[derive(Debug)]
struct SubscriberQueue<T> {
    id: u64,
    buffer: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> SubscriberQueue<T> {
    fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a message; returns true if it was buffered
    fn offer(&self, message: T, policy: BackpressurePolicy) -> bool {
        let admitted = {
            let mut buffer = self.buffer();
            if buffer.len() < self.capacity {
                buffer.push_back(message);
                true
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match policy {
                    BackpressurePolicy::DropOldest => {
                        buffer.pop_front();
                        buffer.push_back(message);
                        true
                    }
                    BackpressurePolicy::DropNewest => false,
                }
            }
        };
        if admitted {
            self.notify.notify_one();
        }
        admitted
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Subscription handle
// =============================================================================

/// Handle owning one subscriber queue
///
/// Dropping the handle closes the queue; the bus prunes closed queues on the
/// next subscriber-set mutation.
#[derive(Debug)]
pub struct Subscription<T> {
    topic: String,
    queue: Arc<SubscriberQueue<T>>,
}

impl<T> Subscription<T> {
    /// Topic this subscription is registered under
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Unique subscriber id within the bus
    pub fn id(&self) -> u64 {
        self.queue.id
    }

    /// Pop the oldest buffered message without waiting
    pub fn try_recv(&self) -> Option<T> {
        self.queue.buffer().pop_front()
    }

    /// Await the next message
    ///
    /// Returns `None` once the subscription has been unsubscribed and its
    /// queue is drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(message) = self.try_recv() {
                return Some(message);
            }
            if self.queue.is_closed() {
                return None;
            }
            // notify_one stores a permit when nobody is waiting, so a publish
            // between try_recv and here is not lost.
            self.queue.notify.notified().await;
        }
    }

    /// Drain every buffered message
    pub fn drain(&self) -> Vec<T> {
        self.queue.buffer().drain(..).collect()
    }

    /// Number of buffered messages
    pub fn len(&self) -> usize {
        self.queue.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages lost to the backpressure policy so far
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// True once unsubscribed
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.queue.close();
    }
}

// =============================================================================
// EventBus
// =============================================================================

/// Bounded, topic-based publish/subscribe router
#[derive(Debug)]
pub struct EventBus<T> {
    topics: Mutex<HashMap<String, Vec<Arc<SubscriberQueue<T>>>>>,
    capacity: usize,
    policy: BackpressurePolicy,
    next_id: AtomicU64,
}

impl<T: Clone + Send> EventBus<T> {
    /// Create a bus whose subscriber queues hold at most `capacity` messages
    ///
    /// A zero capacity is raised to 1.
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            policy,
            next_id: AtomicU64::new(1),
        }
    }

    /// Wrap in an `Arc` for sharing across tasks
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<SubscriberQueue<T>>>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh bounded queue under `topic`
    ///
    /// Messages published before this call are never delivered to it.
    pub fn subscribe(&self, topic: &str) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(id, self.capacity));

        let mut topics = self.topics();
        let subscribers = topics.entry(topic.to_string()).or_default();
        subscribers.retain(|q| !q.is_closed());
        subscribers.push(Arc::clone(&queue));
        debug!(topic = %topic, subscriber = id, total = subscribers.len(), "[BUS] Subscribed");

        Subscription {
            topic: topic.to_string(),
            queue,
        }
    }

    /// Remove a subscription from `topic` and close its queue
    ///
    /// Returns false if the handle was not registered under `topic`.
    pub fn unsubscribe(&self, topic: &str, subscription: &Subscription<T>) -> bool {
        let mut topics = self.topics();
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };

        let removed = subscribers.iter().any(|q| q.id == subscription.id());
        subscribers.retain(|q| q.id != subscription.id() && !q.is_closed());
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        drop(topics);

        if subscription.topic == topic {
            subscription.queue.close();
        }
        debug!(topic = %topic, subscriber = subscription.id(), removed, "[BUS] Unsubscribed");
        removed
    }

    /// Offer `message` to every current subscriber of `topic`
    ///
    /// The subscriber set is snapshotted under the lock and delivery happens
    /// after it is released. Returns how many queues admitted the message.
    pub fn publish(&self, topic: &str, message: T) -> usize {
        let snapshot: Vec<Arc<SubscriberQueue<T>>> = match self.topics().get(topic) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for queue in snapshot.iter().filter(|q| !q.is_closed()) {
            if queue.offer(message.clone(), self.policy) {
                delivered += 1;
            }
        }
        trace!(topic = %topic, delivered, "[BUS] Published");
        delivered
    }

    /// Number of live subscribers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|subs| subs.iter().filter(|q| !q.is_closed()).count())
            .unwrap_or(0)
    }
}

impl EventBus<Event> {
    /// Publish a pipeline event on its own topic
    pub fn emit(&self, event: Event) -> usize {
        let topic = event.topic();
        self.publish(topic, event)
    }
}

impl<T: Clone + Send> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY, BackpressurePolicy::default())
    }
}
