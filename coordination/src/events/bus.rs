//! Message bus for swarm coordination
//!
//! Two collaborators sit behind [`MessageBus`]:
//!
//! - a [`SubscriberRegistry`] of per-type handlers, invoked synchronously and
//!   in registration order on every publish, and
//! - a Tokio broadcast channel carrying every published message to observers
//!   that want the whole stream regardless of type.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error};

use super::types::{MessagePayload, MessageType, SwarmMessage};
use crate::error::SwarmResult;

/// Channel capacity for the observer broadcast
const CHANNEL_CAPACITY: usize = 256;

/// A subscriber callback.
///
/// Returning `Err` (or panicking) is logged and does not affect delivery to
/// the remaining handlers.
pub type Handler = Arc<dyn Fn(&SwarmMessage) -> anyhow::Result<()> + Send + Sync>;

type SubscriptionId = u64;

#[derive(Default)]
struct RegistryInner {
    next_id: SubscriptionId,
    handlers: HashMap<MessageType, Vec<(SubscriptionId, Handler)>>,
}

/// Per-type handler lists
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<RegistryInner>,
}

impl SubscriberRegistry {
    fn add(&self, message_type: MessageType, handler: Handler) -> SubscriptionId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .handlers
            .entry(message_type)
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, message_type: MessageType, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let Some(list) = inner.handlers.get_mut(&message_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            inner.handlers.remove(&message_type);
        }
        removed
    }

    fn contains(&self, message_type: MessageType, id: SubscriptionId) -> bool {
        self.inner
            .lock()
            .handlers
            .get(&message_type)
            .is_some_and(|list| list.iter().any(|(sid, _)| *sid == id))
    }

    /// Snapshot of the handlers for a type, in registration order
    fn handlers(&self, message_type: MessageType) -> Vec<(SubscriptionId, Handler)> {
        self.inner
            .lock()
            .handlers
            .get(&message_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered for a type
    pub fn count(&self, message_type: MessageType) -> usize {
        self.inner
            .lock()
            .handlers
            .get(&message_type)
            .map_or(0, Vec::len)
    }

    /// Total number of handlers across all types
    pub fn total(&self) -> usize {
        self.inner.lock().handlers.values().map(Vec::len).sum()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.inner.lock().handlers.clear();
    }
}

/// Handle for one handler registration
#[derive(Clone)]
pub struct Subscription {
    registry: Weak<SubscriberRegistry>,
    message_type: MessageType,
    id: SubscriptionId,
}

impl Subscription {
    /// Remove this registration.
    ///
    /// Idempotent: returns `true` only on the call that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.message_type, self.id),
            None => false,
        }
    }

    /// Whether this registration is still live
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|r| r.contains(self.message_type, self.id))
    }

    /// The channel this subscription listens on
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("message_type", &self.message_type)
            .field("id", &self.id)
            .finish()
    }
}

/// Typed pub/sub hub with an observer stream
pub struct MessageBus {
    registry: Arc<SubscriberRegistry>,
    observer: broadcast::Sender<SwarmMessage>,
}

impl MessageBus {
    /// Create a bus whose observer channel buffers `observer_capacity` messages
    pub fn new(observer_capacity: usize) -> Self {
        let (observer, _) = broadcast::channel(observer_capacity.max(1));
        Self {
            registry: Arc::new(SubscriberRegistry::default()),
            observer,
        }
    }

    /// Register a handler for every future publish of `message_type`
    pub fn subscribe<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&SwarmMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.add(message_type, Arc::new(handler));
        debug!(message_type = %message_type, subscription = id, "Subscribed");
        Subscription {
            registry: Arc::downgrade(&self.registry),
            message_type,
            id,
        }
    }

    /// Subscribe by type name from an untyped boundary.
    ///
    /// Unknown names fail with [`SwarmError::InvalidMessageType`] and
    /// register nothing.
    ///
    /// [`SwarmError::InvalidMessageType`]: crate::error::SwarmError::InvalidMessageType
    pub fn subscribe_json<F>(&self, message_type: &str, handler: F) -> SwarmResult<Subscription>
    where
        F: Fn(&SwarmMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let message_type: MessageType = message_type.parse()?;
        Ok(self.subscribe(message_type, handler))
    }

    /// Publish a message to all current subscribers of its type.
    ///
    /// Delivery is synchronous and at-most-once per handler. Handlers run
    /// without the registry lock held, so they may publish or (un)subscribe.
    pub fn publish(&self, payload: MessagePayload) -> SwarmMessage {
        let message = SwarmMessage::new(payload);
        let message_type = message.message_type();

        let handlers = self.registry.handlers(message_type);
        let mut delivered = 0usize;
        for (id, handler) in handlers {
            // Skip registrations removed by an earlier handler in this publish
            if !self.registry.contains(message_type, id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!(
                        message_type = %message_type,
                        message_id = %message.id,
                        subscription = id,
                        "Subscriber handler failed: {:#}",
                        e
                    );
                }
                Err(_) => {
                    error!(
                        message_type = %message_type,
                        message_id = %message.id,
                        subscription = id,
                        "Subscriber handler panicked"
                    );
                }
            }
        }

        // No observers is fine
        let observers = self.observer.send(message.clone()).unwrap_or(0);
        debug!(
            message_type = %message_type,
            message_id = %message.id,
            delivered,
            observers,
            "Message published"
        );

        message
    }

    /// Publish from an untyped boundary (HTTP handlers, the CLI)
    pub fn publish_json(
        &self,
        message_type: &str,
        payload: serde_json::Value,
    ) -> SwarmResult<SwarmMessage> {
        let payload = MessagePayload::from_json(message_type, payload)?;
        Ok(self.publish(payload))
    }

    /// Receive every published message, whatever its type
    pub fn observe(&self) -> broadcast::Receiver<SwarmMessage> {
        self.observer.subscribe()
    }

    /// Number of handlers registered for a type
    pub fn subscriber_count(&self, message_type: MessageType) -> usize {
        self.registry.count(message_type)
    }

    /// Total number of handler registrations
    pub fn total_subscribers(&self) -> usize {
        self.registry.total()
    }

    /// Drop every handler registration
    pub fn clear(&self) {
        self.registry.clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}
