//! Event producers feeding the bridge.
//!
//! A host application exposes its event streams through [`EventSource`]: one
//! push-style subscription point per category. A [`Subscription`] revokes
//! itself when dropped. [`EventBus`] is an in-process implementation backed
//! by tokio broadcast channels.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use tether_core::EventCategory;

use crate::error::BridgeError;

/// Default per-category buffer of an [`EventBus`].
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A live subscription to one event category.
#[derive(Debug)]
pub struct Subscription {
    category: EventCategory,
    rx: broadcast::Receiver<Vec<u8>>,
}

impl Subscription {
    pub fn new(category: EventCategory, rx: broadcast::Receiver<Vec<u8>>) -> Self {
        Self { category, rx }
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// Next event payload, or `None` once the producer is gone.
    ///
    /// A subscriber that falls behind skips the overwritten events.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        category = %self.category,
                        skipped, "event subscriber lagged, events skipped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Source of the four event streams relayed by the bridge.
pub trait EventSource: Send + Sync + 'static {
    fn on_message(&self) -> Subscription;

    fn on_notice(&self) -> Subscription;

    fn on_request(&self) -> Subscription;

    /// Core events have no producer unless the host wires one.
    fn on_core_event(&self) -> Option<Subscription> {
        None
    }

    /// Subscribe by category.
    ///
    /// `Ok(None)` means the category is valid but has no producer.
    fn subscribe(&self, category: EventCategory) -> Result<Option<Subscription>, BridgeError> {
        match category {
            EventCategory::Message => Ok(Some(self.on_message())),
            EventCategory::Notice => Ok(Some(self.on_notice())),
            EventCategory::Request => Ok(Some(self.on_request())),
            EventCategory::CoreEvent => Ok(self.on_core_event()),
            EventCategory::Unrecognized(_) => Err(BridgeError::InvalidCategory(category)),
        }
    }
}

/// In-process [`EventSource`] that hosts publish into.
#[derive(Debug, Clone)]
pub struct EventBus {
    message: broadcast::Sender<Vec<u8>>,
    notice: broadcast::Sender<Vec<u8>>,
    request: broadcast::Sender<Vec<u8>>,
    core_event: Option<broadcast::Sender<Vec<u8>>>,
    capacity: usize,
}

impl EventBus {
    /// A bus without a core event producer.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            message: broadcast::channel(capacity).0,
            notice: broadcast::channel(capacity).0,
            request: broadcast::channel(capacity).0,
            core_event: None,
            capacity,
        }
    }

    /// Wire a core event producer into the bus.
    pub fn with_core_events(mut self) -> Self {
        self.core_event = Some(broadcast::channel(self.capacity).0);
        self
    }

    fn sender(&self, category: EventCategory) -> Option<&broadcast::Sender<Vec<u8>>> {
        match category {
            EventCategory::Message => Some(&self.message),
            EventCategory::Notice => Some(&self.notice),
            EventCategory::Request => Some(&self.request),
            EventCategory::CoreEvent => self.core_event.as_ref(),
            EventCategory::Unrecognized(_) => None,
        }
    }

    /// Fire an event. Returns how many subscribers received it.
    pub fn publish(&self, category: EventCategory, payload: Vec<u8>) -> usize {
        self.sender(category)
            .and_then(|tx| tx.send(payload).ok())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, category: EventCategory) -> usize {
        self.sender(category)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSource for EventBus {
    fn on_message(&self) -> Subscription {
        Subscription::new(EventCategory::Message, self.message.subscribe())
    }

    fn on_notice(&self) -> Subscription {
        Subscription::new(EventCategory::Notice, self.notice.subscribe())
    }

    fn on_request(&self) -> Subscription {
        Subscription::new(EventCategory::Request, self.request.subscribe())
    }

    fn on_core_event(&self) -> Option<Subscription> {
        self.core_event
            .as_ref()
            .map(|tx| Subscription::new(EventCategory::CoreEvent, tx.subscribe()))
    }
}
