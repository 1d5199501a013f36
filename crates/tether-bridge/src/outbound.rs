//! The shared outbound buffer drained by the active duplex stream.
//!
//! Many producers (correlator tasks, duplex-routed events) publish
//! [`UpstreamEnvelope`]s; one consumer at a time drains them. Responses and
//! events travel in separate lanes. The response lane always accepts, so a
//! correlated response is never lost to backpressure; it is bounded in
//! practice by the number of requests in flight. The event lane is bounded
//! and drops the newest event when full. The buffer outlives individual
//! duplex sessions, so envelopes published while disconnected are delivered
//! after the next reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::warn;

use tether_core::{EventEnvelope, ResponseEnvelope, UpstreamEnvelope};

/// Default number of events the buffer holds.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Consumer side, held by at most one drain at a time.
struct Lanes {
    /// An envelope a session took but failed to send; goes out first.
    retained: Option<UpstreamEnvelope>,
    responses: mpsc::UnboundedReceiver<ResponseEnvelope>,
    events: mpsc::Receiver<EventEnvelope>,
}

struct OutboundInner {
    responses: mpsc::UnboundedSender<ResponseEnvelope>,
    events: mpsc::Sender<EventEnvelope>,
    lanes: Arc<Mutex<Lanes>>,
    capacity: usize,
    pending_responses: AtomicUsize,
    dropped: AtomicU64,
}

/// Multi-producer queue of envelopes headed upstream.
#[derive(Clone)]
pub struct OutboundBuffer {
    inner: Arc<OutboundInner>,
}

impl OutboundBuffer {
    /// A buffer holding up to `capacity` events. Responses are not limited.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (responses, response_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(OutboundInner {
                responses,
                events,
                lanes: Arc::new(Mutex::new(Lanes {
                    retained: None,
                    responses: response_rx,
                    events: event_rx,
                })),
                capacity,
                pending_responses: AtomicUsize::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue an envelope without waiting. Returns `false` if it was dropped.
    ///
    /// Responses are always accepted. Events are dropped when the event lane
    /// is full.
    pub fn publish(&self, envelope: impl Into<UpstreamEnvelope>) -> bool {
        match envelope.into() {
            UpstreamEnvelope::Response(response) => {
                self.inner.pending_responses.fetch_add(1, Ordering::SeqCst);
                if self.inner.responses.send(response).is_err() {
                    // The buffer owns the receiver, so this cannot happen while it lives.
                    self.inner.pending_responses.fetch_sub(1, Ordering::SeqCst);
                    return false;
                }
                true
            }
            UpstreamEnvelope::Event(event) => match self.inner.events.try_send(event) {
                Ok(()) => true,
                Err(e) => {
                    let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    let category = e.into_inner().category;
                    warn!(
                        capacity = self.inner.capacity,
                        dropped,
                        %category,
                        "outbound buffer full, dropping event"
                    );
                    false
                }
            },
        }
    }

    /// Take the consumer side. Waits while another drain is held, so only
    /// one session relays at a time.
    pub async fn drain(&self) -> OutboundDrain {
        OutboundDrain {
            lanes: Arc::clone(&self.inner.lanes).lock_owned().await,
            inner: Arc::clone(&self.inner),
        }
    }

    /// How many events were dropped because the event lane was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Envelopes currently waiting, not counting a retained one.
    pub fn len(&self) -> usize {
        let events = self.inner.capacity - self.inner.events.capacity();
        events + self.inner.pending_responses.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the event lane.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for OutboundBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

/// Exclusive consumer handle returned by [`OutboundBuffer::drain`].
pub struct OutboundDrain {
    lanes: OwnedMutexGuard<Lanes>,
    inner: Arc<OutboundInner>,
}

impl OutboundDrain {
    /// Next envelope, waiting until one is published.
    ///
    /// A retained envelope comes first, then responses ahead of events. Each
    /// lane is FIFO. The buffer holds its own senders, so this only returns
    /// `None` if the buffer itself is gone.
    pub async fn next(&mut self) -> Option<UpstreamEnvelope> {
        if let Some(envelope) = self.lanes.retained.take() {
            return Some(envelope);
        }
        let lanes = &mut *self.lanes;
        tokio::select! {
            biased;
            Some(response) = lanes.responses.recv() => {
                self.inner.pending_responses.fetch_sub(1, Ordering::SeqCst);
                Some(response.into())
            }
            Some(event) = lanes.events.recv() => Some(event.into()),
            else => None,
        }
    }

    /// Hand back an envelope that could not be sent. The next drain, in
    /// this session or the next one, yields it before anything else.
    pub fn retain(&mut self, envelope: UpstreamEnvelope) {
        self.lanes.retained = Some(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_core::{EventCategory, RequestEnvelope};

    fn response(seq: u32) -> ResponseEnvelope {
        ResponseEnvelope::success(&RequestEnvelope::new(1, seq, Vec::new()), Vec::new())
    }

    fn notice(byte: u8) -> EventEnvelope {
        EventEnvelope::new(EventCategory::Notice, vec![byte])
    }

    #[tokio::test]
    async fn fifo_per_producer() {
        let buffer = OutboundBuffer::new(8);
        for seq in 0..3 {
            assert!(buffer.publish(response(seq)));
        }
        assert_eq!(buffer.len(), 3);

        let mut drain = buffer.drain().await;
        for seq in 0..3 {
            assert_eq!(drain.next().await.unwrap().seq(), Some(seq));
        }
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn full_buffer_drops_newest_event() {
        let buffer = OutboundBuffer::new(2);
        assert!(buffer.publish(notice(1)));
        assert!(buffer.publish(notice(2)));
        assert!(!buffer.publish(notice(3)));
        assert_eq!(buffer.dropped(), 1);

        let mut drain = buffer.drain().await;
        assert_eq!(drain.next().await, Some(notice(1).into()));
        assert_eq!(drain.next().await, Some(notice(2).into()));
        assert!(buffer.publish(notice(4)));
    }

    #[tokio::test]
    async fn full_event_lane_never_drops_responses() {
        let buffer = OutboundBuffer::new(2);
        buffer.publish(notice(1));
        buffer.publish(notice(2));
        assert!(buffer.publish(response(42)));
        assert_eq!(buffer.dropped(), 0);
        assert_eq!(buffer.len(), 3);

        let mut drain = buffer.drain().await;
        assert_eq!(drain.next().await.unwrap().seq(), Some(42));
        assert_eq!(drain.next().await, Some(notice(1).into()));
        assert_eq!(drain.next().await, Some(notice(2).into()));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn retained_envelope_goes_first_in_next_drain() {
        let buffer = OutboundBuffer::new(4);
        buffer.publish(response(1));
        buffer.publish(response(2));

        let mut drain = buffer.drain().await;
        let first = drain.next().await.unwrap();
        drain.retain(first);
        drop(drain);

        let mut next = buffer.drain().await;
        assert_eq!(next.next().await.unwrap().seq(), Some(1));
        assert_eq!(next.next().await.unwrap().seq(), Some(2));
    }

    #[tokio::test]
    async fn envelopes_survive_consumer_turnover() {
        let buffer = OutboundBuffer::new(4);
        let drain = buffer.drain().await;
        buffer.publish(response(10));
        drop(drain);

        let mut next = buffer.drain().await;
        assert_eq!(next.next().await.unwrap().seq(), Some(10));
    }

    #[tokio::test]
    async fn second_drain_waits_for_first() {
        let buffer = OutboundBuffer::new(4);
        let first = buffer.drain().await;

        let waiting = tokio::time::timeout(Duration::from_millis(50), buffer.drain()).await;
        assert!(waiting.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), buffer.drain()).await;
        assert!(second.is_ok());
    }
}
