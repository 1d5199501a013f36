//! Calls: bidirectional message streams multiplexed on one connection.
//!
//! A [`Call`] splits into a [`CallSender`] and a [`CallReceiver`] so that the
//! two directions can be driven from different tasks. Sending is synchronous:
//! frames are queued to the connection's writer task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use tether_core::{Frame, Status};

use crate::error::TransportError;

/// Events routed by the connection read loop to one call.
#[derive(Debug)]
pub(crate) enum CallEvent {
    Message(Vec<u8>),
    HalfClose,
    Close(Status),
}

/// Per-call flags shared by the sender, the receiver and the read loop.
#[derive(Debug, Default)]
pub(crate) struct CallState {
    /// This side sent HALF_CLOSE or CLOSE.
    local_done: AtomicBool,
    /// This side sent CLOSE.
    local_closed: AtomicBool,
    /// The peer sent CLOSE, or the connection died.
    remote_closed: AtomicBool,
}

impl CallState {
    pub(crate) fn mark_remote_closed(&self) {
        self.remote_closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_local_closed(&self) -> bool {
        self.local_closed.load(Ordering::SeqCst)
    }

    fn is_finished(&self) -> bool {
        self.local_closed.load(Ordering::SeqCst) || self.remote_closed.load(Ordering::SeqCst)
    }
}

/// Routing entry for one live call.
#[derive(Clone)]
pub(crate) struct CallSlot {
    pub(crate) events: mpsc::Sender<CallEvent>,
    pub(crate) state: Arc<CallState>,
}

/// Live calls of one connection, keyed by call id.
#[derive(Default)]
pub(crate) struct CallRegistry {
    calls: Mutex<HashMap<u32, CallSlot>>,
}

impl CallRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, CallSlot>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a slot; returns `false` if the id is already in use.
    pub(crate) fn insert(&self, call_id: u32, slot: CallSlot) -> bool {
        let mut calls = self.lock();
        if calls.contains_key(&call_id) {
            return false;
        }
        calls.insert(call_id, slot);
        true
    }

    pub(crate) fn get(&self, call_id: u32) -> Option<CallSlot> {
        self.lock().get(&call_id).cloned()
    }

    pub(crate) fn remove(&self, call_id: u32) -> Option<CallSlot> {
        self.lock().remove(&call_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Remove every call. Dropping the returned slots ends their receivers.
    pub(crate) fn drain(&self) -> Vec<CallSlot> {
        self.lock().drain().map(|(_, slot)| slot).collect()
    }
}

/// Send side of a call.
#[derive(Clone)]
pub struct CallSender {
    call_id: u32,
    outbound: mpsc::UnboundedSender<Frame>,
    state: Arc<CallState>,
}

impl CallSender {
    /// Queue one message on the call.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.state.local_done.load(Ordering::SeqCst) || self.state.is_finished() {
            return Err(TransportError::CallFinished);
        }
        self.queue(Frame::message(self.call_id, payload))
    }

    /// Signal that no further messages will be sent. The call stays open for
    /// the peer's messages and final status.
    pub fn half_close(&self) -> Result<(), TransportError> {
        if self.state.local_done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.queue(Frame::half_close(self.call_id))
    }

    /// Terminate the call with `status`. Idempotent; the first status wins.
    pub fn close(&self, status: Status) -> Result<(), TransportError> {
        if self.state.local_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.local_done.store(true, Ordering::SeqCst);
        if self.state.remote_closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.queue(Frame::close(self.call_id, status))
    }

    /// Whether the call can no longer carry messages from this side.
    pub fn is_closed(&self) -> bool {
        self.state.local_done.load(Ordering::SeqCst) || self.state.is_finished()
    }

    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    fn queue(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionLost)
    }
}

/// Receive side of a call.
pub struct CallReceiver {
    call_id: u32,
    events: mpsc::Receiver<CallEvent>,
    state: Arc<CallState>,
    outbound: mpsc::UnboundedSender<Frame>,
    registry: Arc<CallRegistry>,
    cancel_on_drop: bool,
    finished: bool,
}

impl CallReceiver {
    /// Wait for the next message from the peer.
    ///
    /// Returns `Ok(None)` when the peer half-closes or closes with an OK
    /// status, `Err(TransportError::Status)` when it closes with any other
    /// status, and `Err(TransportError::ConnectionLost)` when the connection
    /// dies first. After the call has ended every further call returns
    /// `Ok(None)`.
    pub async fn message(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.finished {
            return Ok(None);
        }
        match self.events.recv().await {
            Some(CallEvent::Message(payload)) => Ok(Some(payload)),
            Some(CallEvent::HalfClose) => Ok(None),
            Some(CallEvent::Close(status)) => {
                self.finished = true;
                if status.is_ok() {
                    Ok(None)
                } else {
                    Err(TransportError::Status(status))
                }
            }
            None => {
                self.finished = true;
                if self.state.is_local_closed() {
                    Ok(None)
                } else {
                    Err(TransportError::ConnectionLost)
                }
            }
        }
    }

    /// Whether the call has ended (peer closed, connection lost, or closed locally).
    pub fn is_finished(&self) -> bool {
        self.finished || self.state.is_finished()
    }

    pub fn call_id(&self) -> u32 {
        self.call_id
    }
}

impl Drop for CallReceiver {
    fn drop(&mut self) {
        self.registry.remove(self.call_id);
        if self.cancel_on_drop && !self.state.is_finished() {
            self.state.local_closed.store(true, Ordering::SeqCst);
            debug!(call_id = self.call_id, "cancelling call on drop");
            let _ = self
                .outbound
                .send(Frame::close(self.call_id, Status::cancelled("call dropped")));
        }
    }
}

/// An open call.
pub struct Call {
    method: String,
    sender: CallSender,
    receiver: CallReceiver,
}

impl Call {
    /// Create a call and register it with `registry`. Returns `None` if the id
    /// is already in use.
    pub(crate) fn register(
        call_id: u32,
        method: String,
        outbound: mpsc::UnboundedSender<Frame>,
        registry: Arc<CallRegistry>,
        buffer: usize,
        cancel_on_drop: bool,
    ) -> Option<Self> {
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let state = Arc::new(CallState::default());
        let slot = CallSlot {
            events: events_tx,
            state: Arc::clone(&state),
        };
        if !registry.insert(call_id, slot) {
            return None;
        }

        Some(Self {
            method,
            sender: CallSender {
                call_id,
                outbound: outbound.clone(),
                state: Arc::clone(&state),
            },
            receiver: CallReceiver {
                call_id,
                events: events_rx,
                state,
                outbound,
                registry,
                cancel_on_drop,
                finished: false,
            },
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn call_id(&self) -> u32 {
        self.sender.call_id
    }

    pub fn sender(&self) -> &CallSender {
        &self.sender
    }

    pub fn split(self) -> (CallSender, CallReceiver) {
        (self.sender, self.receiver)
    }
}
