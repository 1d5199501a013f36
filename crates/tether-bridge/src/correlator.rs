//! Correlating inbound requests with their responses.
//!
//! Every [`RequestEnvelope`] is dispatched on its own task so a slow handler
//! never blocks the duplex read loop. Exactly one [`ResponseEnvelope`] is
//! published per request, including when the handler fails or panics.

use std::any::Any;
use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tower::ServiceExt;
use tracing::{debug, error};

use tether_core::{RequestEnvelope, ResponseEnvelope};

use crate::dispatcher::CommandDispatcher;
use crate::outbound::OutboundBuffer;
use crate::tower_service::DispatchService;

/// Owns the in-flight request tasks of a client.
///
/// Tasks are independent of any listen loop or duplex session: a response
/// finishing after its stream ended is published into the outbound buffer
/// and goes out on whichever stream drains it next. Dropping the correlator
/// aborts every task that has not yet answered.
pub struct ResponseCorrelator {
    service: DispatchService,
    outbound: OutboundBuffer,
    tasks: JoinSet<()>,
}

impl ResponseCorrelator {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, outbound: OutboundBuffer) -> Self {
        Self {
            service: DispatchService::new(dispatcher),
            outbound,
            tasks: JoinSet::new(),
        }
    }

    /// Handle one inbound request. Returns immediately.
    pub fn on_receive(&mut self, request: RequestEnvelope) {
        self.reap();
        debug!(cmd = request.cmd, seq = request.seq, "dispatching request");

        let service = self.service.clone();
        let outbound = self.outbound.clone();
        self.tasks.spawn(async move {
            let response = respond(service, request).await;
            outbound.publish(response);
        });
    }

    /// Collect finished tasks.
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result
                && e.is_panic()
            {
                error!("response task panicked: {}", panic_message(e.into_panic()));
            }
        }
    }

    /// Requests still waiting for their response.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Abort every request still being handled. Used when the client shuts down.
    pub fn abort_all(&mut self) {
        if !self.tasks.is_empty() {
            debug!(in_flight = self.tasks.len(), "aborting in-flight requests");
        }
        self.tasks.abort_all();
    }

    /// Wait until every in-flight request has been answered.
    pub async fn wait_idle(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the dispatcher on its own task so a panic is observed as a failure.
async fn respond(service: DispatchService, request: RequestEnvelope) -> ResponseEnvelope {
    let cmd = request.cmd;
    let seq = request.seq;
    let mut handle = AbortOnDrop(tokio::spawn(service.oneshot(request)));

    match (&mut handle.0).await {
        Ok(Ok(response)) => response,
        Ok(Err(never)) => match never {},
        Err(e) => {
            let message = join_error_message(e);
            error!(cmd, seq, "command handler failed: {}", message);
            ResponseEnvelope::internal_error(&RequestEnvelope::new(cmd, seq, Vec::new()), message)
        }
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        format!("handler panicked: {}", panic_message(e.into_panic()))
    } else {
        "handler cancelled".to_string()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{CommandRouter, DispatchError};
    use std::time::Duration;
    use tether_core::{EventCategory, EventEnvelope, ResponseCode, UpstreamEnvelope};

    async fn panics(_payload: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        panic!("handler exploded");
    }

    async fn slow(payload: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(payload)
    }

    fn correlator(outbound: &OutboundBuffer) -> ResponseCorrelator {
        let router = CommandRouter::new()
            .route(1, slow)
            .route(2, panics)
            .route(3, |p: Vec<u8>| async move { Ok::<_, DispatchError>(p) });
        ResponseCorrelator::new(Arc::new(router), outbound.clone())
    }

    fn expect_response(envelope: UpstreamEnvelope) -> ResponseEnvelope {
        match envelope {
            UpstreamEnvelope::Response(r) => r,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn each_request_answered_once() {
        let outbound = OutboundBuffer::new(16);
        let mut correlator = correlator(&outbound);
        for seq in 0..5 {
            correlator.on_receive(RequestEnvelope::new(3, seq, vec![seq as u8]));
        }
        correlator.wait_idle().await;
        assert_eq!(correlator.in_flight(), 0);

        let mut drain = outbound.drain().await;
        let mut seqs = Vec::new();
        for _ in 0..5 {
            let response = expect_response(drain.next().await.unwrap());
            assert_eq!(response.payload, vec![response.seq as u8]);
            seqs.push(response.seq);
        }
        seqs.sort();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_others() {
        let outbound = OutboundBuffer::new(16);
        let mut correlator = correlator(&outbound);
        correlator.on_receive(RequestEnvelope::new(1, 100, vec![]));
        correlator.on_receive(RequestEnvelope::new(3, 101, vec![]));

        let mut drain = outbound.drain().await;
        assert_eq!(drain.next().await.unwrap().seq(), Some(101));
        assert_eq!(drain.next().await.unwrap().seq(), Some(100));
    }

    #[tokio::test]
    async fn panicking_handler_yields_internal() {
        let outbound = OutboundBuffer::new(4);
        let mut correlator = correlator(&outbound);
        correlator.on_receive(RequestEnvelope::new(2, 5, vec![1]));
        correlator.wait_idle().await;

        let mut drain = outbound.drain().await;
        let response = expect_response(drain.next().await.unwrap());
        assert_eq!(response.cmd, 2);
        assert_eq!(response.seq, 5);
        assert_eq!(response.code, ResponseCode::Internal);
        assert_eq!(response.message, "handler panicked: handler exploded");
        assert!(response.payload.is_empty());
    }

    #[tokio::test]
    async fn dropping_correlator_aborts_pending() {
        let outbound = OutboundBuffer::new(4);
        let mut correlator = correlator(&outbound);
        correlator.on_receive(RequestEnvelope::new(1, 9, vec![]));
        assert_eq!(correlator.in_flight(), 1);
        drop(correlator);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn response_delivered_when_events_fill_buffer() {
        let outbound = OutboundBuffer::new(2);
        outbound.publish(EventEnvelope::new(EventCategory::Notice, vec![1]));
        outbound.publish(EventEnvelope::new(EventCategory::Notice, vec![2]));

        let mut correlator = correlator(&outbound);
        correlator.on_receive(RequestEnvelope::new(3, 42, vec![7]));
        correlator.wait_idle().await;
        assert_eq!(outbound.dropped(), 0);

        let mut drain = outbound.drain().await;
        let response = expect_response(drain.next().await.unwrap());
        assert_eq!(response.seq, 42);
        assert_eq!(response.payload, vec![7]);
        assert!(matches!(drain.next().await, Some(UpstreamEnvelope::Event(_))));
        assert!(matches!(drain.next().await, Some(UpstreamEnvelope::Event(_))));
    }

    #[tokio::test]
    async fn abort_all_cancels_pending_requests() {
        let outbound = OutboundBuffer::new(4);
        let mut correlator = correlator(&outbound);
        correlator.on_receive(RequestEnvelope::new(1, 9, vec![]));
        correlator.abort_all();
        correlator.wait_idle().await;

        assert_eq!(correlator.in_flight(), 0);
        assert!(outbound.is_empty());
    }
}
