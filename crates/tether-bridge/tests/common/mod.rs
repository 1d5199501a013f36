//! A fake remote controller for end-to-end bridge tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use tether_core::constants::{DUPLEX_METHOD, PUBLISH_METHOD};
use tether_core::{
    EventCategory, EventEnvelope, Metadata, RegisterRequest, RequestEnvelope, ResponseEnvelope,
    Status, UpstreamEnvelope,
};
use tether_transport::{
    CallReceiver, CallSender, Endpoint, Router, Server, ServerCall, ServerConfig, TransportError,
};

/// Fail the test if `fut` takes longer than five seconds.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

/// The controller's side of one duplex call.
pub struct DuplexPeer {
    pub headers: Metadata,
    sender: CallSender,
    receiver: CallReceiver,
    end: Option<oneshot::Sender<()>>,
}

impl DuplexPeer {
    pub fn send_request(&self, cmd: u32, seq: u32, payload: Vec<u8>) {
        self.sender
            .send(RequestEnvelope::new(cmd, seq, payload).to_msgpack())
            .unwrap();
    }

    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.sender.send(bytes).unwrap();
    }

    pub async fn next_upstream(&mut self) -> UpstreamEnvelope {
        let bytes = within(self.receiver.message())
            .await
            .unwrap()
            .expect("duplex stream ended");
        UpstreamEnvelope::from_msgpack(&bytes).unwrap()
    }

    pub async fn next_response(&mut self) -> ResponseEnvelope {
        match self.next_upstream().await {
            UpstreamEnvelope::Response(r) => r,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    pub async fn next_event(&mut self) -> EventEnvelope {
        match self.next_upstream().await {
            UpstreamEnvelope::Event(e) => e,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    /// Wait for the bridge to end the call and return how it ended.
    pub async fn closed(&mut self) -> Result<(), TransportError> {
        loop {
            match within(self.receiver.message()).await {
                Ok(Some(_)) => continue,
                Ok(None) if !self.receiver.is_finished() => continue,
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// End the call from the controller side with an OK status.
    pub fn end(mut self) {
        if let Some(end) = self.end.take() {
            let _ = end.send(());
        }
    }
}

/// Something that happened on a publish call.
#[derive(Debug)]
pub enum Published {
    Registered {
        headers: Metadata,
        category: EventCategory,
    },
    Event(EventEnvelope),
}

/// A controller that accepts duplex and publish calls from a bridge.
pub struct FakeController {
    server: Server,
    endpoint: Endpoint,
    duplex_rx: mpsc::UnboundedReceiver<DuplexPeer>,
    published_rx: mpsc::UnboundedReceiver<Published>,
    duplex_opens: Arc<AtomicUsize>,
}

impl FakeController {
    /// A controller that hands every duplex call to the test.
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// A controller that fails every duplex call with `Unavailable`.
    pub async fn start_rejecting() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(reject: bool) -> Self {
        let (duplex_tx, duplex_rx) = mpsc::unbounded_channel();
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let duplex_opens = Arc::new(AtomicUsize::new(0));

        let opens = Arc::clone(&duplex_opens);
        let router = Router::new()
            .route(DUPLEX_METHOD, move |call: ServerCall| {
                let duplex_tx = duplex_tx.clone();
                let opens = Arc::clone(&opens);
                async move {
                    opens.fetch_add(1, Ordering::SeqCst);
                    if reject {
                        return Err(Status::unavailable("controller rejecting streams"));
                    }
                    let headers = call.headers().clone();
                    let (sender, receiver) = call.split();
                    let (end_tx, end_rx) = oneshot::channel();
                    let peer = DuplexPeer {
                        headers,
                        sender,
                        receiver,
                        end: Some(end_tx),
                    };
                    if duplex_tx.send(peer).is_err() {
                        return Ok(());
                    }
                    let _ = end_rx.await;
                    Ok::<(), Status>(())
                }
            })
            .route(PUBLISH_METHOD, move |call: ServerCall| {
                let published_tx = published_tx.clone();
                async move { relay_publish(call, published_tx).await }
            });

        let server = Server::new(
            ServerConfig::new("fake-controller", "127.0.0.1:0".parse().unwrap()),
            router,
        );
        server.start().await.unwrap();
        let endpoint = Endpoint::from(server.local_addr().unwrap());

        Self {
            server,
            endpoint,
            duplex_rx,
            published_rx,
            duplex_opens,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// How many duplex calls have been opened so far.
    pub fn duplex_opens(&self) -> usize {
        self.duplex_opens.load(Ordering::SeqCst)
    }

    pub async fn next_duplex(&mut self) -> DuplexPeer {
        within(self.duplex_rx.recv())
            .await
            .expect("controller stopped")
    }

    /// Whether a duplex call arrives within `wait`.
    pub async fn duplex_within(&mut self, wait: Duration) -> Option<DuplexPeer> {
        tokio::time::timeout(wait, self.duplex_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn next_published(&mut self) -> Published {
        within(self.published_rx.recv())
            .await
            .expect("controller stopped")
    }

    /// Wait for the registration of `category`, skipping others.
    pub async fn registered(&mut self, category: EventCategory) -> Metadata {
        loop {
            if let Published::Registered {
                headers,
                category: c,
            } = self.next_published().await
                && c == category
            {
                return headers;
            }
        }
    }

    /// Wait for the next published event, skipping registrations.
    pub async fn next_published_event(&mut self) -> EventEnvelope {
        loop {
            if let Published::Event(event) = self.next_published().await {
                return event;
            }
        }
    }

    pub async fn stop(self) {
        self.server.stop().await;
    }
}

async fn relay_publish(
    call: ServerCall,
    published_tx: mpsc::UnboundedSender<Published>,
) -> Result<(), Status> {
    let headers = call.headers().clone();
    let (_sender, mut receiver) = call.split();

    let first = receiver
        .message()
        .await
        .map_err(|e| Status::internal(e.to_string()))?
        .ok_or_else(|| Status::invalid_argument("missing register request"))?;
    let register = RegisterRequest::from_msgpack(&first)
        .map_err(|e| Status::invalid_argument(e.to_string()))?;
    let _ = published_tx.send(Published::Registered {
        headers,
        category: register.category,
    });

    while let Ok(Some(bytes)) = receiver.message().await {
        if let Ok(event) = EventEnvelope::from_msgpack(&bytes) {
            let _ = published_tx.send(Published::Event(event));
        }
    }
    Ok(())
}
