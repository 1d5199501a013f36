//! The bridge client: channel lifecycle and the listen loop.
//!
//! [`BridgeClient`] owns at most one live [`Channel`] to the controller.
//! `start` (re)builds it, `listen` runs the reconnect supervisor over it, and
//! `close` tears it down. Channel setup failures are logged, never returned:
//! the host drives the client and keeps running without a usable channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use tether_transport::{Channel, ChannelBuilder, Endpoint};

use crate::config::EventRoute;
use crate::correlator::ResponseCorrelator;
use crate::dispatcher::CommandDispatcher;
use crate::error::{BridgeError, diagnostic};
use crate::event_source::EventSource;
use crate::identity::{Identity, IdentityHeaders};
use crate::outbound::{DEFAULT_OUTBOUND_CAPACITY, OutboundBuffer};
use crate::registrar::EventRegistrar;
use crate::supervisor::{self, ListenState};

/// Default pause between duplex stream attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15);

/// Everything needed to reach and identify with the controller.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: Endpoint,
    pub identity: Identity,
    pub connect_timeout: Duration,
    /// Extra connection attempts made by the transport; 0 disables them.
    pub transport_retries: u32,
    pub transport_retry_delay: Duration,
    pub backoff: Duration,
    pub outbound_capacity: usize,
    pub event_route: EventRoute,
}

impl ClientOptions {
    pub fn new(endpoint: Endpoint, identity: Identity) -> Self {
        Self {
            endpoint,
            identity,
            connect_timeout: tether_transport::DEFAULT_CONNECT_TIMEOUT,
            transport_retries: tether_transport::DEFAULT_CONNECT_RETRIES,
            transport_retry_delay: tether_transport::DEFAULT_RETRY_DELAY,
            backoff: DEFAULT_BACKOFF,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            event_route: EventRoute::default(),
        }
    }
}

/// State shared between the client handle and its listen task.
pub(crate) struct ClientShared {
    pub(crate) options: ClientOptions,
    pub(crate) identity_headers: IdentityHeaders,
    channel: Mutex<Option<Channel>>,
    pub(crate) outbound: OutboundBuffer,
    pub(crate) registrar: EventRegistrar,
    /// In-flight requests; outlives every listen loop and session.
    correlator: Mutex<ResponseCorrelator>,
    state: watch::Sender<ListenState>,
    attempts: AtomicU64,
}

impl ClientShared {
    fn slot(&self) -> MutexGuard<'_, Option<Channel>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current channel, unless there is none or it was shut down.
    pub(crate) fn channel(&self) -> Option<Channel> {
        self.slot()
            .as_ref()
            .filter(|channel| !channel.is_shutdown())
            .cloned()
    }

    pub(crate) fn correlator(&self) -> MutexGuard<'_, ResponseCorrelator> {
        self.correlator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ListenState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("listen state {} -> {}", previous, state);
        }
    }

    /// Count a duplex attempt, returning its 1-based number.
    pub(crate) fn record_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Auto-reconnecting bridge to a remote controller.
pub struct BridgeClient {
    shared: Arc<ClientShared>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    /// Create a client. Nothing connects until [`start`](Self::start) and
    /// [`listen`](Self::listen) are called.
    pub fn new(
        options: ClientOptions,
        source: Arc<dyn EventSource>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Result<Self, BridgeError> {
        let identity_headers = IdentityHeaders::new(&options.identity)?;
        let outbound = OutboundBuffer::new(options.outbound_capacity);
        let registrar = EventRegistrar::new(source, options.event_route, outbound.clone());
        let correlator = ResponseCorrelator::new(dispatcher, outbound.clone());
        let (state, _) = watch::channel(ListenState::Idle);

        Ok(Self {
            shared: Arc::new(ClientShared {
                options,
                identity_headers,
                channel: Mutex::new(None),
                outbound,
                registrar,
                correlator: Mutex::new(correlator),
                state,
                attempts: AtomicU64::new(0),
            }),
            listen_task: Mutex::new(None),
        })
    }

    /// Build a fresh channel to the controller, shutting down any previous one.
    ///
    /// Failures are logged at ERROR and leave the client without a channel.
    pub fn start(&self) {
        let endpoint = &self.shared.options.endpoint;
        let mut slot = self.shared.slot();
        if let Some(previous) = slot.take() {
            if !previous.is_shutdown() {
                info!("{}: replacing live channel", previous.name());
            }
            previous.shutdown();
        }

        match self.build_channel() {
            Ok(channel) => {
                info!("{}: channel started", channel.name());
                *slot = Some(channel);
            }
            Err(e) => error!("failed to start channel to {}: {}", endpoint, diagnostic(&e)),
        }
    }

    fn build_channel(&self) -> Result<Channel, BridgeError> {
        let options = &self.shared.options;
        let builder = ChannelBuilder::for_endpoint(options.endpoint.clone())
            .name(format!("bridge[{}]", options.endpoint))
            .connect_timeout(options.connect_timeout);
        let builder = if options.transport_retries > 0 {
            builder.enable_retry(options.transport_retries, options.transport_retry_delay)
        } else {
            builder.disable_retry()
        };
        Ok(builder.build()?)
    }

    /// Run the reconnect loop with `retry_count` reconnects (negative: forever).
    ///
    /// A previous listen loop is cancelled and awaited before the new one
    /// connects. Requests it was still handling are not cancelled; their
    /// responses go out on the new stream. Must be called from within a
    /// tokio runtime.
    pub fn listen(&self, retry_count: i32) {
        let mut task = self.listen_task.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = task.take();
        if let Some(previous) = &previous {
            debug!("cancelling previous listen loop");
            previous.abort();
        }

        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            supervisor::run(shared, retry_count).await;
        }));
    }

    /// Whether a channel exists and has not been shut down.
    pub fn is_active(&self) -> bool {
        self.shared.channel().is_some()
    }

    /// Shut the channel down. Idempotent; the listen loop keeps retrying
    /// until [`start`](Self::start) provides a new channel.
    pub fn close(&self) {
        if let Some(channel) = self.shared.slot().take() {
            if !channel.is_shutdown() {
                info!("{}: closing channel", channel.name());
            }
            channel.shutdown();
        }
    }

    /// Stop the listen loop, abort in-flight requests and close the channel.
    pub async fn shutdown(&self) {
        let task = self
            .listen_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.shared.correlator().abort_all();
        self.close();
        self.shared.set_state(ListenState::Stopped);
    }

    pub fn state(&self) -> ListenState {
        *self.shared.state.borrow()
    }

    /// Watch listen state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ListenState> {
        self.shared.state.subscribe()
    }

    /// Total duplex stream attempts across all listen loops.
    pub fn connection_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// The live channel, if any.
    pub fn channel(&self) -> Option<Channel> {
        self.shared.channel()
    }

    pub fn outbound(&self) -> &OutboundBuffer {
        &self.shared.outbound
    }

    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(task) = self
            .listen_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.shared.correlator().abort_all();
        self.close();
    }
}
