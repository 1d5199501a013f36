//! The bridge host: wires configuration, client and event service together.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use tether_transport::{Server, ServerConfig};

use crate::client::BridgeClient;
use crate::config::BridgeConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::BridgeError;
use crate::event_service::EventService;
use crate::event_source::EventSource;
use crate::supervisor::ListenState;

/// Cloneable trigger that asks a running [`Bridge`] to stop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// A configured bridge: the client to the controller plus the optional
/// passive event service.
pub struct Bridge {
    client: BridgeClient,
    server: Option<Server>,
    retry_count: i32,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Bridge {
    pub fn new(
        config: &BridgeConfig,
        source: Arc<dyn EventSource>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Result<Self, BridgeError> {
        let client = BridgeClient::new(config.client_options()?, Arc::clone(&source), dispatcher)?;
        let server = config.server_bind()?.map(|addr| {
            Server::new(
                ServerConfig::new("event-service", addr),
                EventService::new(source).router(),
            )
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            client,
            server,
            retry_count: config.listen.retry_count,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    /// Override the configured listen retry count.
    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn client(&self) -> &BridgeClient {
        &self.client
    }

    /// Bound address of the event service once started.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(Server::local_addr)
    }

    /// Start the event service (if configured), the channel and the listen loop.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        if let Some(server) = &self.server {
            server.start().await?;
            if let Some(addr) = server.local_addr() {
                info!("event service listening on {}", addr);
            }
        }
        self.client.start();
        self.client.listen(self.retry_count);
        Ok(())
    }

    /// Wait until shutdown is requested or the listen loop gives up.
    pub async fn run(&mut self) {
        let mut state = self.client.subscribe_state();
        tokio::select! {
            _ = self.shutdown_rx.wait_for(|stop| *stop) => {
                info!("shutdown signal received");
            }
            _ = state.wait_for(|s| *s == ListenState::Stopped) => {
                warn!("listen loop stopped, bridge exiting");
            }
        }
    }

    pub async fn shutdown(self) {
        info!("shutting down bridge");
        self.client.shutdown().await;
        if let Some(server) = &self.server {
            server.stop().await;
        }
        info!("bridge shutdown complete");
    }
}
