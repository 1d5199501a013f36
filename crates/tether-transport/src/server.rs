//! Call server: accepts connections and routes incoming calls to handlers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tether_core::{Metadata, Status};

use crate::BoxFuture;
use crate::call::{Call, CallReceiver, CallSender};
use crate::connection::{Connection, Role};
use crate::error::TransportError;
use crate::shutdown::ShutdownToken;

/// Configuration for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Human-readable name used in log lines.
    pub name: String,
    /// Address to bind the TCP listener to.
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, bind_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            bind_addr,
        }
    }
}

/// An incoming call as seen by a handler.
pub struct ServerCall {
    call: Call,
    headers: Metadata,
    peer: SocketAddr,
}

impl ServerCall {
    pub(crate) fn new(call: Call, headers: Metadata, peer: SocketAddr) -> Self {
        Self {
            call,
            headers,
            peer,
        }
    }

    pub fn method(&self) -> &str {
        self.call.method()
    }

    /// Request headers sent by the caller when it opened the call.
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn split(self) -> (CallSender, CallReceiver) {
        self.call.split()
    }
}

/// Handles one incoming call. The returned status closes the call; `Ok(())`
/// closes it with [`Status::ok`].
pub trait CallHandler: Send + Sync + 'static {
    fn call(&self, call: ServerCall) -> BoxFuture<'static, Result<(), Status>>;
}

impl<F, Fut> CallHandler for F
where
    F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    fn call(&self, call: ServerCall) -> BoxFuture<'static, Result<(), Status>> {
        Box::pin(self(call))
    }
}

/// Method name to handler table.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn CallHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any previous handler.
    pub fn route(mut self, method: impl Into<String>, handler: impl CallHandler) -> Self {
        self.add(method, handler);
        self
    }

    pub fn add(&mut self, method: impl Into<String>, handler: impl CallHandler) {
        self.routes.insert(method.into(), Arc::new(handler));
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn CallHandler>> {
        self.routes.get(method).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

type ConnectionList = Arc<Mutex<Vec<Arc<Connection>>>>;

/// A TCP server that accepts connections and serves calls from a [`Router`].
pub struct Server {
    config: ServerConfig,
    router: Arc<Router>,
    local_addr: Mutex<Option<SocketAddr>>,
    connections: ConnectionList,
    shutdown: ShutdownToken,
}

impl Server {
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self {
            config,
            router: Arc::new(router),
            local_addr: Mutex::new(None),
            connections: Arc::new(Mutex::new(Vec::new())),
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The address the server is listening on. Available after `start()`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_online()
    }

    /// Number of accepted connections that are still alive.
    pub fn connection_count(&self) -> usize {
        let mut conns = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        conns.retain(|c| c.is_alive());
        conns.len()
    }

    /// Bind the listener and spawn the accept loop.
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.shutdown.is_stopped() {
            return Err(TransportError::Configuration(format!(
                "{} was stopped and cannot be restarted",
                self.config.name
            )));
        }

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        info!("{}: listening on {}", self.config.name, addr);
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
        self.shutdown.set_online();

        self.shutdown.add_task(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.router),
            Arc::clone(&self.connections),
            self.shutdown.subscribe(),
            self.config.name.clone(),
        )));

        Ok(())
    }

    /// Stop accepting, close every connection and wait for the accept loop.
    pub async fn stop(&self) {
        self.shutdown.signal_stop_and_go_offline();

        let conns: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for conn in conns {
            conn.close_and_join().await;
        }

        self.shutdown.join_all().await;
        debug!("{}: stopped", self.config.name);
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Arc<Router>,
    connections: ConnectionList,
    mut stop_rx: watch::Receiver<bool>,
    name: String,
) {
    loop {
        let (stream, peer_addr) = tokio::select! {
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("{}: accept error: {}", name, e);
                    continue;
                }
            },
            _ = stop_rx.wait_for(|stopped| *stopped) => {
                debug!("{}: accept loop stopping", name);
                break;
            }
        };

        info!("{}: accepted connection from {}", name, peer_addr);
        let conn = Connection::spawn(
            stream,
            Role::Responder(Arc::clone(&router)),
            format!("{name}[{peer_addr}]"),
        );

        let mut conns = connections.lock().unwrap_or_else(PoisonError::into_inner);
        conns.retain(|c| c.is_alive());
        conns.push(conn);
    }
}
