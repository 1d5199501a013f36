//! One TCP connection carrying multiplexed calls.
//!
//! Each connection runs two background tasks: a writer draining an unbounded
//! frame queue onto the socket, and a read loop that decodes frames and routes
//! them to calls by id. When either task ends the connection is dead: every
//! live call fails with [`TransportError::ConnectionLost`] and a channel will
//! dial a fresh connection on its next call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use tether_core::framing::hdlc::hdlc_frame;
use tether_core::{Frame, FrameBody, Metadata, Status};

use crate::call::{Call, CallEvent, CallRegistry};
use crate::error::TransportError;
use crate::framing::FrameAccumulator;
use crate::server::{Router, ServerCall};
use crate::shutdown::ShutdownToken;
use crate::{CALL_BUFFER, TCP_RECV_BUFFER};

/// Which side of the connection this process is.
#[derive(Clone)]
pub(crate) enum Role {
    /// Dialled by a channel; opens calls and never accepts them.
    Initiator,
    /// Accepted by a server; accepts calls and routes them to handlers.
    Responder(Arc<Router>),
}

pub(crate) struct Connection {
    name: String,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Frame>,
    registry: Arc<CallRegistry>,
    next_call_id: AtomicU32,
    shutdown: Arc<ShutdownToken>,
}

impl Connection {
    /// Take ownership of a connected stream and spawn its writer and read loop.
    pub(crate) fn spawn(stream: TcpStream, role: Role, name: String) -> Arc<Self> {
        let _ = stream.set_nodelay(true);
        let peer = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (reader, writer) = stream.into_split();
        let (outbound, frames) = mpsc::unbounded_channel();

        let shutdown = Arc::new(ShutdownToken::new());
        shutdown.set_online();
        let registry = Arc::new(CallRegistry::default());

        let conn = Arc::new(Self {
            name,
            peer,
            outbound: outbound.clone(),
            registry: Arc::clone(&registry),
            next_call_id: AtomicU32::new(1),
            shutdown: Arc::clone(&shutdown),
        });

        shutdown.add_task(tokio::spawn(write_loop(
            writer,
            frames,
            Arc::clone(&shutdown),
            conn.name.clone(),
        )));
        shutdown.add_task(tokio::spawn(
            ReadLoop {
                name: conn.name.clone(),
                peer,
                role,
                outbound,
                registry,
                shutdown: Arc::clone(&shutdown),
            }
            .run(reader),
        ));

        conn
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.shutdown.is_online() && !self.shutdown.is_stopped()
    }

    /// Open a new call by sending its OPEN frame.
    pub(crate) fn open_call(&self, method: &str, headers: Metadata) -> Result<Call, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionLost);
        }

        let call = loop {
            let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
            if let Some(call) = Call::register(
                call_id,
                method.to_string(),
                self.outbound.clone(),
                Arc::clone(&self.registry),
                CALL_BUFFER,
                true,
            ) {
                break call;
            }
        };

        debug!(
            "{}: opening call {} for {}",
            self.name,
            call.call_id(),
            method
        );
        self.outbound
            .send(Frame::open(call.call_id(), method, headers))
            .map_err(|_| TransportError::ConnectionLost)?;
        Ok(call)
    }

    /// Stop both background tasks. Live calls fail with connection loss.
    pub(crate) fn close(&self) {
        if self.is_alive() {
            debug!("{}: closing connection to {}", self.name, self.peer);
        }
        self.shutdown.signal_stop_and_go_offline();
    }

    /// Stop the connection and wait for its background tasks to finish.
    pub(crate) async fn close_and_join(&self) {
        self.close();
        self.shutdown.join_all().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.signal_stop_and_go_offline();
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    shutdown: Arc<ShutdownToken>,
    name: String,
) {
    let mut stop_rx = shutdown.subscribe();

    loop {
        let frame = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
        };

        trace!("{}: writing {} frame for call {}", name, frame.kind_name(), frame.call_id);
        if let Err(e) = writer.write_all(&hdlc_frame(&frame.encode())).await {
            debug!("{}: write error: {}", name, e);
            break;
        }
    }

    let _ = writer.shutdown().await;
    shutdown.signal_stop_and_go_offline();
}

struct ReadLoop {
    name: String,
    peer: SocketAddr,
    role: Role,
    outbound: mpsc::UnboundedSender<Frame>,
    registry: Arc<CallRegistry>,
    shutdown: Arc<ShutdownToken>,
}

impl ReadLoop {
    async fn run(self, mut reader: OwnedReadHalf) {
        let mut stop_rx: watch::Receiver<bool> = self.shutdown.subscribe();
        let mut acc = FrameAccumulator::new();
        let mut buf = vec![0u8; TCP_RECV_BUFFER];

        'read: loop {
            let n = tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        debug!("{}: socket closed (EOF)", self.name);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!("{}: read error: {}", self.name, e);
                        break;
                    }
                },
                _ = stop_rx.wait_for(|stopped| *stopped) => break,
            };

            for raw in acc.feed(&buf[..n]) {
                let frame = match Frame::decode(&raw) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("{}: dropping undecodable frame: {}", self.name, e);
                        continue;
                    }
                };
                tokio::select! {
                    _ = self.route(frame) => {}
                    _ = stop_rx.wait_for(|stopped| *stopped) => break 'read,
                }
            }
        }

        self.shutdown.signal_stop_and_go_offline();
        let orphaned = self.registry.drain();
        for slot in &orphaned {
            slot.state.mark_remote_closed();
        }
        if !orphaned.is_empty() {
            info!(
                "{}: connection to {} lost with {} live call(s)",
                self.name,
                self.peer,
                orphaned.len()
            );
        }
    }

    async fn route(&self, frame: Frame) {
        let call_id = frame.call_id;
        let event = match frame.body {
            FrameBody::Open { method, headers } => {
                self.accept_call(call_id, method, headers);
                return;
            }
            FrameBody::Message(payload) => CallEvent::Message(payload),
            FrameBody::HalfClose => CallEvent::HalfClose,
            FrameBody::Close(status) => CallEvent::Close(status),
        };

        let slot = if matches!(event, CallEvent::Close(_)) {
            self.registry.remove(call_id).inspect(|slot| slot.state.mark_remote_closed())
        } else {
            self.registry.get(call_id)
        };
        let Some(slot) = slot else {
            trace!("{}: frame for unknown call {}", self.name, call_id);
            return;
        };

        if slot.events.send(event).await.is_err() {
            // Receiver gone; nobody is reading this call any more.
            self.registry.remove(call_id);
        }
    }

    fn accept_call(&self, call_id: u32, method: String, headers: Metadata) {
        let Role::Responder(router) = &self.role else {
            warn!(
                "{}: peer tried to open call {} ({}) on a client connection",
                self.name, call_id, method
            );
            let _ = self.outbound.send(Frame::close(
                call_id,
                Status::unimplemented("this peer does not accept calls"),
            ));
            return;
        };

        let Some(handler) = router.get(&method) else {
            debug!("{}: unknown method {}", self.name, method);
            let _ = self.outbound.send(Frame::close(
                call_id,
                Status::unimplemented(format!("unknown method {method}")),
            ));
            return;
        };

        let Some(call) = Call::register(
            call_id,
            method.clone(),
            self.outbound.clone(),
            Arc::clone(&self.registry),
            CALL_BUFFER,
            false,
        ) else {
            warn!("{}: duplicate call id {}", self.name, call_id);
            let _ = self.outbound.send(Frame::close(
                call_id,
                Status::invalid_argument("call id already in use"),
            ));
            return;
        };

        debug!("{}: accepted call {} for {}", self.name, call_id, method);
        let sender = call.sender().clone();
        let server_call = ServerCall::new(call, headers, self.peer);
        let name = self.name.clone();

        tokio::spawn(async move {
            let status = match tokio::spawn(handler.call(server_call)).await {
                Ok(Ok(())) => Status::ok(),
                Ok(Err(status)) => status,
                Err(e) => {
                    warn!("{}: handler for {} panicked: {}", name, method, e);
                    Status::internal(format!("handler for {method} panicked"))
                }
            };
            debug!("{}: call {} finished with {}", name, call_id, status);
            let _ = sender.close(status);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo(call: ServerCall) -> Result<(), Status> {
        let (sender, mut receiver) = call.split();
        while let Some(msg) = receiver
            .message()
            .await
            .map_err(|e| Status::internal(e.to_string()))?
        {
            sender
                .send(msg)
                .map_err(|e| Status::internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn explode(_call: ServerCall) -> Result<(), Status> {
        panic!("handler blew up")
    }

    async fn hold(call: ServerCall) -> Result<(), Status> {
        let (_sender, mut receiver) = call.split();
        let _ = receiver.message().await;
        Ok(())
    }

    async fn pair(router: Router) -> (Arc<Connection>, Arc<Connection>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = Connection::spawn(client.unwrap(), Role::Initiator, "client".into());
        let server = Connection::spawn(
            accepted.unwrap().0,
            Role::Responder(Arc::new(router)),
            "server".into(),
        );
        (client, server)
    }

    #[tokio::test]
    async fn echo_roundtrip() {
        let (client, _server) = pair(Router::new().route("test/Echo", echo)).await;

        let (sender, mut receiver) = client
            .open_call("test/Echo", Metadata::new())
            .unwrap()
            .split();
        sender.send(vec![1, 2, 3]).unwrap();
        assert_eq!(receiver.message().await.unwrap(), Some(vec![1, 2, 3]));

        sender.half_close().unwrap();
        assert_eq!(receiver.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let (client, _server) = pair(Router::new()).await;
        let (_sender, mut receiver) = client
            .open_call("test/Missing", Metadata::new())
            .unwrap()
            .split();

        let err = receiver.message().await.unwrap_err();
        assert_eq!(
            err.status().map(|s| s.code),
            Some(tether_core::StatusCode::Unimplemented)
        );
    }

    #[tokio::test]
    async fn panicking_handler_closes_with_internal() {
        let (client, _server) = pair(Router::new().route("test/Panic", explode)).await;
        let (_sender, mut receiver) = client
            .open_call("test/Panic", Metadata::new())
            .unwrap()
            .split();

        let err = receiver.message().await.unwrap_err();
        assert_eq!(
            err.status().map(|s| s.code),
            Some(tether_core::StatusCode::Internal)
        );
    }

    #[tokio::test]
    async fn peer_close_fails_live_calls() {
        let (client, server) = pair(Router::new().route("test/Hold", hold)).await;
        let (_sender, mut receiver) = client
            .open_call("test/Hold", Metadata::new())
            .unwrap()
            .split();

        server.close_and_join().await;

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.message())
            .await
            .expect("call should fail promptly");
        assert!(matches!(result, Err(TransportError::ConnectionLost)));

        for _ in 0..50 {
            if !client.is_alive() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!client.is_alive());
        assert!(matches!(
            client.open_call("test/Hold", Metadata::new()),
            Err(TransportError::ConnectionLost)
        ));
    }
}
