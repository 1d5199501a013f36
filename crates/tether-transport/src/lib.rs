//! Call transport for the tether RPC bridge.
//!
//! A single plaintext TCP connection carries many concurrent calls. Each call
//! is opened with a method name and ASCII headers, streams opaque messages in
//! both directions, and ends with a [`Status`](tether_core::Status). Frames
//! are delimited on the byte stream with HDLC byte-stuffing.
//!
//! The client side is a [`Channel`]: it connects lazily, retries connection
//! establishment, and runs an [`Interceptor`] chain on every call it opens.
//! The server side is a [`Server`] that routes incoming calls by method to
//! [`CallHandler`]s registered on a [`Router`].

pub mod call;
pub mod channel;
pub(crate) mod connection;
pub mod endpoint;
pub mod error;
pub mod framing;
pub mod interceptor;
pub mod server;
pub mod shutdown;
pub mod tower_service;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use call::{Call, CallReceiver, CallSender};
pub use channel::{Channel, ChannelBuilder, RetryPolicy};
pub use endpoint::Endpoint;
pub use error::TransportError;
pub use interceptor::{CallRequest, Interceptor};
pub use server::{CallHandler, Router, Server, ServerCall, ServerConfig};
pub use shutdown::ShutdownToken;

/// Boxed, sendable future used at the handler and tower seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Timeout for a single TCP connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of extra connection attempts after the first one fails.
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// Delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Size of the read buffer for `TcpStream::read`.
pub const TCP_RECV_BUFFER: usize = 4096;

/// Inbound messages buffered per call before the read loop waits on the consumer.
pub const CALL_BUFFER: usize = 256;
