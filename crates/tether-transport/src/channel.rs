//! Client channel: a lazily connected, self-healing handle to one endpoint.
//!
//! A [`Channel`] is cheap to clone; all clones share one connection. The
//! connection is dialled on the first call and re-dialled on the next call
//! after it dies. Connection establishment is retried according to the
//! channel's [`RetryPolicy`]; calls that were already open are never replayed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::call::Call;
use crate::connection::{Connection, Role};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::interceptor::{CallRequest, Interceptor};
use crate::shutdown::ShutdownToken;
use crate::{DEFAULT_CONNECT_RETRIES, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRY_DELAY};

/// How connection establishment is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure. Zero disables retry.
    pub max_retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_CONNECT_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Builder for a [`Channel`].
pub struct ChannelBuilder {
    endpoint: Endpoint,
    name: Option<String>,
    connect_timeout: Duration,
    retry: RetryPolicy,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ChannelBuilder {
    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::disabled(),
            interceptors: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Retry connection establishment up to `max_retries` extra times.
    pub fn enable_retry(mut self, max_retries: u32, delay: Duration) -> Self {
        self.retry = RetryPolicy { max_retries, delay };
        self
    }

    pub fn disable_retry(mut self) -> Self {
        self.retry = RetryPolicy::disabled();
        self
    }

    /// Append an interceptor. Interceptors run in registration order.
    pub fn intercept(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Validate the settings and create the channel. Does not connect.
    pub fn build(self) -> Result<Channel, TransportError> {
        if self.connect_timeout.is_zero() {
            return Err(TransportError::Configuration(
                "connect timeout must be non-zero".into(),
            ));
        }
        let name = self
            .name
            .unwrap_or_else(|| format!("channel[{}]", self.endpoint));

        debug!(
            "{}: built channel to {} (retries={}, timeout={:?})",
            name, self.endpoint, self.retry.max_retries, self.connect_timeout
        );

        Ok(Channel {
            inner: Arc::new(ChannelInner {
                name,
                endpoint: self.endpoint,
                connect_timeout: self.connect_timeout,
                retry: self.retry,
                interceptors: self.interceptors,
                connection: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                connects: AtomicU64::new(0),
                shutdown: ShutdownToken::new(),
            }),
        })
    }
}

struct ChannelInner {
    name: String,
    endpoint: Endpoint,
    connect_timeout: Duration,
    retry: RetryPolicy,
    interceptors: Vec<Arc<dyn Interceptor>>,
    connection: Mutex<Option<Arc<Connection>>>,
    /// Serializes dialling so concurrent calls share one new connection.
    connect_lock: tokio::sync::Mutex<()>,
    connects: AtomicU64,
    shutdown: ShutdownToken,
}

impl ChannelInner {
    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Connection>>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        if let Some(conn) = self.slot().take() {
            conn.close();
        }
    }
}

/// Handle to a remote endpoint over which calls are opened.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    /// Open a call for `method`, running every interceptor first.
    pub async fn open_call(&self, method: &str) -> Result<Call, TransportError> {
        self.open_call_with(CallRequest::new(method)).await
    }

    /// Open a call from a prepared request, running every interceptor first.
    pub async fn open_call_with(&self, mut request: CallRequest) -> Result<Call, TransportError> {
        if self.is_shutdown() {
            return Err(TransportError::Shutdown);
        }
        for interceptor in &self.inner.interceptors {
            interceptor.intercept(&mut request);
        }
        let conn = self.connection().await?;
        conn.open_call(&request.method, request.headers)
    }

    /// Shut the channel down. Open calls fail and new calls are refused.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_stopped() {
            info!("{}: shutting down", self.inner.name);
        }
        self.inner.shutdown.signal_stop();
        if let Some(conn) = self.inner.slot().take() {
            conn.close();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_stopped()
    }

    /// Whether a live connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// How many connections this channel has established so far.
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.inner
            .slot()
            .as_ref()
            .filter(|conn| conn.is_alive())
            .cloned()
    }

    async fn connection(&self) -> Result<Arc<Connection>, TransportError> {
        if let Some(conn) = self.current() {
            return Ok(conn);
        }

        let _dialling = self.inner.connect_lock.lock().await;
        if let Some(conn) = self.current() {
            return Ok(conn);
        }

        let stream = self.dial().await?;
        let conn = Connection::spawn(stream, Role::Initiator, self.inner.name.clone());
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        {
            let mut slot = self.inner.slot();
            if self.is_shutdown() {
                conn.close();
                return Err(TransportError::Shutdown);
            }
            *slot = Some(Arc::clone(&conn));
        }
        Ok(conn)
    }

    async fn dial(&self) -> Result<TcpStream, TransportError> {
        let inner = &self.inner;
        let authority = inner.endpoint.authority();
        let attempts = inner.retry.attempts();
        let mut stop_rx = inner.shutdown.subscribe();
        let mut last_err = None;

        for attempt in 1..=attempts {
            if inner.shutdown.is_stopped() {
                return Err(TransportError::Shutdown);
            }

            match tokio::time::timeout(inner.connect_timeout, TcpStream::connect(&authority)).await
            {
                Ok(Ok(stream)) => {
                    info!("{}: connected to {}", inner.name, authority);
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!(
                        "{}: connection attempt {}/{} failed: {}",
                        inner.name, attempt, attempts, e
                    );
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!(
                        "{}: connection attempt {}/{} timed out",
                        inner.name, attempt, attempts
                    );
                    last_err = Some(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ));
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(inner.retry.delay) => {}
                    _ = stop_rx.wait_for(|stopped| *stopped) => return Err(TransportError::Shutdown),
                }
            }
        }

        warn!(
            "{}: giving up on {} after {} attempt(s)",
            inner.name, authority, attempts
        );
        Err(TransportError::ConnectFailed {
            endpoint: authority,
            attempts,
            source: last_err
                .unwrap_or_else(|| std::io::Error::other("no connection attempt was made")),
        })
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("endpoint", &self.inner.endpoint)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 1).unwrap()
    }

    #[test]
    fn build_does_not_connect() {
        let channel = ChannelBuilder::for_endpoint(endpoint()).build().unwrap();
        assert!(!channel.is_connected());
        assert!(!channel.is_shutdown());
        assert_eq!(channel.connects(), 0);
        assert_eq!(channel.name(), "channel[127.0.0.1:1]");
    }

    #[test]
    fn zero_timeout_rejected() {
        let result = ChannelBuilder::for_endpoint(endpoint())
            .connect_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(TransportError::Configuration(_))));
    }

    #[test]
    fn retry_settings() {
        let channel = ChannelBuilder::for_endpoint(endpoint())
            .enable_retry(4, Duration::from_millis(5))
            .build()
            .unwrap();
        assert_eq!(channel.retry_policy().attempts(), 5);

        let channel = ChannelBuilder::for_endpoint(endpoint())
            .enable_retry(4, Duration::from_millis(5))
            .disable_retry()
            .build()
            .unwrap();
        assert_eq!(channel.retry_policy().attempts(), 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_calls() {
        let channel = ChannelBuilder::for_endpoint(endpoint()).build().unwrap();
        channel.shutdown();
        channel.shutdown();
        assert!(channel.is_shutdown());
        assert!(matches!(
            channel.open_call("svc/M").await,
            Err(TransportError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_attempts() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let channel = ChannelBuilder::for_endpoint(Endpoint::new("127.0.0.1", port).unwrap())
            .enable_retry(2, Duration::from_millis(10))
            .build()
            .unwrap();

        match channel.open_call("svc/M").await {
            Err(TransportError::ConnectFailed { attempts, .. }) => assert_eq!(attempts, 3),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect to a closed port should fail"),
        }
    }
}
