//! Tower `Service` adapters for channels.
//!
//! [`CallService`] exposes a [`Channel`] as a `Service<CallRequest>` whose
//! response is an open [`Call`], so tower middleware (timeouts, concurrency
//! limits, retries of call setup) can be stacked in front of it.
//! [`InterceptLayer`] turns any [`Interceptor`] into a layer.
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tower::timeout::TimeoutLayer;
//!
//! let svc = ServiceBuilder::new()
//!     .layer(InterceptLayer::new(trace_headers))
//!     .service(CallService::new(channel));
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::BoxFuture;
use crate::call::Call;
use crate::channel::Channel;
use crate::error::TransportError;
use crate::interceptor::{CallRequest, Interceptor};

/// Wraps a [`Channel`] as a `Service<CallRequest>`.
///
/// `poll_ready` fails once the channel is shut down; `call` opens the call.
#[derive(Clone)]
pub struct CallService {
    channel: Channel,
}

impl CallService {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

impl From<Channel> for CallService {
    fn from(channel: Channel) -> Self {
        Self::new(channel)
    }
}

impl Service<CallRequest> for CallService {
    type Response = Call;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Call, TransportError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.channel.is_shutdown() {
            Poll::Ready(Err(TransportError::Shutdown))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, req: CallRequest) -> Self::Future {
        let channel = self.channel.clone();
        Box::pin(async move { channel.open_call_with(req).await })
    }
}

/// Layer that runs an [`Interceptor`] on each request before the inner service.
pub struct InterceptLayer<I> {
    interceptor: Arc<I>,
}

impl<I> InterceptLayer<I> {
    pub fn new(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }
}

impl<I> Clone for InterceptLayer<I> {
    fn clone(&self) -> Self {
        Self {
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

impl<S, I> Layer<S> for InterceptLayer<I> {
    type Service = Intercepted<S, I>;

    fn layer(&self, inner: S) -> Self::Service {
        Intercepted {
            inner,
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

/// Service produced by [`InterceptLayer`].
pub struct Intercepted<S, I> {
    inner: S,
    interceptor: Arc<I>,
}

impl<S: Clone, I> Clone for Intercepted<S, I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

impl<S, I> Service<CallRequest> for Intercepted<S, I>
where
    S: Service<CallRequest>,
    I: Interceptor,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: CallRequest) -> Self::Future {
        self.interceptor.intercept(&mut req);
        self.inner.call(req)
    }
}
