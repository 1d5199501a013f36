//! Tower `Service` adapter for command dispatch.
//!
//! [`DispatchService`] turns a [`CommandDispatcher`] into an infallible
//! `Service<RequestEnvelope>` whose response is always the correlated
//! [`ResponseEnvelope`]: handler failures are folded into an INTERNAL
//! response rather than surfacing as service errors.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::debug;

use tether_core::{RequestEnvelope, ResponseEnvelope};
use tether_transport::BoxFuture;

use crate::dispatcher::CommandDispatcher;
use crate::error::diagnostic;

/// Wraps a [`CommandDispatcher`] as a `Service<RequestEnvelope>`.
pub struct DispatchService {
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl DispatchService {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Clone for DispatchService {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl Service<RequestEnvelope> for DispatchService {
    type Response = ResponseEnvelope;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<ResponseEnvelope, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RequestEnvelope) -> Self::Future {
        let dispatcher = Arc::clone(&self.dispatcher);
        Box::pin(async move {
            let payload = request.payload.clone();
            let response = match dispatcher.dispatch(request.cmd, payload).await {
                Ok(output) => ResponseEnvelope::success(&request, output),
                Err(e) => {
                    let text = diagnostic(&e);
                    debug!(cmd = request.cmd, seq = request.seq, "command failed: {}", text);
                    ResponseEnvelope::internal_error(&request, text)
                }
            };
            Ok(response)
        })
    }
}
