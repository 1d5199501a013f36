//! Passive event registration: peers subscribe to a category over a call.

use std::sync::Arc;

use tracing::{debug, info};

use tether_core::constants::SUBSCRIBE_METHOD;
use tether_core::{EventEnvelope, RegisterRequest, Status};
use tether_transport::{Router, ServerCall};

use crate::event_source::EventSource;

/// Serves `tether.EventService/Subscribe`.
///
/// The peer opens the call and sends one [`RegisterRequest`]; the service
/// streams an [`EventEnvelope`] for each event fired in that category until
/// either side goes away. An unrecognized or malformed selector is answered
/// with `InvalidArgument`. A category without a producer closes the call OK.
#[derive(Clone)]
pub struct EventService {
    source: Arc<dyn EventSource>,
}

impl EventService {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self { source }
    }

    /// A router serving this service.
    pub fn router(&self) -> Router {
        let service = self.clone();
        Router::new().route(SUBSCRIBE_METHOD, move |call: ServerCall| {
            let service = service.clone();
            async move { service.handle(call).await }
        })
    }

    pub async fn handle(&self, call: ServerCall) -> Result<(), Status> {
        let peer = call.peer_addr();
        let (sender, mut receiver) = call.split();

        let request = match receiver.message().await {
            Ok(Some(bytes)) => RegisterRequest::from_msgpack(&bytes)
                .map_err(|e| Status::invalid_argument(format!("malformed register request: {e}")))?,
            Ok(None) => return Err(Status::invalid_argument("missing register request")),
            Err(e) => {
                debug!(%peer, "subscriber went away before registering: {}", e);
                return Ok(());
            }
        };
        let category = request.category;

        let mut subscription = match self.source.subscribe(category) {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                debug!(%peer, %category, "no producer for category");
                return Ok(());
            }
            Err(e) => {
                debug!(%peer, "rejecting subscription: {}", e);
                return Err(Status::invalid_argument(e.to_string()));
            }
        };
        info!(%peer, %category, "subscriber registered");

        loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(payload) => {
                        if sender.send(EventEnvelope::new(category, payload).to_msgpack()).is_err() {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                msg = receiver.message() => {
                    if msg.is_err() || receiver.is_finished() {
                        info!(%peer, %category, "subscriber left");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::EventBus;
    use tether_core::{EventCategory, StatusCode};
    use tether_transport::{ChannelBuilder, Endpoint, Server, ServerConfig, TransportError};

    async fn serve(bus: &EventBus) -> (Server, tether_transport::Channel) {
        let service = EventService::new(Arc::new(bus.clone()));
        let server = Server::new(
            ServerConfig::new("events", "127.0.0.1:0".parse().unwrap()),
            service.router(),
        );
        server.start().await.unwrap();
        let endpoint = Endpoint::from(server.local_addr().unwrap());
        let channel = ChannelBuilder::for_endpoint(endpoint).build().unwrap();
        (server, channel)
    }

    #[tokio::test]
    async fn streams_events_for_requested_category() {
        let bus = EventBus::default();
        let (server, channel) = serve(&bus).await;

        let (sender, mut receiver) = channel.open_call(SUBSCRIBE_METHOD).await.unwrap().split();
        sender
            .send(RegisterRequest::new(EventCategory::Message).to_msgpack())
            .unwrap();

        while bus.subscriber_count(EventCategory::Message) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        bus.publish(EventCategory::Notice, b"other".to_vec());
        bus.publish(EventCategory::Message, b"hi".to_vec());

        let bytes = receiver.message().await.unwrap().unwrap();
        assert_eq!(
            EventEnvelope::from_msgpack(&bytes).unwrap(),
            EventEnvelope::new(EventCategory::Message, b"hi".to_vec())
        );

        channel.shutdown();
        server.stop().await;
    }

    #[tokio::test]
    async fn unrecognized_category_is_invalid_argument() {
        let bus = EventBus::default();
        let (server, channel) = serve(&bus).await;

        let (sender, mut receiver) = channel.open_call(SUBSCRIBE_METHOD).await.unwrap().split();
        sender
            .send(RegisterRequest::new(EventCategory::Unrecognized(42)).to_msgpack())
            .unwrap();

        match receiver.message().await {
            Err(TransportError::Status(status)) => {
                assert_eq!(status.code, StatusCode::InvalidArgument)
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }

        channel.shutdown();
        server.stop().await;
    }

    #[tokio::test]
    async fn core_event_without_producer_closes_ok() {
        let bus = EventBus::default();
        let (server, channel) = serve(&bus).await;

        let (sender, mut receiver) = channel.open_call(SUBSCRIBE_METHOD).await.unwrap().split();
        sender
            .send(RegisterRequest::new(EventCategory::CoreEvent).to_msgpack())
            .unwrap();
        assert_eq!(receiver.message().await.unwrap(), None);
        assert!(receiver.is_finished());

        channel.shutdown();
        server.stop().await;
    }

    #[tokio::test]
    async fn malformed_request_is_invalid_argument() {
        let bus = EventBus::default();
        let (server, channel) = serve(&bus).await;

        let (sender, mut receiver) = channel.open_call(SUBSCRIBE_METHOD).await.unwrap().split();
        sender.send(vec![0xc1]).unwrap();
        let err = receiver.message().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(StatusCode::InvalidArgument));

        channel.shutdown();
        server.stop().await;
    }
}
