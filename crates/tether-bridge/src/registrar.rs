//! Relaying event source callbacks upstream, one registration per category.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use tether_core::constants::PUBLISH_METHOD;
use tether_core::{EventCategory, EventEnvelope, RegisterRequest, Status};

use crate::config::EventRoute;
use crate::error::{BridgeError, diagnostic};
use crate::event_source::{EventSource, Subscription};
use crate::identity::{self, IdentifiedCalls};
use crate::outbound::OutboundBuffer;

/// Wraps fired events into [`EventEnvelope`]s and sends them upstream.
///
/// With [`EventRoute::Registration`] each category gets its own publish call
/// opened through `calls`; with [`EventRoute::Duplex`] events go into the outbound
/// buffer and share the duplex call with responses.
#[derive(Clone)]
pub struct EventRegistrar {
    source: Arc<dyn EventSource>,
    route: EventRoute,
    outbound: OutboundBuffer,
}

impl EventRegistrar {
    pub fn new(source: Arc<dyn EventSource>, route: EventRoute, outbound: OutboundBuffer) -> Self {
        Self {
            source,
            route,
            outbound,
        }
    }

    pub fn route(&self) -> EventRoute {
        self.route
    }

    /// Register every category as an independent task in `tasks`.
    ///
    /// A failed registration is logged and does not affect the others.
    pub fn spawn_all(&self, calls: &IdentifiedCalls, tasks: &mut JoinSet<()>) {
        for category in EventCategory::ALL {
            let registrar = self.clone();
            let calls = calls.clone();
            tasks.spawn(async move {
                if let Err(e) = registrar.register(category, &calls).await {
                    error!(%category, "event registration failed: {}", diagnostic(&e));
                }
            });
        }
    }

    /// Relay one category until its producer or its call goes away.
    pub async fn register(
        &self,
        category: EventCategory,
        calls: &IdentifiedCalls,
    ) -> Result<(), BridgeError> {
        let Some(subscription) = self.source.subscribe(category)? else {
            debug!(%category, "no producer, skipping registration");
            return Ok(());
        };

        match self.route {
            EventRoute::Duplex => {
                self.relay_to_outbound(subscription).await;
                Ok(())
            }
            EventRoute::Registration => publish(subscription, calls).await,
        }
    }

    async fn relay_to_outbound(&self, mut subscription: Subscription) {
        let category = subscription.category();
        debug!(%category, "relaying events over the duplex stream");
        while let Some(payload) = subscription.next().await {
            self.outbound.publish(EventEnvelope::new(category, payload));
        }
    }
}

/// Relay events on an active publish call.
async fn publish(mut subscription: Subscription, calls: &IdentifiedCalls) -> Result<(), BridgeError> {
    let category = subscription.category();
    let call = identity::open_call(calls, PUBLISH_METHOD).await?;
    let (sender, mut receiver) = call.split();
    sender.send(RegisterRequest::new(category).to_msgpack())?;
    info!(%category, call_id = sender.call_id(), "event registration open");

    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(payload) => sender.send(EventEnvelope::new(category, payload).to_msgpack())?,
                None => {
                    debug!(%category, "event producer gone, closing registration");
                    sender.close(Status::ok())?;
                    return Ok(());
                }
            },
            msg = receiver.message() => {
                // Nothing is expected back; only the end of the call matters.
                if msg?.is_none() && receiver.is_finished() {
                    info!(%category, "event registration closed by peer");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::EventBus;
    use crate::identity::{Identity, IdentityHeaders};
    use tether_core::UpstreamEnvelope;
    use tether_transport::{Channel, ChannelBuilder, Endpoint};

    fn offline_channel() -> Channel {
        ChannelBuilder::for_endpoint(Endpoint::new("127.0.0.1", 1).unwrap())
            .build()
            .unwrap()
    }

    fn calls_over(channel: &Channel) -> IdentifiedCalls {
        IdentityHeaders::new(&Identity::new(1, "u"))
            .unwrap()
            .layer_over(channel.clone())
    }

    #[tokio::test]
    async fn duplex_route_publishes_to_outbound() {
        let bus = EventBus::default();
        let outbound = OutboundBuffer::new(8);
        let registrar =
            EventRegistrar::new(Arc::new(bus.clone()), EventRoute::Duplex, outbound.clone());
        let mut tasks = JoinSet::new();
        registrar.spawn_all(&calls_over(&offline_channel()), &mut tasks);

        while bus.subscriber_count(EventCategory::Notice) == 0 {
            tokio::task::yield_now().await;
        }
        bus.publish(EventCategory::Notice, b"hello".to_vec());

        let mut drain = outbound.drain().await;
        assert_eq!(
            drain.next().await,
            Some(UpstreamEnvelope::Event(EventEnvelope::new(
                EventCategory::Notice,
                b"hello".to_vec()
            )))
        );
    }

    #[tokio::test]
    async fn unrecognized_category_fails_registration() {
        let registrar = EventRegistrar::new(
            Arc::new(EventBus::default()),
            EventRoute::Registration,
            OutboundBuffer::default(),
        );
        let result = registrar
            .register(EventCategory::Unrecognized(200), &calls_over(&offline_channel()))
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidCategory(_))));
    }

    #[tokio::test]
    async fn core_event_without_producer_is_noop() {
        let registrar = EventRegistrar::new(
            Arc::new(EventBus::default()),
            EventRoute::Registration,
            OutboundBuffer::default(),
        );
        let result = registrar
            .register(EventCategory::CoreEvent, &calls_over(&offline_channel()))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unreachable_channel_fails_one_category() {
        let channel = offline_channel();
        channel.shutdown();
        let registrar = EventRegistrar::new(
            Arc::new(EventBus::default()),
            EventRoute::Registration,
            OutboundBuffer::default(),
        );
        let result = registrar
            .register(EventCategory::Message, &calls_over(&channel))
            .await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
    }
}
