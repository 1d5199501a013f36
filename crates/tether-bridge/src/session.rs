//! One duplex stream session: the bidirectional call to the controller.

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tether_core::RequestEnvelope;
use tether_core::constants::DUPLEX_METHOD;

use crate::client::ClientShared;
use crate::error::BridgeError;
use crate::identity;
use crate::supervisor::ListenState;

/// Run one duplex session until the call ends.
///
/// Opens the duplex call on the current channel, spawns the event
/// registrations, then relays outbound envelopes upstream and hands inbound
/// requests to the client's correlator. Always ends with an error describing
/// why the stream stopped; the registrations die with the session.
pub(crate) async fn run(shared: &ClientShared) -> Result<(), BridgeError> {
    let channel = shared.channel().ok_or(BridgeError::NotStarted)?;
    let calls = shared.identity_headers.layer_over(channel.clone());
    let call = identity::open_call(&calls, DUPLEX_METHOD).await?;
    let (sender, mut receiver) = call.split();

    let mut registrations = JoinSet::new();
    shared.registrar.spawn_all(&calls, &mut registrations);

    shared.set_state(ListenState::Streaming);
    info!(
        "{}: duplex stream open (call {})",
        channel.name(),
        sender.call_id()
    );

    let mut outbound = shared.outbound.drain().await;
    loop {
        tokio::select! {
            envelope = outbound.next() => {
                let Some(envelope) = envelope else {
                    return Err(BridgeError::StreamClosed);
                };
                if let Err(e) = sender.send(envelope.to_msgpack()) {
                    // Sent first by the next session.
                    outbound.retain(envelope);
                    return Err(e.into());
                }
            }
            msg = receiver.message() => match msg? {
                Some(bytes) => match RequestEnvelope::from_msgpack(&bytes) {
                    Ok(request) => {
                        shared.correlator().on_receive(request);
                    }
                    Err(e) => warn!("{}: undecodable request dropped: {}", channel.name(), e),
                },
                None if receiver.is_finished() => return Err(BridgeError::StreamClosed),
                None => debug!("{}: controller half-closed the duplex stream", channel.name()),
            },
            Some(result) = registrations.join_next() => {
                if let Err(e) = result
                    && e.is_panic()
                {
                    error!("{}: event registration task panicked", channel.name());
                }
            }
        }
    }
}
