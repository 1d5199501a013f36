//! Auto-reconnecting bidirectional RPC bridge.
//!
//! A [`BridgeClient`] keeps one duplex call open to a remote controller,
//! relays events from an [`EventSource`] upstream, and answers every
//! controller request through a [`CommandDispatcher`] with exactly one
//! correlated response. [`Bridge`] hosts a client together with the optional
//! passive [`EventService`] from a [`BridgeConfig`].

pub mod bridge;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod event_service;
pub mod event_source;
pub mod identity;
pub mod logging;
pub mod outbound;
pub mod registrar;
mod session;
pub mod supervisor;
pub mod tower_service;

pub use bridge::{Bridge, ShutdownHandle};
pub use client::{BridgeClient, ClientOptions};
pub use config::{BridgeConfig, EventRoute};
pub use dispatcher::{CommandDispatcher, CommandHandler, CommandRouter, DispatchError};
pub use error::BridgeError;
pub use event_service::EventService;
pub use event_source::{EventBus, EventSource, Subscription};
pub use identity::{Identity, IdentityHeaders};
pub use outbound::OutboundBuffer;
pub use supervisor::ListenState;
