//! Error types for the bridge.

use std::error::Error;

use tether_core::{EnvelopeError, EventCategory, MetadataError};
use tether_transport::TransportError;

/// Errors that can occur while running the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("invalid identity header: {0}")]
    Identity(#[from] MetadataError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("client not started")]
    NotStarted,
    #[error("invalid event category {0}")]
    InvalidCategory(EventCategory),
    #[error("duplex stream closed by peer")]
    StreamClosed,
}

/// Render an error with its whole source chain, outermost first.
///
/// Sources whose text the message already ends with (the usual result of a
/// `{0}` display format) are not repeated.
pub fn diagnostic(err: &(dyn Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.ends_with(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
