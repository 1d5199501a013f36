//! Error types for the transport layer.

use tether_core::{FrameError, MetadataError, Status};

/// Errors that can occur while connecting, opening calls, or exchanging messages.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("invalid header: {0}")]
    Metadata(#[from] MetadataError),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connect to {endpoint} failed after {attempts} attempt(s): {source}")]
    ConnectFailed {
        endpoint: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("connection lost")]
    ConnectionLost,
    #[error("channel shut down")]
    Shutdown,
    #[error("call already finished")]
    CallFinished,
    #[error("call failed: {0}")]
    Status(#[from] Status),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// The terminal status the peer sent, when this error carries one.
    pub fn status(&self) -> Option<&Status> {
        match self {
            TransportError::Status(status) => Some(status),
            _ => None,
        }
    }
}
