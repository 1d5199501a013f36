//! Core types, constants, and wire formats for the tether RPC bridge.
//!
//! This crate defines the call frames exchanged on a tether connection, the
//! HDLC framing that delimits them on a byte stream, call headers and status
//! trailers, and the request/response/event envelopes carried inside calls.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod framing;
pub mod metadata;
pub mod status;

pub use constants::{EventCategory, ResponseCode};
pub use envelope::{
    EventEnvelope, RegisterRequest, RequestEnvelope, ResponseEnvelope, UpstreamEnvelope,
};
pub use error::{EnvelopeError, FrameError, FramingError, MetadataError};
pub use frame::{Frame, FrameBody};
pub use metadata::Metadata;
pub use status::{Status, StatusCode};
