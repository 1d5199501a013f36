//! Error types for the tether-core crate.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum FramingError {
    MissingDelimiter,
    IncompleteEscape,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::MissingDelimiter => write!(f, "missing frame delimiter"),
            FramingError::IncompleteEscape => write!(f, "incomplete escape sequence"),
        }
    }
}

impl std::error::Error for FramingError {}

#[derive(Debug, PartialEq, Eq)]
pub enum MetadataError {
    EmptyKey,
    InvalidKey(String),
    InvalidValue { key: String },
    TooLong { len: usize, max: usize },
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::EmptyKey => write!(f, "header key must not be empty"),
            MetadataError::InvalidKey(key) => write!(f, "invalid header key: {key:?}"),
            MetadataError::InvalidValue { key } => {
                write!(f, "header {key:?} has a non-ASCII or control character value")
            }
            MetadataError::TooLong { len, max } => {
                write!(f, "header field too long: {len} bytes (max {max})")
            }
        }
    }
}

impl std::error::Error for MetadataError {}

#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    TooShort { min: usize, actual: usize },
    UnknownKind(u8),
    Truncated(&'static str),
    InvalidUtf8(&'static str),
    Metadata(MetadataError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort { min, actual } => {
                write!(f, "frame too short: need at least {min} bytes, got {actual}")
            }
            FrameError::UnknownKind(v) => write!(f, "unknown frame kind: 0x{v:02x}"),
            FrameError::Truncated(field) => write!(f, "frame truncated while reading {field}"),
            FrameError::InvalidUtf8(field) => write!(f, "{field} is not valid UTF-8"),
            FrameError::Metadata(e) => write!(f, "metadata error: {e}"),
        }
    }
}

impl From<MetadataError> for FrameError {
    fn from(e: MetadataError) -> Self {
        FrameError::Metadata(e)
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    Decode(String),
    ShapeMismatch { expected: usize, actual: usize },
    InvalidField(&'static str),
    UnknownKind(u64),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Decode(reason) => write!(f, "msgpack decode error: {reason}"),
            EnvelopeError::ShapeMismatch { expected, actual } => {
                write!(f, "expected {expected}-element array, got {actual} elements")
            }
            EnvelopeError::InvalidField(field) => write!(f, "invalid envelope field: {field}"),
            EnvelopeError::UnknownKind(v) => write!(f, "unknown upstream envelope kind: {v}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}
