//! Protocol constants and enumerations for the tether bridge.

use std::fmt;

// Call methods
pub const DUPLEX_METHOD: &str = "tether.ReverseService/Stream";
pub const SUBSCRIBE_METHOD: &str = "tether.EventService/Subscribe";
pub const PUBLISH_METHOD: &str = "tether.EventService/Publish";

// Identity headers attached to every outgoing call
pub const SELF_UIN_HEADER: &str = "self-uin";
pub const SELF_UID_HEADER: &str = "self-uid";
pub const SELF_VERSION_HEADER: &str = "self-version";

/// Product name used as the prefix of the `self-version` header.
pub const PRODUCT_NAME: &str = "tether";

/// Message carried by every successful response envelope.
pub const SUCCESS_MESSAGE: &str = "success";

// Frame layout sizes
pub const CALL_ID_SIZE: usize = 4;
pub const FRAME_HEADER_SIZE: usize = CALL_ID_SIZE + 1;
pub const MAX_HEADER_FIELD_LEN: usize = u16::MAX as usize;

/// Build the `self-version` value, `<product>-<version>`.
pub fn version_string(version: &str) -> String {
    format!("{PRODUCT_NAME}-{version}")
}

/// The category a domain event originated from.
///
/// Unknown wire values decode to [`EventCategory::Unrecognized`] instead of
/// failing, so that a newer peer cannot break the decoder; every consumer is
/// expected to reject that variant explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    CoreEvent,
    Message,
    Notice,
    Request,
    Unrecognized(u8),
}

impl EventCategory {
    /// The categories a registrar opens registrations for, in registration order.
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Message,
        EventCategory::CoreEvent,
        EventCategory::Request,
        EventCategory::Notice,
    ];

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => EventCategory::CoreEvent,
            1 => EventCategory::Message,
            2 => EventCategory::Notice,
            3 => EventCategory::Request,
            other => EventCategory::Unrecognized(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            EventCategory::CoreEvent => 0,
            EventCategory::Message => 1,
            EventCategory::Notice => 2,
            EventCategory::Request => 3,
            EventCategory::Unrecognized(v) => v,
        }
    }

    pub fn is_recognized(self) -> bool {
        !matches!(self, EventCategory::Unrecognized(_))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::CoreEvent => "CORE_EVENT",
            EventCategory::Message => "MESSAGE",
            EventCategory::Notice => "NOTICE",
            EventCategory::Request => "REQUEST",
            EventCategory::Unrecognized(_) => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Unrecognized(v) => write!(f, "UNRECOGNIZED({v})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Outcome code of a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    Internal,
    Unrecognized(u8),
}

impl ResponseCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ResponseCode::Success,
            1 => ResponseCode::Internal,
            other => ResponseCode::Unrecognized(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::Internal => 1,
            ResponseCode::Unrecognized(v) => v,
        }
    }
}
