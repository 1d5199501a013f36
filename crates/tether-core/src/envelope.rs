//! Request, response, and event envelopes with msgpack serialization.
//!
//! Envelopes are the messages carried inside calls. Each one is a msgpack
//! array; payload bytes are opaque to the bridge and travel as msgpack `bin`.

use rmpv::Value;

use crate::constants::{EventCategory, ResponseCode, SUCCESS_MESSAGE};
use crate::error::EnvelopeError;

const UPSTREAM_RESPONSE: u64 = 0;
const UPSTREAM_EVENT: u64 = 1;

/// A command sent by the remote controller: `[cmd, seq, payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub cmd: u32,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl RequestEnvelope {
    pub fn new(cmd: u32, seq: u32, payload: Vec<u8>) -> Self {
        Self { cmd, seq, payload }
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.cmd),
            Value::from(self.seq),
            Value::Binary(self.payload.clone()),
        ])
    }

    fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let [cmd, seq, payload] = fixed_array::<3>(value)?;
        Ok(Self {
            cmd: as_u32(&cmd, "cmd")?,
            seq: as_u32(&seq, "seq")?,
            payload: into_binary(payload, "payload")?,
        })
    }

    pub fn to_msgpack(&self) -> Vec<u8> {
        pack(&self.to_value())
    }

    pub fn from_msgpack(data: &[u8]) -> Result<Self, EnvelopeError> {
        Self::from_value(unpack(data)?)
    }
}

/// The correlated answer to a [`RequestEnvelope`]: `[cmd, seq, code, message, payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub cmd: u32,
    pub seq: u32,
    pub code: ResponseCode,
    pub message: String,
    pub payload: Vec<u8>,
}

impl ResponseEnvelope {
    /// Successful response carrying the handler output.
    pub fn success(request: &RequestEnvelope, payload: Vec<u8>) -> Self {
        Self {
            cmd: request.cmd,
            seq: request.seq,
            code: ResponseCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
            payload,
        }
    }

    /// Failed response carrying a diagnostic message and no payload.
    pub fn internal_error(request: &RequestEnvelope, message: impl Into<String>) -> Self {
        Self {
            cmd: request.cmd,
            seq: request.seq,
            code: ResponseCode::Internal,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.cmd),
            Value::from(self.seq),
            Value::from(self.code.to_u8()),
            Value::from(self.message.as_str()),
            Value::Binary(self.payload.clone()),
        ])
    }

    fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let [cmd, seq, code, message, payload] = fixed_array::<5>(value)?;
        let code = u8::try_from(as_u64(&code, "code")?)
            .map_err(|_| EnvelopeError::InvalidField("code"))?;
        Ok(Self {
            cmd: as_u32(&cmd, "cmd")?,
            seq: as_u32(&seq, "seq")?,
            code: ResponseCode::from_u8(code),
            message: message
                .as_str()
                .ok_or(EnvelopeError::InvalidField("message"))?
                .to_string(),
            payload: into_binary(payload, "payload")?,
        })
    }

    pub fn to_msgpack(&self) -> Vec<u8> {
        pack(&self.to_value())
    }

    pub fn from_msgpack(data: &[u8]) -> Result<Self, EnvelopeError> {
        Self::from_value(unpack(data)?)
    }
}

/// A one-way domain event: `[category, payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub category: EventCategory,
    pub payload: Vec<u8>,
}

impl EventEnvelope {
    pub fn new(category: EventCategory, payload: Vec<u8>) -> Self {
        Self { category, payload }
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.category.to_u8()),
            Value::Binary(self.payload.clone()),
        ])
    }

    fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let [category, payload] = fixed_array::<2>(value)?;
        Ok(Self {
            category: as_category(&category)?,
            payload: into_binary(payload, "payload")?,
        })
    }

    pub fn to_msgpack(&self) -> Vec<u8> {
        pack(&self.to_value())
    }

    pub fn from_msgpack(data: &[u8]) -> Result<Self, EnvelopeError> {
        Self::from_value(unpack(data)?)
    }
}

/// Everything the bridge sends upstream on the duplex call: `[kind, envelope]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEnvelope {
    Response(ResponseEnvelope),
    Event(EventEnvelope),
}

impl UpstreamEnvelope {
    pub fn to_msgpack(&self) -> Vec<u8> {
        let (kind, inner) = match self {
            UpstreamEnvelope::Response(r) => (UPSTREAM_RESPONSE, r.to_value()),
            UpstreamEnvelope::Event(e) => (UPSTREAM_EVENT, e.to_value()),
        };
        pack(&Value::Array(vec![Value::from(kind), inner]))
    }

    pub fn from_msgpack(data: &[u8]) -> Result<Self, EnvelopeError> {
        let [kind, inner] = fixed_array::<2>(unpack(data)?)?;
        match as_u64(&kind, "kind")? {
            UPSTREAM_RESPONSE => Ok(UpstreamEnvelope::Response(ResponseEnvelope::from_value(
                inner,
            )?)),
            UPSTREAM_EVENT => Ok(UpstreamEnvelope::Event(EventEnvelope::from_value(inner)?)),
            other => Err(EnvelopeError::UnknownKind(other)),
        }
    }

    /// The sequence number when this is a response, for log correlation.
    pub fn seq(&self) -> Option<u32> {
        match self {
            UpstreamEnvelope::Response(r) => Some(r.seq),
            UpstreamEnvelope::Event(_) => None,
        }
    }
}

impl From<ResponseEnvelope> for UpstreamEnvelope {
    fn from(r: ResponseEnvelope) -> Self {
        UpstreamEnvelope::Response(r)
    }
}

impl From<EventEnvelope> for UpstreamEnvelope {
    fn from(e: EventEnvelope) -> Self {
        UpstreamEnvelope::Event(e)
    }
}

/// Selector sent by a peer on a server-push registration call: `[category]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRequest {
    pub category: EventCategory,
}

impl RegisterRequest {
    pub fn new(category: EventCategory) -> Self {
        Self { category }
    }

    pub fn to_msgpack(&self) -> Vec<u8> {
        pack(&Value::Array(vec![Value::from(self.category.to_u8())]))
    }

    pub fn from_msgpack(data: &[u8]) -> Result<Self, EnvelopeError> {
        let [category] = fixed_array::<1>(unpack(data)?)?;
        Ok(Self {
            category: as_category(&category)?,
        })
    }
}

fn pack(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).expect("msgpack encode into a Vec should not fail");
    buf
}

fn unpack(data: &[u8]) -> Result<Value, EnvelopeError> {
    rmpv::decode::read_value(&mut &data[..]).map_err(|e| EnvelopeError::Decode(e.to_string()))
}

fn fixed_array<const N: usize>(value: Value) -> Result<[Value; N], EnvelopeError> {
    match value {
        Value::Array(items) => {
            let actual = items.len();
            items
                .try_into()
                .map_err(|_| EnvelopeError::ShapeMismatch {
                    expected: N,
                    actual,
                })
        }
        _ => Err(EnvelopeError::InvalidField("envelope is not an array")),
    }
}

fn as_u64(value: &Value, field: &'static str) -> Result<u64, EnvelopeError> {
    value.as_u64().ok_or(EnvelopeError::InvalidField(field))
}

fn as_u32(value: &Value, field: &'static str) -> Result<u32, EnvelopeError> {
    u32::try_from(as_u64(value, field)?).map_err(|_| EnvelopeError::InvalidField(field))
}

fn as_category(value: &Value) -> Result<EventCategory, EnvelopeError> {
    let raw = as_u64(value, "category")?;
    let raw = u8::try_from(raw).map_err(|_| EnvelopeError::InvalidField("category"))?;
    Ok(EventCategory::from_u8(raw))
}

fn into_binary(value: Value, field: &'static str) -> Result<Vec<u8>, EnvelopeError> {
    match value {
        Value::Binary(bytes) => Ok(bytes),
        _ => Err(EnvelopeError::InvalidField(field)),
    }
}
