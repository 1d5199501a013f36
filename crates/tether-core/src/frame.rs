//! Call frames.
//!
//! All calls on a connection are multiplexed as frames tagged with a call id
//! chosen by the side that opened the call. Layout, big-endian:
//!
//! ```text
//! call_id(4) || kind(1) || body
//!
//! OPEN       method_len(2) method header_count(2) { key_len(2) key value_len(2) value }*
//! MESSAGE    payload (rest of frame)
//! HALF_CLOSE (empty)
//! CLOSE      status_code(1) message (rest of frame, UTF-8)
//! ```

use crate::constants::{CALL_ID_SIZE, FRAME_HEADER_SIZE};
use crate::error::FrameError;
use crate::metadata::Metadata;
use crate::status::{Status, StatusCode};

const KIND_OPEN: u8 = 0x01;
const KIND_MESSAGE: u8 = 0x02;
const KIND_HALF_CLOSE: u8 = 0x03;
const KIND_CLOSE: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// Opens a new call for `method` with the given request headers.
    Open { method: String, headers: Metadata },
    /// One message of the call's stream.
    Message(Vec<u8>),
    /// The sender will not send further messages on this call.
    HalfClose,
    /// Terminates the call with a status.
    Close(Status),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub call_id: u32,
    pub body: FrameBody,
}

impl Frame {
    pub fn open(call_id: u32, method: impl Into<String>, headers: Metadata) -> Self {
        Self {
            call_id,
            body: FrameBody::Open {
                method: method.into(),
                headers,
            },
        }
    }

    pub fn message(call_id: u32, payload: Vec<u8>) -> Self {
        Self {
            call_id,
            body: FrameBody::Message(payload),
        }
    }

    pub fn half_close(call_id: u32) -> Self {
        Self {
            call_id,
            body: FrameBody::HalfClose,
        }
    }

    pub fn close(call_id: u32, status: Status) -> Self {
        Self {
            call_id,
            body: FrameBody::Close(status),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.body {
            FrameBody::Open { .. } => "open",
            FrameBody::Message(_) => "message",
            FrameBody::HalfClose => "half_close",
            FrameBody::Close(_) => "close",
        }
    }

    /// Encode the frame into its wire layout (without HDLC delimiters).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.body_len_hint());
        buf.extend_from_slice(&self.call_id.to_be_bytes());

        match &self.body {
            FrameBody::Open { method, headers } => {
                buf.push(KIND_OPEN);
                put_field(&mut buf, method.as_bytes());
                buf.extend_from_slice(&(headers.len() as u16).to_be_bytes());
                for (key, value) in headers.iter() {
                    put_field(&mut buf, key.as_bytes());
                    put_field(&mut buf, value.as_bytes());
                }
            }
            FrameBody::Message(payload) => {
                buf.push(KIND_MESSAGE);
                buf.extend_from_slice(payload);
            }
            FrameBody::HalfClose => buf.push(KIND_HALF_CLOSE),
            FrameBody::Close(status) => {
                buf.push(KIND_CLOSE);
                buf.push(status.code.to_u8());
                buf.extend_from_slice(status.message.as_bytes());
            }
        }

        tracing::trace!(
            call_id = self.call_id,
            kind = self.kind_name(),
            len = buf.len(),
            "encoded frame"
        );

        buf
    }

    /// Decode a frame from its wire layout.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                min: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let call_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let kind = data[CALL_ID_SIZE];
        let body = &data[FRAME_HEADER_SIZE..];

        let body = match kind {
            KIND_OPEN => {
                let mut reader = Reader::new(body);
                let method = reader.string("method")?;
                let count = reader.u16("header count")?;
                let mut headers = Metadata::new();
                for _ in 0..count {
                    let key = reader.string("header key")?;
                    let value = reader.string("header value")?;
                    headers.insert(key, value)?;
                }
                FrameBody::Open { method, headers }
            }
            KIND_MESSAGE => FrameBody::Message(body.to_vec()),
            KIND_HALF_CLOSE => FrameBody::HalfClose,
            KIND_CLOSE => {
                let (&code, message) = body
                    .split_first()
                    .ok_or(FrameError::Truncated("status code"))?;
                let message = std::str::from_utf8(message)
                    .map_err(|_| FrameError::InvalidUtf8("status message"))?;
                FrameBody::Close(Status::new(StatusCode::from_u8(code), message))
            }
            other => return Err(FrameError::UnknownKind(other)),
        };

        let frame = Self { call_id, body };
        tracing::trace!(call_id, kind = frame.kind_name(), "decoded frame");
        Ok(frame)
    }

    fn body_len_hint(&self) -> usize {
        match &self.body {
            FrameBody::Open { method, headers } => {
                4 + method.len() + headers.iter().map(|(k, v)| 4 + k.len() + v.len()).sum::<usize>()
            }
            FrameBody::Message(payload) => payload.len(),
            FrameBody::HalfClose => 0,
            FrameBody::Close(status) => 1 + status.message.len(),
        }
    }
}

fn put_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u16).to_be_bytes());
    buf.extend_from_slice(field);
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], FrameError> {
        if self.data.len() < n {
            return Err(FrameError::Truncated(field));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, FrameError> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self, field: &'static str) -> Result<String, FrameError> {
        let len = self.u16(field)? as usize;
        let bytes = self.take(len, field)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| FrameError::InvalidUtf8(field))
    }
}
