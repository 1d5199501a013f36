//! HDLC byte-stuffing framing.
//!
//! Every encoded [`Frame`](crate::frame::Frame) travels on the TCP stream as
//! `FLAG + escape(frame) + FLAG`. ESC bytes must be escaped before FLAG bytes.

use crate::error::FramingError;

pub const FLAG: u8 = 0x7E;
pub const ESC: u8 = 0x7D;
pub const ESC_MASK: u8 = 0x20;

/// Append the byte-stuffed form of `data` to `out`.
pub fn hdlc_escape_into(data: &[u8], out: &mut Vec<u8>) {
    out.reserve(data.len());
    for &byte in data {
        if byte == ESC || byte == FLAG {
            out.push(ESC);
            out.push(byte ^ ESC_MASK);
        } else {
            out.push(byte);
        }
    }
}

/// Escape special bytes in data using HDLC byte-stuffing.
pub fn hdlc_escape(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    hdlc_escape_into(data, &mut result);
    result
}

/// Frame data with HDLC delimiters: FLAG + escape(data) + FLAG.
pub fn hdlc_frame(data: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(data.len() + 2);
    framed.push(FLAG);
    hdlc_escape_into(data, &mut framed);
    framed.push(FLAG);
    framed
}

/// Reverse byte-stuffing on the content between two delimiters.
pub fn hdlc_unescape(inner: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut result = Vec::with_capacity(inner.len());
    let mut bytes = inner.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESC {
            let next = bytes.next().ok_or(FramingError::IncompleteEscape)?;
            result.push(next ^ ESC_MASK);
        } else {
            result.push(byte);
        }
    }
    Ok(result)
}

/// Remove HDLC framing: strip delimiters and unescape data.
pub fn hdlc_unframe(framed: &[u8]) -> Result<Vec<u8>, FramingError> {
    match framed {
        [FLAG, inner @ .., FLAG] => hdlc_unescape(inner),
        _ => Err(FramingError::MissingDelimiter),
    }
}
