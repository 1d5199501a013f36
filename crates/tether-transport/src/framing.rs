//! Streaming HDLC frame accumulator for TCP byte streams.
//!
//! TCP delivers an unstructured byte stream; [`FrameAccumulator`] buffers it
//! and yields the unescaped contents of every complete `FLAG ... FLAG` span.

use tether_core::constants::FRAME_HEADER_SIZE;
use tether_core::framing::hdlc::{FLAG, hdlc_unescape};
use tracing::debug;

/// Stateful accumulator that buffers stream data and extracts complete
/// HDLC frames delimited by FLAG (0x7E) bytes.
///
/// - Content shorter than a frame header is discarded (this also covers the
///   empty span between back-to-back FLAGs).
/// - Content with a dangling escape byte is discarded.
/// - The closing FLAG is retained as the potential opening FLAG of the next
///   frame.
pub struct FrameAccumulator {
    buffer: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Feed new data from the stream and extract all complete frames.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        loop {
            let Some(frame_start) = self.buffer.iter().position(|&b| b == FLAG) else {
                // No delimiter anywhere: nothing here can become a frame.
                self.buffer.clear();
                break;
            };
            let Some(offset) = self.buffer[frame_start + 1..]
                .iter()
                .position(|&b| b == FLAG)
            else {
                self.buffer.drain(..frame_start);
                break;
            };
            let frame_end = frame_start + 1 + offset;

            match hdlc_unescape(&self.buffer[frame_start + 1..frame_end]) {
                Ok(frame) if frame.len() >= FRAME_HEADER_SIZE => frames.push(frame),
                Ok(_) => {}
                Err(e) => debug!("discarding malformed frame: {}", e),
            }

            self.buffer.drain(..frame_end);
        }

        frames
    }

    /// Bytes currently buffered waiting for a closing delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
