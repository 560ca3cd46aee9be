//! Length-prefixed frame codec.
//!
//! Each frame is a 4-byte big-endian body length followed by the JSON
//! body. The prefix makes payload content byte-transparent: an input token
//! or game value may contain any character without corrupting the stream.

use crate::{Message, ProtocolError};

/// Upper bound on a single frame body. Anything larger is a protocol
/// violation rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const LEN_PREFIX_SIZE: usize = 4;

/// Serializes one message into a wire frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Accumulates raw socket reads and yields complete messages in arrival
/// order. Owned exclusively by one receive loop, never shared.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes and drains every complete frame.
    ///
    /// Partial bytes, including a partial length prefix, are retained for
    /// the next call. A malformed body or oversized length is fatal to the
    /// connection; the caller must stop reading.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while self.buffer.len() >= LEN_PREFIX_SIZE {
            let len =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;
            if len > MAX_FRAME_LEN {
                return Err(ProtocolError::FrameTooLarge(len));
            }
            if self.buffer.len() < LEN_PREFIX_SIZE + len {
                break;
            }

            let message = serde_json::from_slice(&self.buffer[LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + len])?;
            self.buffer.drain(..LEN_PREFIX_SIZE + len);
            messages.push(message);
        }

        Ok(messages)
    }

    /// Bytes buffered but not yet resolved into a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
