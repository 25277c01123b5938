//! Length-prefixed JSON framing
//!
//! Frame format:
//! ```text
//! +---------------+------------------+
//! | length        | payload          |
//! | (4 bytes, BE) | (variable, JSON) |
//! +---------------+------------------+
//! ```
//!
//! Commands and events are self-describing tagged unions, so the frame
//! carries no type byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::io::{self, Error as IoError, ErrorKind};

/// Frame header size: 4 bytes length
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum frame payload size (256 KB)
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Encode a message into a complete frame
pub fn encode_frame<T: Serialize>(msg: &T) -> io::Result<Bytes> {
    let payload = serde_json::to_vec(msg).map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", payload.len()),
        ));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Incremental frame decoder over a growable buffer
///
/// Feed raw bytes with `extend`, then drain complete payloads with
/// `next_frame` until it returns `None`.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append raw bytes received from the transport
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to extract the next complete frame payload
    pub fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let len = {
            let mut peek = &self.buf[..FRAME_HEADER_SIZE];
            peek.get_u32() as usize
        };

        if len > self.max_frame_size {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("Frame exceeds limit: {} bytes", len),
            ));
        }

        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Bytes currently buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ClientCommand;

    #[test]
    fn test_encode_decode_roundtrip() {
        let cmd = ClientCommand::SendMessage {
            room_id: "stream_abc".to_string(),
            message: "Hello, World!".to_string(),
            reply_to: None,
        };

        let frame = encode_frame(&cmd).unwrap();
        assert!(frame.len() > FRAME_HEADER_SIZE);

        let mut decoder = FrameDecoder::default();
        decoder.extend(&frame);
        let payload = decoder.next_frame().unwrap().expect("complete frame");

        let decoded: ClientCommand = serde_json::from_slice(&payload).unwrap();
        match decoded {
            ClientCommand::SendMessage { room_id, message, .. } => {
                assert_eq!(room_id, "stream_abc");
                assert_eq!(message, "Hello, World!");
            }
            _ => panic!("Expected send-message"),
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_frames() {
        let cmd = ClientCommand::Ping { timestamp: 42 };
        let frame = encode_frame(&cmd).unwrap();

        let mut decoder = FrameDecoder::default();
        decoder.extend(&frame[..2]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&frame[2..frame.len() - 1]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&frame[frame.len() - 1..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let a = encode_frame(&ClientCommand::Ping { timestamp: 1 }).unwrap();
        let b = encode_frame(&ClientCommand::Ping { timestamp: 2 }).unwrap();

        let mut joined = BytesMut::new();
        joined.extend_from_slice(&a);
        joined.extend_from_slice(&b);

        let mut decoder = FrameDecoder::default();
        decoder.extend(&joined);
        assert!(decoder.next_frame().unwrap().is_some());
        assert!(decoder.next_frame().unwrap().is_some());
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = FrameDecoder::new(8);
        let mut buf = BytesMut::new();
        buf.put_u32(64);
        buf.put_slice(&[0u8; 64]);
        decoder.extend(&buf);
        assert!(decoder.next_frame().is_err());
    }
}
