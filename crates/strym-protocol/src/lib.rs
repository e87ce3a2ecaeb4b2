//! Strym Wire Protocol
//!
//! This crate defines the wire protocol types shared between strym clients
//! and brokers. It provides serialization/deserialization for all protocol
//! commands.
//!
//! # Wire Format
//!
//! All commands travel as length-prefixed frames:
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────┐
//! │ Length (4 bytes)│ Payload (N bytes)            │
//! │ Big-endian u32  │ bincode-serialized command   │
//! └─────────────────┴──────────────────────────────┘
//! ```
//!
//! # Protocol Stability
//!
//! The enum variant order is significant for serialization. Changes to
//! variant order will break wire compatibility with existing clients and
//! servers.
//!
//! # Example
//!
//! ```rust
//! use strym_protocol::{encode_frame, decode_frame, Command};
//!
//! let frame = encode_frame(&Command::Ping).unwrap();
//! // First 4 bytes are the big-endian body length
//! let body = &frame[4..];
//! let command = decode_frame(body).unwrap();
//! assert!(matches!(command, Command::Ping));
//! ```

mod commands;
mod error;
mod metadata;
pub mod serde_utils;

pub use commands::{Command, ServerErrorCode};
pub use error::{ProtocolError, Result};
pub use metadata::{
    batch_entries, push_batch_entry, CompressionType, MessageId, MessageMetadata,
};

use bytes::{BufMut, Bytes, BytesMut};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (64 MiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Serialize a command into a complete length-prefixed frame.
pub fn encode_frame(command: &Command) -> Result<Bytes> {
    let body = bincode::serialize(command)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Deserialize a command from a frame body (length prefix already stripped).
pub fn decode_frame(body: &[u8]) -> Result<Command> {
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn frame_roundtrip() {
        let command = Command::Send {
            producer_id: 7,
            sequence_id: 42,
            num_messages: 1,
            metadata: MessageMetadata {
                producer_name: Some("p-1".into()),
                sequence_id: Some(42),
                publish_time: Some(1_700_000_000_000),
                ..Default::default()
            },
            payload: Bytes::from_static(b"hello"),
        };

        let frame = encode_frame(&command).unwrap();
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);

        let decoded = decode_frame(&frame[4..]).unwrap();
        match decoded {
            Command::Send {
                producer_id,
                sequence_id,
                num_messages,
                payload,
                ..
            } => {
                assert_eq!(producer_id, 7);
                assert_eq!(sequence_id, 42);
                assert_eq!(num_messages, 1);
                assert_eq!(&payload[..], b"hello");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_frame(&[0xff; 3]).is_err());
    }
}
