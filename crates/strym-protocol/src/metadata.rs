//! Message metadata, message ids, and batch payload layout.

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Compression applied to a send payload.
///
/// The variant order is wire-significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
    Zlib,
}

impl CompressionType {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zlib => "zlib",
        }
    }
}

/// Metadata stamped on every outbound send.
///
/// The producer fills `producer_name`, `sequence_id` and `publish_time` at
/// send time; a populated `producer_name` marks a message that has already
/// been through a producer once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub producer_name: Option<String>,
    pub sequence_id: Option<u64>,
    /// Publish timestamp, milliseconds since the unix epoch
    pub publish_time: Option<u64>,
    /// xxh64 checksum over the uncompressed payload
    pub checksum: Option<u64>,
    pub compression: CompressionType,
    pub uncompressed_size: Option<u32>,
    pub partition_key: Option<String>,
    /// Application-assigned event timestamp, milliseconds since the unix epoch
    pub event_time: Option<u64>,
    pub properties: Vec<(String, String)>,
    pub num_messages_in_batch: Option<u32>,
    /// Set on messages copied in by replication; they bypass the reuse check.
    pub replicated: bool,
}

/// Identifier of a persisted message, returned to the application on ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub ledger_id: u64,
    pub entry_id: u64,
    pub partition_index: i32,
    /// Position within a batched send; `None` for singleton sends.
    pub batch_index: Option<u32>,
}

impl MessageId {
    pub fn new(ledger_id: u64, entry_id: u64, partition_index: i32) -> Self {
        Self {
            ledger_id,
            entry_id,
            partition_index,
            batch_index: None,
        }
    }

    pub fn with_batch_index(mut self, batch_index: u32) -> Self {
        self.batch_index = Some(batch_index);
        self
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.batch_index {
            Some(idx) => write!(
                f,
                "{}:{}:{}:{}",
                self.ledger_id, self.entry_id, self.partition_index, idx
            ),
            None => write!(
                f,
                "{}:{}:{}",
                self.ledger_id, self.entry_id, self.partition_index
            ),
        }
    }
}

/// Append one entry to a composed batch payload.
///
/// Batched payloads are a sequence of `[u32-LE length][entry bytes]` cells in
/// submission order; `num_messages_in_batch` on the outer metadata carries
/// the cell count.
pub fn push_batch_entry(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
}

/// Split a decompressed batch payload back into its entries.
pub fn batch_entries(data: &Bytes) -> Result<Vec<Bytes>> {
    let mut entries = Vec::new();
    let mut position = 0usize;
    while position < data.len() {
        if position + 4 > data.len() {
            return Err(ProtocolError::TruncatedBatch(position));
        }
        let len_bytes: [u8; 4] = data[position..position + 4].try_into().expect("4 bytes");
        let len = u32::from_le_bytes(len_bytes) as usize;
        position += 4;
        if position + len > data.len() {
            return Err(ProtocolError::TruncatedBatch(position));
        }
        entries.push(data.slice(position..position + len));
        position += len;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_entries_roundtrip() {
        let mut buf = BytesMut::new();
        push_batch_entry(&mut buf, b"a");
        push_batch_entry(&mut buf, b"bb");
        push_batch_entry(&mut buf, b"");

        let entries = batch_entries(&buf.freeze()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(&entries[0][..], b"a");
        assert_eq!(&entries[1][..], b"bb");
        assert!(entries[2].is_empty());
    }

    #[test]
    fn batch_entries_truncated() {
        let mut buf = BytesMut::new();
        push_batch_entry(&mut buf, b"payload");
        let data = buf.freeze().slice(0..6);
        assert!(batch_entries(&data).is_err());
    }

    #[test]
    fn message_id_display() {
        let id = MessageId::new(42, 7, 0);
        assert_eq!(id.to_string(), "42:7:0");
        assert_eq!(id.with_batch_index(2).to_string(), "42:7:0:2");
    }
}
