//! Batch container: stages application messages into one send operation.

use crate::error::Error;
use bytes::{Bytes, BytesMut};
use strym_protocol::{push_batch_entry, MessageId, MessageMetadata};
use tokio::sync::oneshot;

/// Accumulates messages until a count, size, or time threshold closes the
/// batch out into a single send operation.
///
/// The batch's sequence id is the sequence id of its first message, and the
/// first message's metadata becomes the outer metadata of the batched send.
/// Payload bytes are copied into the composed buffer on append, so the
/// caller's payload handle can be dropped immediately. Compression and the
/// checksum are applied at flush time over the composed payload.
pub(crate) struct BatchContainer {
    max_messages: usize,
    max_bytes: usize,
    entries: BytesMut,
    receipts: Vec<oneshot::Sender<Result<MessageId, Error>>>,
    current_size_bytes: usize,
    sequence_id: u64,
    first_metadata: Option<MessageMetadata>,
}

/// A closed-out batch, ready to be compressed and framed.
pub(crate) struct ClosedBatch {
    pub sequence_id: u64,
    pub metadata: MessageMetadata,
    /// Composed uncompressed payload (`[len][entry]` cells in order)
    pub payload: Bytes,
    pub receipts: Vec<oneshot::Sender<Result<MessageId, Error>>>,
    pub num_messages: u32,
    pub size_bytes: usize,
}

impl BatchContainer {
    pub fn new(max_messages: usize, max_bytes: usize) -> Self {
        Self {
            max_messages,
            max_bytes,
            entries: BytesMut::new(),
            receipts: Vec::new(),
            current_size_bytes: 0,
            sequence_id: 0,
            first_metadata: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn num_messages(&self) -> u32 {
        self.receipts.len() as u32
    }

    pub fn size_bytes(&self) -> usize {
        self.current_size_bytes
    }

    /// Whether a payload of `payload_len` bytes fits without breaching the
    /// count or byte limits. An empty batch accepts any message.
    pub fn has_space_for(&self, payload_len: usize) -> bool {
        if self.receipts.is_empty() {
            return true;
        }
        self.receipts.len() < self.max_messages
            && self.current_size_bytes + payload_len <= self.max_bytes
    }

    /// Whether the batch has reached a flush threshold.
    pub fn is_full(&self) -> bool {
        self.receipts.len() >= self.max_messages || self.current_size_bytes >= self.max_bytes
    }

    /// Append one message. The first appended message donates its metadata
    /// and sequence id to the batch.
    pub fn add(
        &mut self,
        metadata: MessageMetadata,
        payload: Bytes,
        receipt: oneshot::Sender<Result<MessageId, Error>>,
    ) {
        if self.receipts.is_empty() {
            self.sequence_id = metadata.sequence_id.unwrap_or(0);
            self.first_metadata = Some(metadata);
        }
        self.current_size_bytes += payload.len();
        push_batch_entry(&mut self.entries, &payload);
        self.receipts.push(receipt);
    }

    /// Close the batch out, returning its composed contents and resetting
    /// the container to empty. Returns `None` for an empty batch.
    pub fn close(&mut self) -> Option<ClosedBatch> {
        if self.receipts.is_empty() {
            return None;
        }
        let num_messages = self.receipts.len() as u32;
        let mut metadata = self.first_metadata.take().unwrap_or_default();
        metadata.num_messages_in_batch = Some(num_messages);

        let closed = ClosedBatch {
            sequence_id: self.sequence_id,
            metadata,
            payload: self.entries.split().freeze(),
            receipts: std::mem::take(&mut self.receipts),
            num_messages,
            size_bytes: self.current_size_bytes,
        };
        self.current_size_bytes = 0;
        self.sequence_id = 0;
        Some(closed)
    }

    /// Fail every staged message, returning how many permits to release.
    pub fn fail_all(&mut self, error: &Error) -> u32 {
        let num_messages = self.receipts.len() as u32;
        for receipt in self.receipts.drain(..) {
            let _ = receipt.send(Err(error.clone()));
        }
        self.entries.clear();
        self.current_size_bytes = 0;
        self.first_metadata = None;
        self.sequence_id = 0;
        num_messages
    }
}
