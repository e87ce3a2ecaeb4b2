//! The in-flight window: send operations awaiting broker acknowledgement.

use crate::error::Error;
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Instant;
use strym_protocol::MessageId;
use tokio::sync::oneshot;

/// Completion channel(s) of one send operation. A batched send fans out to
/// every per-message channel in submission order.
#[derive(Debug)]
pub(crate) enum SendReceipts {
    Single(oneshot::Sender<Result<MessageId, Error>>),
    Batch(Vec<oneshot::Sender<Result<MessageId, Error>>>),
}

/// One on-wire send awaiting acknowledgement.
///
/// Immutable after creation. `frame` is the complete pre-serialized wire
/// frame; the window holds this handle for replay and every write dispatch
/// clones it, so the buffer is freed exactly when the last handle drops.
#[derive(Debug)]
pub(crate) struct SendOp {
    pub frame: Bytes,
    pub sequence_id: u64,
    pub num_messages: u32,
    pub batch_size_bytes: usize,
    pub created_at: Instant,
    pub receipts: SendReceipts,
}

impl SendOp {
    /// Complete every callback with its message id. Batched messages share
    /// `(ledger_id, entry_id, partition_index)` and get distinct batch
    /// indexes in submission order.
    pub fn succeed(self, ledger_id: u64, entry_id: u64, partition_index: i32) {
        let base = MessageId::new(ledger_id, entry_id, partition_index);
        match self.receipts {
            SendReceipts::Single(tx) => {
                let _ = tx.send(Ok(base));
            }
            SendReceipts::Batch(txs) => {
                for (batch_index, tx) in txs.into_iter().enumerate() {
                    let _ = tx.send(Ok(base.with_batch_index(batch_index as u32)));
                }
            }
        }
    }

    /// Complete every callback with the same error.
    pub fn fail(self, error: Error) {
        match self.receipts {
            SendReceipts::Single(tx) => {
                let _ = tx.send(Err(error));
            }
            SendReceipts::Batch(txs) => {
                for tx in txs {
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
    }
}

/// Bounded FIFO of send operations ordered by sequence id; the head is
/// always the oldest unacknowledged send. Admission is governed by the
/// producer's backpressure semaphore, so pushes here never exceed capacity.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    ops: VecDeque<SendOp>,
}

impl PendingQueue {
    pub fn push(&mut self, op: SendOp) {
        debug_assert!(self
            .ops
            .back()
            .map(|prev| prev.sequence_id < op.sequence_id)
            .unwrap_or(true));
        self.ops.push_back(op);
    }

    pub fn peek(&self) -> Option<&SendOp> {
        self.ops.front()
    }

    pub fn pop(&mut self) -> Option<SendOp> {
        self.ops.pop_front()
    }

    /// Drain every operation, returning them in order together with the
    /// total number of permits they hold.
    pub fn drain(&mut self) -> (Vec<SendOp>, u32) {
        let permits = self.ops.iter().map(|op| op.num_messages).sum();
        (self.ops.drain(..).collect(), permits)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SendOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
