//! Producer statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic per-producer counters, updated on the hot path.
#[derive(Debug, Default)]
pub(crate) struct ProducerStats {
    msgs_sent: AtomicU64,
    bytes_sent: AtomicU64,
    acks_received: AtomicU64,
    send_failed: AtomicU64,
}

impl ProducerStats {
    pub fn record_sent(&self, num_messages: u64, num_bytes: u64) {
        self.msgs_sent.fetch_add(num_messages, Ordering::Relaxed);
        self.bytes_sent.fetch_add(num_bytes, Ordering::Relaxed);
    }

    pub fn record_acks(&self, num_messages: u64) {
        self.acks_received.fetch_add(num_messages, Ordering::Relaxed);
    }

    pub fn record_send_failed(&self, num_messages: u64) {
        self.send_failed.fetch_add(num_messages, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            msgs_sent: self.msgs_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            send_failed: self.send_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of producer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerStatsSnapshot {
    /// Messages handed to the wire (including replays)
    pub msgs_sent: u64,
    /// Payload bytes handed to the wire
    pub bytes_sent: u64,
    /// Messages acknowledged by the broker
    pub acks_received: u64,
    /// Messages that terminated with an error
    pub send_failed: u64,
}

impl ProducerStatsSnapshot {
    /// Messages sent but not yet acknowledged or failed
    pub fn pending(&self) -> u64 {
        self.msgs_sent
            .saturating_sub(self.acks_received + self.send_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ProducerStats::default();
        stats.record_sent(3, 120);
        stats.record_acks(2);
        stats.record_send_failed(1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.msgs_sent, 3);
        assert_eq!(snapshot.bytes_sent, 120);
        assert_eq!(snapshot.acks_received, 2);
        assert_eq!(snapshot.send_failed, 1);
        assert_eq!(snapshot.pending(), 0);
    }
}
