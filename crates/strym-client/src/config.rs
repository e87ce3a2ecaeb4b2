//! Producer configuration.

use std::time::Duration;
use strym_protocol::CompressionType;

/// Default in-flight window capacity
const DEFAULT_MAX_PENDING_MESSAGES: usize = 1000;
/// Default per-send timeout
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Default producer-creation / RPC timeout
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default batch message count limit
const DEFAULT_BATCHING_MAX_MESSAGES: usize = 1000;
/// Default maximum delay before a partial batch is flushed
const DEFAULT_BATCHING_MAX_PUBLISH_DELAY: Duration = Duration::from_millis(10);
/// Hard cap on the accumulated uncompressed size of one batch
const DEFAULT_MAX_BATCH_BYTES: usize = 128 * 1024;

/// Producer configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Capacity of the in-flight window and its backpressure semaphore;
    /// one permit per application message.
    pub max_pending_messages: usize,
    /// Block `send_async` when the window is full instead of failing with
    /// `QueueFull`.
    pub block_if_queue_full: bool,
    /// Per-send deadline; zero disables the timeout sweeper.
    pub send_timeout: Duration,
    /// Compression applied to send payloads.
    pub compression_type: CompressionType,
    /// Coalesce messages into batched sends.
    pub batching_enabled: bool,
    /// Maximum number of messages in one batch.
    pub batching_max_messages: usize,
    /// Maximum time a partial batch may wait before being flushed.
    pub batching_max_publish_delay: Duration,
    /// Hard cap on the accumulated uncompressed bytes of one batch.
    pub max_batch_bytes: usize,
    /// Interval for the periodic stats report; zero disables stats.
    pub stats_interval: Duration,
    /// Deadline for producer creation and RPCs.
    pub operation_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            block_if_queue_full: false,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            compression_type: CompressionType::None,
            batching_enabled: false,
            batching_max_messages: DEFAULT_BATCHING_MAX_MESSAGES,
            batching_max_publish_delay: DEFAULT_BATCHING_MAX_PUBLISH_DELAY,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            stats_interval: Duration::ZERO,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl ProducerConfig {
    /// Create a new builder
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }
}

/// Builder for ProducerConfig
#[derive(Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    /// Set the in-flight window capacity
    pub fn max_pending_messages(mut self, max: usize) -> Self {
        self.config.max_pending_messages = max;
        self
    }

    /// Block instead of failing with `QueueFull` when the window is full
    pub fn block_if_queue_full(mut self, block: bool) -> Self {
        self.config.block_if_queue_full = block;
        self
    }

    /// Set the per-send timeout in milliseconds; 0 disables the sweeper
    pub fn send_timeout_ms(mut self, ms: u64) -> Self {
        self.config.send_timeout = Duration::from_millis(ms);
        self
    }

    /// Set the payload compression type
    pub fn compression_type(mut self, compression: CompressionType) -> Self {
        self.config.compression_type = compression;
        self
    }

    /// Enable or disable batching
    pub fn batching_enabled(mut self, enabled: bool) -> Self {
        self.config.batching_enabled = enabled;
        self
    }

    /// Set the maximum number of messages per batch
    pub fn batching_max_messages(mut self, max: usize) -> Self {
        self.config.batching_max_messages = max;
        self
    }

    /// Set the maximum publish delay for partial batches, in milliseconds
    pub fn batching_max_publish_delay_ms(mut self, ms: u64) -> Self {
        self.config.batching_max_publish_delay = Duration::from_millis(ms);
        self
    }

    /// Set the hard cap on accumulated batch bytes
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.max_batch_bytes = bytes;
        self
    }

    /// Set the stats report interval in seconds; 0 disables stats
    pub fn stats_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.stats_interval = Duration::from_secs(seconds);
        self
    }

    /// Set the producer-creation / RPC timeout
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ProducerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = ProducerConfig::builder()
            .max_pending_messages(8)
            .block_if_queue_full(true)
            .send_timeout_ms(100)
            .compression_type(CompressionType::Lz4)
            .batching_enabled(true)
            .batching_max_messages(3)
            .batching_max_publish_delay_ms(50)
            .stats_interval_seconds(5)
            .build();

        assert_eq!(config.max_pending_messages, 8);
        assert!(config.block_if_queue_full);
        assert_eq!(config.send_timeout, Duration::from_millis(100));
        assert_eq!(config.compression_type, CompressionType::Lz4);
        assert!(config.batching_enabled);
        assert_eq!(config.batching_max_messages, 3);
        assert_eq!(config.batching_max_publish_delay, Duration::from_millis(50));
        assert_eq!(config.stats_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_send_timeout_disables_sweeper() {
        let config = ProducerConfig::builder().send_timeout_ms(0).build();
        assert!(config.send_timeout.is_zero());
    }

    #[test]
    fn defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.max_pending_messages, 1000);
        assert!(!config.block_if_queue_full);
        assert_eq!(config.compression_type, CompressionType::None);
        assert!(!config.batching_enabled);
        assert!(config.stats_interval.is_zero());
    }
}
