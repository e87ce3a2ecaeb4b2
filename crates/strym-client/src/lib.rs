//! # strym-client
//!
//! Native async Rust producer client for strym, the partitioned pub/sub
//! event streaming platform.
//!
//! ## Features
//!
//! - **Async/Await**: built on Tokio for high-performance async I/O
//! - **In-flight pipelining**: a bounded window of unacknowledged sends with
//!   semaphore backpressure (`max_pending_messages`)
//! - **Strict ordering**: producer-local sequence ids; wire order equals
//!   submission order, across reconnects
//! - **Batching**: count/size/time-triggered coalescing of messages into a
//!   single wire send
//! - **Compression**: LZ4 and zlib payload compression
//! - **Automatic reconnect**: exponential backoff with jitter, and in-order
//!   replay of every unacknowledged send on the new connection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strym_client::{Producer, ProducerConfig, TcpConnector};
//!
//! # async fn example() -> strym_client::Result<()> {
//! let connector = Arc::new(TcpConnector::new("127.0.0.1:6650"));
//! let config = ProducerConfig::builder()
//!     .max_pending_messages(1000)
//!     .batching_enabled(true)
//!     .batching_max_messages(100)
//!     .batching_max_publish_delay_ms(5)
//!     .build();
//!
//! let producer = Producer::new(connector, "persistent/events", 0, config).await?;
//!
//! let receipt = producer.send_async("hello strym").await;
//! let message_id = receipt.await?;
//! println!("persisted as {message_id}");
//!
//! producer.close_async().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery semantics
//!
//! Every accepted send resolves exactly once: with the broker-assigned
//! [`MessageId`], or with one of the errors in [`Error`]. On disconnect the
//! producer replays its unacknowledged window on the next connection, so a
//! broker may observe a send twice but never out of order.
//!
//! Send futures may complete on the connection's reader task; do not block
//! inside continuations chained on them.

mod batch;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod producer;
mod stats;
mod window;

pub use config::{ProducerConfig, ProducerConfigBuilder};
pub use connection::{Connection, ConnectionProvider, ProducerHandler, TcpConnection, TcpConnector};
pub use error::{Error, Result};
pub use message::Message;
pub use producer::{Producer, ProducerState, SendFuture};
pub use stats::ProducerStatsSnapshot;

// Re-export the protocol types that appear in the public API
pub use strym_protocol::{CompressionType, MessageId, MessageMetadata};
