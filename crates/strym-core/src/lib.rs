//! Shared building blocks for strym clients and brokers.
//!
//! - [`compression`]: payload codecs (none, LZ4, zlib)
//! - [`checksum`]: payload integrity checksum
//! - [`backoff`]: reconnect backoff with jitter

pub mod backoff;
pub mod checksum;
pub mod compression;

pub use backoff::Backoff;
pub use checksum::payload_checksum;
pub use compression::{Codec, CompressionError};
