//! Application messages handed to `send_async`.

use bytes::Bytes;
use strym_protocol::MessageMetadata;

/// An application message: a payload buffer plus the metadata the producer
/// stamps during the send pipeline.
///
/// A message is consumed by one send. The producer stamps its name into the
/// metadata, so handing the same message to `send_async` twice fails with
/// `InvalidMessage` (replicated copies are exempt).
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Bytes,
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Set the key used for partition routing.
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.metadata.partition_key = Some(key.into());
        self
    }

    /// Set the application event timestamp (milliseconds since the epoch).
    pub fn with_event_time(mut self, event_time: u64) -> Self {
        self.metadata.event_time = Some(event_time);
        self
    }

    /// Attach a string property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.properties.push((key.into(), value.into()));
        self
    }

    /// Mark this message as a replicated copy; replicated messages keep their
    /// original producer name and bypass the reuse check.
    pub fn replicated(mut self) -> Self {
        self.metadata.replicated = true;
        self
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Message::new(payload)
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Message::new(payload)
    }
}

impl From<&str> for Message {
    fn from(payload: &str) -> Self {
        Message::new(payload.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_stamps_metadata() {
        let msg = Message::new("payload")
            .with_partition_key("key-1")
            .with_event_time(1_700_000_000_000)
            .with_property("source", "sensor-9");

        assert_eq!(&msg.payload[..], b"payload");
        assert_eq!(msg.metadata.partition_key.as_deref(), Some("key-1"));
        assert_eq!(msg.metadata.event_time, Some(1_700_000_000_000));
        assert_eq!(msg.metadata.properties.len(), 1);
        assert!(!msg.metadata.replicated);
    }

    #[test]
    fn replicated_marker() {
        assert!(Message::new("x").replicated().metadata.replicated);
    }
}
