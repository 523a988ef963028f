//! Inbound message-bus unit.

use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

/// Metadata key carrying the correlation id.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Metadata key carrying the partition key.
pub const PARTITION_KEY: &str = "key";

/// Metadata key carrying an `Authorization`-style bearer token.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// A message delivered by the bus client.
///
/// Metadata keys are unique; their order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub uuid: Uuid,
    pub topic: Option<String>,
    pub payload: Bytes,
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Creates a message with a fresh UUID and empty metadata.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            topic: None,
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the topic the message was received from.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Inserts a metadata entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Looks up a metadata value.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
