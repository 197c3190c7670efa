//! Values that travel through the broker: client identities and messages.

use std::fmt;
use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};

use crate::broker::topic::TopicPath;

/// Identity of one live connection. A value key, never a reference to the connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One fan-out delivery, shared by every recipient of a publish.
#[derive(Debug)]
pub struct PubSubMessage {
    pub topic: String,
    pub payload: Bytes,
    network_cache: OnceLock<Bytes>,
}

impl PubSubMessage {
    pub fn new(topic: String, payload: Bytes) -> Self {
        Self {
            topic,
            payload,
            network_cache: OnceLock::new(),
        }
    }

    /// `[TopicLen:4][Topic][Payload]`, encoded once no matter how many sessions push it.
    pub fn get_network_packet(&self) -> &Bytes {
        self.network_cache.get_or_init(|| {
            let topic_len = self.topic.len();
            let mut buf = BytesMut::with_capacity(4 + topic_len + self.payload.len());
            buf.put_u32(topic_len as u32);
            buf.put_slice(self.topic.as_bytes());
            buf.put_slice(&self.payload);
            buf.freeze()
        })
    }
}

/// A publish waiting in the intake queue.
#[derive(Debug)]
pub struct PendingMessage {
    pub publisher: ClientId,
    pub topic: TopicPath,
    pub payload: Bytes,
}
