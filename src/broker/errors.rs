//! Broker error taxonomy.

use thiserror::Error;

/// Malformed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter is empty")]
    Empty,
    #[error("multi-level wildcard must be the last segment (found at segment {position})")]
    MultiLevelNotLast { position: usize },
    #[error("wildcard mixed with literal text in segment '{segment}'")]
    MixedWildcard { segment: String },
}

/// Malformed concrete topic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,
    #[error("topic segment '{segment}' contains a wildcard character")]
    Wildcard { segment: String },
}

/// A single recipient could not be written to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The receiving side is gone. Never recovers.
    #[error("delivery handle closed")]
    Closed,
    /// The recipient's buffer is full. May recover once the client catches up.
    #[error("delivery buffer full")]
    Full,
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Closed)
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error("broker is already running")]
    AlreadyRunning,
    #[error("broker is not running")]
    NotRunning,
    #[error("client {0} is not connected")]
    UnknownClient(String),
    #[error("intake queue is full")]
    QueueFull,
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
