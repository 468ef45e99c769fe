use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::conversions::headers::RawHeader;

use super::consumer::ConsumerConfig;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker client is not connected")]
    NotConnected,

    #[error("broker client is not subscribed to any topic")]
    NotSubscribed,

    #[error("invalid topic pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("broker error: {0}")]
    Other(String),
}

/// A record as read from the broker, before any decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Record timestamp in milliseconds since the unix epoch.
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<(String, Option<RawHeader>)>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> RawMessage {
        RawMessage {
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
            key: None,
            value: None,
            headers: vec![],
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Option<RawHeader>) -> Self {
        self.headers.push((name.into(), value));
        self
    }
}

/// The message broker as seen by the consumer: connect, subscribe by
/// pattern, receive records one at a time, disconnect.
///
/// `recv` must be cancel safe, the consumer races it against shutdown.
#[async_trait]
pub trait BrokerClient: Send {
    async fn connect(&mut self, config: &ConsumerConfig) -> Result<(), BrokerError>;

    /// Subscribes to every topic matching `topic_pattern`, an anchored regular expression.
    async fn subscribe(&mut self, topic_pattern: &str) -> Result<(), BrokerError>;

    /// Next record, or `None` once the broker will not deliver anything anymore.
    async fn recv(&mut self) -> Result<Option<RawMessage>, BrokerError>;

    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}
