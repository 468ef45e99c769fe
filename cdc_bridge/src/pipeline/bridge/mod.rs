use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::conversions::cdc_event::CdcEvent;

use self::{
    queue::{event_queue, QueueHandler},
    stream::{BridgeStream, PullLoop},
};
use super::{
    consumer::{
        validate_topic_pattern, CdcConsumer, ConfigError, ConsumerConfig,
        ConsumerError, DEFAULT_BROKERS, DEFAULT_TOPIC_PATTERN,
    },
    sources::BrokerClient,
};

pub mod queue;
pub mod stream;

pub use queue::Backlog;

/// Upper bound on how long the pull loop waits before re-checking cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_GROUP_PREFIX: &str = "cdc-stream";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub brokers: String,
    pub topic_pattern: String,
    /// Each stream consumes as `<group_prefix>-<uuid>` so streams never share offsets.
    pub group_prefix: String,
    pub poll_interval: Duration,
    pub backlog: Backlog,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            brokers: DEFAULT_BROKERS.to_string(),
            topic_pattern: DEFAULT_TOPIC_PATTERN.to_string(),
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backlog: Backlog::Unbounded,
        }
    }
}

impl BridgeConfig {
    /// Reads `KAFKA_BROKERS`, `CDC_TOPIC_PATTERN`, `CDC_GROUP_PREFIX`,
    /// `CDC_POLL_INTERVAL_MS` and `CDC_MAX_BACKLOG` (0 or unset means unbounded).
    pub fn from_env() -> Result<BridgeConfig, ConfigError> {
        let mut config = BridgeConfig::default();
        if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
            config.brokers = brokers;
        }
        if let Ok(pattern) = std::env::var("CDC_TOPIC_PATTERN") {
            config.topic_pattern = pattern;
        }
        if let Ok(prefix) = std::env::var("CDC_GROUP_PREFIX") {
            config.group_prefix = prefix;
        }
        if let Ok(value) = std::env::var("CDC_POLL_INTERVAL_MS") {
            let millis = parse_number("CDC_POLL_INTERVAL_MS", &value)?;
            config.poll_interval = Duration::from_millis(millis as u64);
        }
        if let Ok(value) = std::env::var("CDC_MAX_BACKLOG") {
            config.backlog = match parse_number("CDC_MAX_BACKLOG", &value)? {
                0 => Backlog::Unbounded,
                n => Backlog::Bounded(n),
            };
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::Missing("brokers"));
        }
        if self.group_prefix.trim().is_empty() {
            return Err(ConfigError::Missing("group_prefix"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll_interval"));
        }
        validate_topic_pattern(&self.topic_pattern)
    }

    /// Consumer settings for a new stream: a group of its own, reading from the beginning.
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(format!("{}-{}", self.group_prefix, Uuid::new_v4()))
            .with_brokers(self.brokers.clone())
            .with_topic_pattern(self.topic_pattern.clone())
            .from_beginning(true)
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

/// An event handed to the streaming transport, with an id a client can
/// send back to resume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeEvent {
    pub id: String,
    pub event: CdcEvent,
}

impl BridgeEvent {
    pub fn new(counter: u64, event: CdcEvent) -> BridgeEvent {
        BridgeEvent {
            id: format!("cdc-event-{counter}-{}", event.offset()),
            event,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    Streaming,
    /// Cancelled or failed, waiting for the consumer to disconnect.
    Draining,
    Closed,
}

pub struct CdcBridge;

impl CdcBridge {
    /// Starts a consumer on `client` and returns the pull side. Connection
    /// failures are returned here, later failures end the stream with an error.
    pub async fn start<B>(client: B, config: BridgeConfig) -> Result<BridgeStream, BridgeError>
    where
        B: BrokerClient + 'static,
    {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(BridgeState::Starting);
        let cancel = CancellationToken::new();
        let (sender, receiver) = event_queue(config.backlog);

        let consumer_config = config.consumer_config();
        let group_id = consumer_config.group_id.clone();
        let handler = QueueHandler::new(sender, cancel.clone());

        let consumer = match CdcConsumer::start(client, consumer_config, handler).await {
            Ok(consumer) => consumer,
            Err(e) => {
                state_tx.send_replace(BridgeState::Closed);
                return Err(e.into());
            }
        };

        state_tx.send_replace(BridgeState::Streaming);
        info!(group_id = %group_id, "cdc bridge streaming");

        let pull = PullLoop::new(
            receiver,
            consumer,
            cancel.clone(),
            config.poll_interval,
            state_tx,
        );
        Ok(BridgeStream::new(pull, cancel, state_rx, group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sources::RawMessage;

    #[test]
    fn event_ids_combine_counter_and_offset() {
        let event = CdcEvent::from(&RawMessage::new("cdc.app.users", 0, 42));
        assert_eq!(BridgeEvent::new(7, event).id, "cdc-event-7-42");
    }

    #[test]
    fn every_stream_gets_its_own_group() {
        let config = BridgeConfig::default();
        let first = config.consumer_config();
        let second = config.consumer_config();

        assert!(first.group_id.starts_with("cdc-stream-"));
        assert_ne!(first.group_id, second.group_id);
        assert!(first.from_beginning);
        assert_eq!(first.topic_pattern, DEFAULT_TOPIC_PATTERN);
    }

    #[test]
    fn config_validation() {
        assert!(BridgeConfig::default().validate().is_ok());

        let config = BridgeConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BridgeConfig {
            group_prefix: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("group_prefix"))
        ));
    }

    #[test]
    fn numbers_from_env_values() {
        assert_eq!(parse_number("N", " 250 ").unwrap(), 250);
        assert!(parse_number("N", "-1").is_err());
    }
}
