use std::future::Future;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conversions::cdc_event::CdcEvent;

use super::sources::{BrokerClient, BrokerError};

pub const DEFAULT_BROKERS: &str = "localhost:9092";

/// Matches the connector's schema change topic and every
/// `<server>.<database>.<table>` data topic.
pub const DEFAULT_TOPIC_PATTERN: &str = r"^(schema-changes\.cdc|cdc\.[^.]+\.[^.]+)$";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Missing(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("topic pattern {0:?} must start with '^'")]
    UnanchoredTopicPattern(String),

    #[error("invalid topic pattern {pattern:?}: {source}")]
    InvalidTopicPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Comma separated bootstrap servers.
    pub brokers: String,
    pub group_id: String,
    /// Start from the earliest offset when the group has no committed position.
    pub from_beginning: bool,
    pub topic_pattern: String,
}

impl ConsumerConfig {
    pub fn new(group_id: impl Into<String>) -> ConsumerConfig {
        ConsumerConfig {
            brokers: DEFAULT_BROKERS.to_string(),
            group_id: group_id.into(),
            from_beginning: false,
            topic_pattern: DEFAULT_TOPIC_PATTERN.to_string(),
        }
    }

    pub fn with_brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = brokers.into();
        self
    }

    pub fn with_topic_pattern(mut self, topic_pattern: impl Into<String>) -> Self {
        self.topic_pattern = topic_pattern.into();
        self
    }

    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }

    /// Reads `KAFKA_BROKERS`, `CDC_CONSUMER_GROUP`, `CDC_FROM_BEGINNING` and
    /// `CDC_TOPIC_PATTERN`, falling back to the defaults for unset variables.
    pub fn from_env() -> Result<ConsumerConfig, ConfigError> {
        let mut config = ConsumerConfig::new(
            std::env::var("CDC_CONSUMER_GROUP").unwrap_or_else(|_| "cdc-bridge".to_string()),
        );
        if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
            config.brokers = brokers;
        }
        if let Ok(pattern) = std::env::var("CDC_TOPIC_PATTERN") {
            config.topic_pattern = pattern;
        }
        if let Ok(value) = std::env::var("CDC_FROM_BEGINNING") {
            config.from_beginning = parse_bool("CDC_FROM_BEGINNING", &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::Missing("brokers"));
        }
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::Missing("group_id"));
        }
        validate_topic_pattern(&self.topic_pattern)
    }
}

pub(crate) fn validate_topic_pattern(pattern: &str) -> Result<(), ConfigError> {
    if !pattern.starts_with('^') {
        return Err(ConfigError::UnanchoredTopicPattern(pattern.to_string()));
    }
    Regex::new(pattern).map_err(|source| ConfigError::InvalidTopicPattern {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok(())
}

pub(crate) fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        }),
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every event the consumer produces. The consumer waits for
/// `on_event` to finish before reading the next record.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: CdcEvent) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(CdcEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn on_event(&self, event: CdcEvent) -> Result<(), HandlerError> {
        (self)(event).await
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("event handler failed for {topic}[{partition}]@{offset}: {source}")]
    Handler {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: HandlerError,
    },

    #[error("consumer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub struct CdcConsumer;

impl CdcConsumer {
    /// Connects, subscribes and spawns the consume loop. Connection and
    /// subscription failures are returned here; everything after that
    /// surfaces through the returned handle.
    pub async fn start<B, H>(
        mut client: B,
        config: ConsumerConfig,
        handler: H,
    ) -> Result<ConsumerHandle, ConsumerError>
    where
        B: BrokerClient + 'static,
        H: EventHandler + 'static,
    {
        config.validate()?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            pattern = %config.topic_pattern,
            "starting cdc consumer"
        );
        client.connect(&config).await?;

        if let Err(e) = client.subscribe(&config.topic_pattern).await {
            if let Err(disconnect_error) = client.disconnect().await {
                warn!("disconnect after failed subscribe: {disconnect_error}");
            }
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(client, handler, cancel.clone()));

        Ok(ConsumerHandle {
            group_id: config.group_id,
            cancel,
            task: Some(task),
        })
    }
}

async fn run<B: BrokerClient, H: EventHandler>(
    mut client: B,
    handler: H,
    cancel: CancellationToken,
) -> Result<(), ConsumerError> {
    let res = consume(&mut client, &handler, &cancel).await;
    if let Err(e) = &res {
        error!("cdc consumer stopped: {e}");
    }

    // the only place the client gets disconnected once it is running
    let disconnected = client.disconnect().await;
    match (res, disconnected) {
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e.into()),
        (Ok(()), Ok(())) => {
            info!("cdc consumer disconnected");
            Ok(())
        }
    }
}

async fn consume<B: BrokerClient, H: EventHandler>(
    client: &mut B,
    handler: &H,
    cancel: &CancellationToken,
) -> Result<(), ConsumerError> {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            message = client.recv() => message?,
        };
        let Some(message) = message else {
            info!("broker closed the record stream");
            return Ok(());
        };

        let event = CdcEvent::from(&message);
        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            kind = event.kind(),
            "received cdc event"
        );

        // handlers are never interrupted, shutdown takes effect between records
        handler
            .on_event(event)
            .await
            .map_err(|source| ConsumerError::Handler {
                topic: message.topic,
                partition: message.partition,
                offset: message.offset,
                source,
            })?;
    }
}

/// Handle to a running consumer. Dropping it stops the consume loop, which
/// then disconnects the client in the background.
#[derive(Debug)]
pub struct ConsumerHandle {
    group_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), ConsumerError>>>,
}

impl ConsumerHandle {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the consume loop to end on its own and returns how it ended.
    /// Cancel safe: the task is only released once it has been joined.
    pub async fn closed(&mut self) -> Result<(), ConsumerError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let res = task.await;
        self.task = None;
        res?
    }

    /// Stops consuming and disconnects from the broker. Calling it again is a no-op.
    pub async fn disconnect(&mut self) -> Result<(), ConsumerError> {
        self.cancel.cancel();
        self.closed().await
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
