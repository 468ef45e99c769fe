use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    message::{BorrowedMessage, Headers, Message},
};
use tracing::{error, info, warn};

use crate::{conversions::headers::group_header_entries, pipeline::consumer::ConsumerConfig};

use super::{BrokerClient, BrokerError, RawMessage};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// [`BrokerClient`] backed by an rdkafka [`StreamConsumer`].
pub struct KafkaBrokerClient {
    consumer: Option<Arc<StreamConsumer>>,
    subscribed: bool,
    overrides: Vec<(String, String)>,
}

impl Default for KafkaBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KafkaBrokerClient {
    pub fn new() -> KafkaBrokerClient {
        KafkaBrokerClient {
            consumer: None,
            subscribed: false,
            overrides: vec![],
        }
    }

    /// Sets an additional librdkafka property, applied after the defaults.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    fn client_config(&self, config: &ConsumerConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set(
                "auto.offset.reset",
                if config.from_beginning {
                    "earliest"
                } else {
                    "latest"
                },
            )
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            // picks up topics created after subscribing, e.g. a newly captured table
            .set("topic.metadata.refresh.interval.ms", "10000");

        for (key, value) in &self.overrides {
            client_config.set(key, value);
        }
        client_config
    }
}

fn to_raw_message(message: &BorrowedMessage<'_>) -> RawMessage {
    let headers = message
        .headers()
        .map(|headers| group_header_entries(headers.iter().map(|h| (h.key, h.value))))
        .unwrap_or_default();

    RawMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis(),
        key: message.key().map(Bytes::copy_from_slice),
        value: message.payload().map(Bytes::copy_from_slice),
        headers,
    }
}

/// Errors tied to a single fetch, e.g. a captured table's topic that was
/// deleted while the pattern subscription still matched it. The consumer
/// keeps working after these.
fn is_recoverable(error: &KafkaError) -> bool {
    matches!(
        error,
        KafkaError::MessageConsumption(_) | KafkaError::PartitionEOF(_)
    )
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn connect(&mut self, config: &ConsumerConfig) -> Result<(), BrokerError> {
        let consumer: StreamConsumer = self.client_config(config).create().map_err(|e| {
            error!("failed to create kafka consumer: {e}");
            e
        })?;
        let consumer = Arc::new(consumer);

        // librdkafka connects lazily, fetching metadata makes an unreachable
        // cluster fail here instead of on the first poll
        let metadata_consumer = consumer.clone();
        tokio::task::spawn_blocking(move || {
            metadata_consumer
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| BrokerError::Other(e.to_string()))??;

        info!(brokers = %config.brokers, group_id = %config.group_id, "connected to kafka");
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn subscribe(&mut self, topic_pattern: &str) -> Result<(), BrokerError> {
        let consumer = self.consumer.as_ref().ok_or(BrokerError::NotConnected)?;

        // librdkafka treats a subscription starting with '^' as a regex
        let pattern = if topic_pattern.starts_with('^') {
            topic_pattern.to_string()
        } else {
            format!("^{topic_pattern}")
        };
        consumer.subscribe(&[pattern.as_str()])?;
        self.subscribed = true;

        info!(pattern = %pattern, "subscribed to kafka topics");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<RawMessage>, BrokerError> {
        let consumer = self.consumer.as_ref().ok_or(BrokerError::NotConnected)?;
        if !self.subscribed {
            return Err(BrokerError::NotSubscribed);
        }

        loop {
            match consumer.recv().await {
                Ok(message) => return Ok(Some(to_raw_message(&message))),
                Err(e) if is_recoverable(&e) => warn!("skipping failed kafka fetch: {e}"),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if let Some(consumer) = self.consumer.take() {
            if self.subscribed {
                consumer.unsubscribe();
                self.subscribed = false;
            }
            info!("disconnected from kafka");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_reset_follows_from_beginning() {
        let client = KafkaBrokerClient::new().with_property("client.id", "tests");

        let config = ConsumerConfig::new("g1").from_beginning(true);
        let client_config = client.client_config(&config);
        assert_eq!(client_config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client_config.get("group.id"), Some("g1"));
        assert_eq!(client_config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(client_config.get("client.id"), Some("tests"));

        let config = ConsumerConfig::new("g1").from_beginning(false);
        assert_eq!(
            client.client_config(&config).get("auto.offset.reset"),
            Some("latest")
        );
    }

    #[test]
    fn fetch_errors_do_not_end_the_stream() {
        use rdkafka::types::RDKafkaErrorCode;

        assert!(is_recoverable(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::UnknownTopicOrPartition
        )));
        assert!(is_recoverable(&KafkaError::PartitionEOF(0)));
        assert!(!is_recoverable(&KafkaError::MessageConsumptionFatal(
            RDKafkaErrorCode::AllBrokersDown
        )));
        assert!(!is_recoverable(&KafkaError::Subscription("^cdc".to_string())));
    }

    #[tokio::test]
    async fn requires_connection() {
        let mut client = KafkaBrokerClient::new();
        assert!(matches!(
            client.subscribe("^cdc").await,
            Err(BrokerError::NotConnected)
        ));
        assert!(matches!(client.recv().await, Err(BrokerError::NotConnected)));
        assert!(client.disconnect().await.is_ok());
    }
}
