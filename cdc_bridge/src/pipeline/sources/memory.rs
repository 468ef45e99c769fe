use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::pipeline::consumer::ConsumerConfig;

use super::{BrokerClient, BrokerError, RawMessage};

#[derive(Debug, Default)]
struct Shared {
    sender: Mutex<Option<mpsc::UnboundedSender<RawMessage>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    group_id: Mutex<Option<String>>,
    topic_pattern: Mutex<Option<String>>,
}

/// Producer side of an in-process broker. Records published here are
/// delivered to the paired [`MemoryBrokerClient`] in publish order.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Creates a broker and the client that reads from it.
    pub fn pair() -> (MemoryBroker, MemoryBrokerClient) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            sender: Mutex::new(Some(sender)),
            ..Default::default()
        });

        let client = MemoryBrokerClient {
            receiver,
            shared: shared.clone(),
            connected: false,
            pattern: None,
            connect_error: None,
        };

        (MemoryBroker { shared }, client)
    }

    /// Returns false once the broker has been closed or the client is gone.
    pub fn publish(&self, message: RawMessage) -> bool {
        let sender = self.shared.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Ends the record stream; the client sees `None` after draining what was published.
    pub fn close(&self) {
        self.shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    /// Consumer group the client connected with, if it connected.
    pub fn group_id(&self) -> Option<String> {
        self.shared
            .group_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn topic_pattern(&self) -> Option<String> {
        self.shared
            .topic_pattern
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug)]
pub struct MemoryBrokerClient {
    receiver: mpsc::UnboundedReceiver<RawMessage>,
    shared: Arc<Shared>,
    connected: bool,
    pattern: Option<Regex>,
    connect_error: Option<String>,
}

impl MemoryBrokerClient {
    /// Makes every connection attempt fail with `reason`.
    pub fn failing_connect(mut self, reason: impl Into<String>) -> Self {
        self.connect_error = Some(reason.into());
        self
    }
}

#[async_trait]
impl BrokerClient for MemoryBrokerClient {
    async fn connect(&mut self, config: &ConsumerConfig) -> Result<(), BrokerError> {
        if let Some(reason) = &self.connect_error {
            return Err(BrokerError::Other(reason.clone()));
        }

        self.connected = true;
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        *self
            .shared
            .group_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(config.group_id.clone());
        info!(group_id = %config.group_id, "memory broker connected");
        Ok(())
    }

    async fn subscribe(&mut self, topic_pattern: &str) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        self.pattern = Some(Regex::new(topic_pattern)?);
        *self
            .shared
            .topic_pattern
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(topic_pattern.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<RawMessage>, BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        let pattern = self.pattern.as_ref().ok_or(BrokerError::NotSubscribed)?;

        while let Some(message) = self.receiver.recv().await {
            if pattern.is_match(&message.topic) {
                return Ok(Some(message));
            }
            debug!(topic = %message.topic, "skipping record from unsubscribed topic");
        }
        Ok(None)
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if self.connected {
            self.connected = false;
            self.pattern = None;
            self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
            info!("memory broker disconnected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_matching_topics_in_order() {
        let (broker, mut client) = MemoryBroker::pair();
        client
            .connect(&ConsumerConfig::new("group-a"))
            .await
            .unwrap();
        client.subscribe(r"^cdc\.[^.]+\.[^.]+$").await.unwrap();

        broker.publish(RawMessage::new("cdc.app.users", 0, 1));
        broker.publish(RawMessage::new("other", 0, 2));
        broker.publish(RawMessage::new("cdc.app.orders", 0, 3));
        broker.close();

        let mut offsets = vec![];
        while let Some(message) = client.recv().await.unwrap() {
            offsets.push(message.offset);
        }

        assert_eq!(offsets, vec![1, 3]);
        assert_eq!(broker.group_id().as_deref(), Some("group-a"));
        assert!(!broker.publish(RawMessage::new("cdc.app.users", 0, 4)));
    }

    #[tokio::test]
    async fn lifecycle_errors() {
        let (broker, mut client) = MemoryBroker::pair();
        assert!(matches!(
            client.recv().await,
            Err(BrokerError::NotConnected)
        ));

        client.connect(&ConsumerConfig::new("g")).await.unwrap();
        assert!(matches!(
            client.recv().await,
            Err(BrokerError::NotSubscribed)
        ));

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(broker.disconnect_count(), 1);

        let (_, client) = MemoryBroker::pair();
        let mut client = client.failing_connect("connection refused");
        let err = client.connect(&ConsumerConfig::new("g")).await.unwrap_err();
        assert_eq!(err.to_string(), "broker error: connection refused");
    }
}
