//! Reliable delivery of observation documents to the broker.
//!
//! The publisher wraps an abstract [`BrokerTransport`] and tracks the
//! connection lifecycle from the transport's event stream. While the
//! connection is down, outbound documents are held in a bounded offline
//! buffer that rejects new publishes when full; the buffer drains in FIFO
//! order as soon as the connection comes back.

use crate::broker::{BrokerEvent, BrokerTransport};
use crate::config::MqttConfig;
use crate::document::ObservationDocument;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors a publish call can raise synchronously.
///
/// Everything past admission is asynchronous: transport failures after
/// hand-off are logged and counted, never raised to the caller.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("offline buffer full ({capacity} messages), publish rejected")]
    BufferFull { capacity: usize },
}

/// State of the broker connection as seen by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ConnectionLost,
}

/// Counters for publisher activity.
#[derive(Debug, Default, Clone)]
pub struct PublisherStats {
    /// Messages handed to the transport
    pub published: u64,
    /// Messages queued while the connection was down
    pub buffered: u64,
    /// Publishes rejected because the offline buffer was full
    pub rejected: u64,
    /// Deliveries confirmed by the broker
    pub delivered: u64,
    /// Transport send failures (accepted loss, not requeued)
    pub send_failures: u64,
    /// Inbound messages received on the subscribed topic
    pub inbound_messages: u64,
}

struct QueuedPublish {
    topic: String,
    payload: Bytes,
}

/// Publisher over an abstract broker transport.
pub struct Publisher {
    transport: Arc<dyn BrokerTransport>,
    config: MqttConfig,
    state: RwLock<ConnectionState>,
    pending: Mutex<VecDeque<QueuedPublish>>,
    stats: RwLock<PublisherStats>,
}

impl Publisher {
    /// Create a publisher over the given transport.
    ///
    /// The transport is expected to already be establishing its
    /// connection, so the publisher starts in `Connecting`.
    pub fn new(transport: Arc<dyn BrokerTransport>, config: MqttConfig) -> Self {
        Self {
            transport,
            config,
            state: RwLock::new(ConnectionState::Connecting),
            pending: Mutex::new(VecDeque::new()),
            stats: RwLock::new(PublisherStats::default()),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Current publisher counters.
    pub fn stats(&self) -> PublisherStats {
        self.stats.read().clone()
    }

    /// Number of messages waiting in the offline buffer.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Publish an observation document to the configured topic.
    ///
    /// Encoding failures and offline-buffer rejection are the only
    /// synchronous errors; transport failures after hand-off are reported
    /// through the event stream and the message is not requeued.
    pub async fn publish(&self, document: &ObservationDocument) -> Result<(), PublishError> {
        let payload = Bytes::from(serde_json::to_vec(document)?);
        let topic = self.config.publish_topic.clone();

        if self.state() == ConnectionState::Connected {
            match self.transport.publish(&topic, payload).await {
                Ok(()) => {
                    self.stats.write().published += 1;
                    debug!(topic = %topic, "document handed to transport");
                }
                Err(e) => {
                    self.stats.write().send_failures += 1;
                    warn!(error = %e, topic = %topic, "publish failed");
                }
            }
            return Ok(());
        }

        let mut pending = self.pending.lock();
        if pending.len() >= self.config.offline_buffer_size {
            self.stats.write().rejected += 1;
            return Err(PublishError::BufferFull {
                capacity: self.config.offline_buffer_size,
            });
        }
        pending.push_back(QueuedPublish { topic, payload });
        let queued = pending.len();
        drop(pending);

        self.stats.write().buffered += 1;
        debug!(queued, "broker offline, document buffered");
        Ok(())
    }

    /// Consume transport events until the stream closes.
    pub async fn run(&self, mut events: mpsc::Receiver<BrokerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("broker event stream closed");
    }

    /// Apply one transport event to the publisher state.
    pub async fn handle_event(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::ConnectionOpened { reconnect } => {
                *self.state.write() = ConnectionState::Connected;
                info!(reconnect, "connected to broker");

                if let Err(e) = self
                    .transport
                    .subscribe(&self.config.subscribe_topic)
                    .await
                {
                    warn!(
                        error = %e,
                        topic = %self.config.subscribe_topic,
                        "failed to subscribe to inbound topic"
                    );
                }

                self.drain_pending().await;
            }
            BrokerEvent::ConnectionLost { reason } => {
                let mut state = self.state.write();
                // an explicit shutdown stays Disconnected
                if *state != ConnectionState::Disconnected {
                    *state = ConnectionState::ConnectionLost;
                    warn!(reason = %reason, "broker connection lost");
                }
            }
            BrokerEvent::MessageArrived { topic, payload } => {
                self.stats.write().inbound_messages += 1;
                debug!(topic = %topic, len = payload.len(), "inbound message arrived");
            }
            BrokerEvent::DeliveryConfirmed { packet_id } => {
                self.stats.write().delivered += 1;
                debug!(packet_id, "delivery confirmed by broker");
            }
        }
    }

    /// Flush the offline buffer to the transport in FIFO order.
    async fn drain_pending(&self) {
        let mut drained = 0usize;
        loop {
            let next = self.pending.lock().pop_front();
            let Some(message) = next else { break };

            match self.transport.publish(&message.topic, message.payload).await {
                Ok(()) => {
                    self.stats.write().published += 1;
                    drained += 1;
                }
                Err(e) => {
                    // accepted loss, the message is not requeued
                    self.stats.write().send_failures += 1;
                    warn!(error = %e, "buffered publish failed");
                }
            }
        }
        if drained > 0 {
            info!(drained, "offline buffer flushed");
        }
    }

    /// Disconnect from the broker and park the publisher.
    pub async fn shutdown(&self) {
        info!("shutting down publisher");
        *self.state.write() = ConnectionState::Disconnected;
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::TransportError;
    use crate::document::Coordinate;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingTransport {
        published: Mutex<Vec<(String, Bytes)>>,
        subscribed: Mutex<Vec<String>>,
        disconnected: Mutex<bool>,
    }

    #[async_trait]
    impl BrokerTransport for RecordingTransport {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
            self.subscribed.lock().push(topic.to_string());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            *self.disconnected.lock() = true;
            Ok(())
        }
    }

    fn create_test_config(offline_buffer_size: usize) -> MqttConfig {
        MqttConfig {
            host: "broker.example.net".to_string(),
            port: 1883,
            client_id: "airq-gateway".to_string(),
            keep_alive_secs: 30,
            publish_topic: "test".to_string(),
            subscribe_topic: "test".to_string(),
            qos: 0,
            offline_buffer_size,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
        }
    }

    fn document(value: f64) -> ObservationDocument {
        ObservationDocument::build(
            value,
            Coordinate::new(59.3, 18.0),
            "2024-01-01T00:00:00",
            "SN123",
            "http://storagemanager.linksmartcnet.se",
            "description",
        )
    }

    fn publisher(offline_buffer_size: usize) -> (Publisher, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let publisher = Publisher::new(
            transport.clone(),
            create_test_config(offline_buffer_size),
        );
        (publisher, transport)
    }

    #[tokio::test]
    async fn test_publish_when_connected() {
        let (publisher, transport) = publisher(100);
        publisher
            .handle_event(BrokerEvent::ConnectionOpened { reconnect: false })
            .await;
        assert_eq!(publisher.state(), ConnectionState::Connected);

        publisher.publish(&document(57.23)).await.unwrap();

        let published = transport.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "test");
        let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(json["FeatureOfInterest"]["result"]["Value"], 57.23);
        assert_eq!(publisher.stats().published, 1);
    }

    #[tokio::test]
    async fn test_subscribes_on_every_connect() {
        let (publisher, transport) = publisher(100);
        publisher
            .handle_event(BrokerEvent::ConnectionOpened { reconnect: false })
            .await;
        publisher
            .handle_event(BrokerEvent::ConnectionLost {
                reason: "network".to_string(),
            })
            .await;
        publisher
            .handle_event(BrokerEvent::ConnectionOpened { reconnect: true })
            .await;

        assert_eq!(*transport.subscribed.lock(), vec!["test", "test"]);
    }

    #[tokio::test]
    async fn test_offline_publishes_are_buffered_and_drained_in_order() {
        let (publisher, transport) = publisher(100);
        assert_eq!(publisher.state(), ConnectionState::Connecting);

        publisher.publish(&document(1.0)).await.unwrap();
        publisher.publish(&document(2.0)).await.unwrap();
        assert_eq!(publisher.pending_len(), 2);
        assert!(transport.published.lock().is_empty());

        publisher
            .handle_event(BrokerEvent::ConnectionOpened { reconnect: false })
            .await;

        assert_eq!(publisher.pending_len(), 0);
        let published = transport.published.lock();
        assert_eq!(published.len(), 2);
        let value = |i: usize| {
            let json: serde_json::Value = serde_json::from_slice(&published[i].1).unwrap();
            json["FeatureOfInterest"]["result"]["Value"].as_f64().unwrap()
        };
        assert_eq!(value(0), 1.0);
        assert_eq!(value(1), 2.0);
    }

    #[tokio::test]
    async fn test_full_buffer_rejects_new_publishes() {
        let (publisher, transport) = publisher(2);

        publisher.publish(&document(1.0)).await.unwrap();
        publisher.publish(&document(2.0)).await.unwrap();
        let err = publisher.publish(&document(3.0)).await.unwrap_err();
        assert!(matches!(err, PublishError::BufferFull { capacity: 2 }));

        // nothing was evicted and nothing reached the transport
        assert_eq!(publisher.pending_len(), 2);
        assert!(transport.published.lock().is_empty());
        assert_eq!(publisher.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_connection_lost_transitions_state() {
        let (publisher, _transport) = publisher(100);
        publisher
            .handle_event(BrokerEvent::ConnectionOpened { reconnect: false })
            .await;
        publisher
            .handle_event(BrokerEvent::ConnectionLost {
                reason: "io".to_string(),
            })
            .await;
        assert_eq!(publisher.state(), ConnectionState::ConnectionLost);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_and_stays_disconnected() {
        let (publisher, transport) = publisher(100);
        publisher.shutdown().await;
        assert!(*transport.disconnected.lock());
        assert_eq!(publisher.state(), ConnectionState::Disconnected);

        // a late lost-connection event does not resurrect the state
        publisher
            .handle_event(BrokerEvent::ConnectionLost {
                reason: "late".to_string(),
            })
            .await;
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_delivery_and_inbound_counters() {
        let (publisher, _transport) = publisher(100);
        publisher
            .handle_event(BrokerEvent::DeliveryConfirmed { packet_id: 7 })
            .await;
        publisher
            .handle_event(BrokerEvent::MessageArrived {
                topic: "test".to_string(),
                payload: Bytes::from_static(b"hello"),
            })
            .await;

        let stats = publisher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.inbound_messages, 1);
    }
}
