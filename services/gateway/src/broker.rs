//! Broker transport abstraction and the MQTT implementation.
//!
//! The publisher is written against [`BrokerTransport`], a small contract
//! a pub/sub client has to satisfy: publish, subscribe, disconnect, and a
//! stream of connection-lifecycle events. The bundled implementation
//! drives a rumqttc client from a background task and translates its
//! event loop into [`BrokerEvent`]s.

use crate::config::MqttConfig;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Errors surfaced by a broker transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker client error: {0}")]
    Client(String),
}

/// Connection-lifecycle and traffic events emitted by a transport.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The broker acknowledged a connection. `reconnect` is true for every
    /// acknowledgment after the first.
    ConnectionOpened { reconnect: bool },
    /// The transport lost its connection; it keeps retrying on its own.
    ConnectionLost { reason: String },
    /// An inbound message arrived on a subscribed topic.
    MessageArrived { topic: String, payload: Bytes },
    /// The broker confirmed delivery of an outbound message.
    DeliveryConfirmed { packet_id: u16 },
}

/// Abstract publish contract the publisher depends on.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Hand a serialized payload to the transport for the given topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Subscribe to an inbound topic.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Tear the connection down and stop the driver.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// MQTT transport backed by rumqttc.
pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
    running: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Connect to the configured broker.
    ///
    /// Returns the transport together with the receiving end of its event
    /// stream. The connection is established asynchronously by a spawned
    /// driver task; the first [`BrokerEvent::ConnectionOpened`] on the
    /// stream marks it usable. Sessions are not cleaned between connects,
    /// so the fixed client id resumes its subscription state on reconnect.
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::Receiver<BrokerEvent>) {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(false);

        let (client, eventloop) = AsyncClient::new(options, 16);
        let (event_tx, event_rx) = mpsc::channel(32);
        let running = Arc::new(AtomicBool::new(true));

        tokio::spawn(drive_event_loop(
            eventloop,
            event_tx,
            running.clone(),
            config.reconnect_base_delay(),
            config.reconnect_max_delay(),
        ));

        (
            Self {
                client,
                qos: qos_from_level(config.qos),
                running,
            },
            event_rx,
        )
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(topic, self.qos, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, self.qos)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.running.store(false, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }
}

/// Poll the rumqttc event loop, translating packets into [`BrokerEvent`]s.
///
/// On transport errors the loop sleeps with exponential backoff and polls
/// again, which makes rumqttc re-establish the connection. The backoff
/// resets on every successful connection acknowledgment.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::Sender<BrokerEvent>,
    running: Arc<AtomicBool>,
    base_delay: std::time::Duration,
    max_delay: std::time::Duration,
) {
    let mut backoff = ExponentialBackoff {
        initial_interval: base_delay,
        max_interval: max_delay,
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut connected_before = false;

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                backoff.reset();
                let reconnect = connected_before;
                connected_before = true;
                debug!(
                    session_present = ack.session_present,
                    reconnect, "broker connection acknowledged"
                );
                if events
                    .send(BrokerEvent::ConnectionOpened { reconnect })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                if events
                    .send(BrokerEvent::MessageArrived {
                        topic: publish.topic,
                        payload: publish.payload,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                if events
                    .send(BrokerEvent::DeliveryConfirmed {
                        packet_id: ack.pkid,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let delay = backoff.next_backoff().unwrap_or(max_delay);
                warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "broker connection error, retrying"
                );
                if events
                    .send(BrokerEvent::ConnectionLost {
                        reason: e.to_string(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(delay).await;
            }
        }
    }

    debug!("broker driver task exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        // out-of-range levels are caught by config validation; the
        // mapping itself falls back to at-most-once
        assert_eq!(qos_from_level(7), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_disconnect_stops_driver() {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            client_id: "gateway-test".to_string(),
            keep_alive_secs: 5,
            publish_topic: "test".to_string(),
            subscribe_topic: "test".to_string(),
            qos: 0,
            offline_buffer_size: 100,
            reconnect_base_delay_ms: 50,
            reconnect_max_delay_ms: 200,
        };
        let (transport, mut events) = MqttTransport::connect(&config);

        // nothing listens on port 1, so the driver reports a lost
        // connection and backs off
        match events.recv().await {
            Some(BrokerEvent::ConnectionLost { .. }) => {}
            other => panic!("expected ConnectionLost, got {other:?}"),
        }

        // disconnect may race the dead connection; only the stop flag matters
        let _ = transport.disconnect().await;
        assert!(!transport.running.load(Ordering::SeqCst));
    }
}
