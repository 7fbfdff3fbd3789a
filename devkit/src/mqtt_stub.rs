/*!
Mock broker for running the agent without an MQTT server

Implements the agent's `Broker` seam. Every call is recorded in order so
tests can assert on what reached the wire and in which sequence.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use system_sensors::broker::{Broker, QoS};
use system_sensors::BrokerError;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// One call made on the broker, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Published(MockMessage),
    Subscribed { topic: String, qos: QoS },
    Disconnected,
}

#[derive(Default)]
struct Recorded {
    events: Vec<MockEvent>,
    /// Publishes to topics starting with one of these fail
    failing_prefixes: Vec<String>,
    /// Publishes to topics starting with one of these never complete
    stalled_prefixes: Vec<String>,
    stall_disconnect: bool,
}

#[derive(Clone, Default)]
pub struct MockBroker {
    recorded: Arc<Mutex<Recorded>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish under `prefix` fail until `clear`
    pub fn fail_publishes_to(&self, prefix: &str) {
        self.recorded.lock().failing_prefixes.push(prefix.to_string());
    }

    /// Make every publish under `prefix` hang, like a client whose request
    /// queue is full while the broker is unreachable
    pub fn stall_publishes_to(&self, prefix: &str) {
        self.recorded.lock().stalled_prefixes.push(prefix.to_string());
    }

    pub fn stall_disconnect(&self) {
        self.recorded.lock().stall_disconnect = true;
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.recorded.lock().events.clone()
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.recorded
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Published(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.recorded
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Subscribed { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.recorded
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, MockEvent::Disconnected))
            .count()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.get_published_messages()
            .into_iter()
            .filter(|msg| msg.topic == topic)
            .collect()
    }

    pub fn retained_messages(&self) -> Vec<MockMessage> {
        self.get_published_messages()
            .into_iter()
            .filter(|msg| msg.retain)
            .collect()
    }

    /// Parse the last payload published on `topic`
    pub fn get_last_json_message<T: DeserializeOwned>(&self, topic: &str) -> anyhow::Result<Option<T>> {
        match self.find_messages_by_topic(topic).last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Forget recorded calls, injected failures and stalls
    pub fn clear(&self) {
        *self.recorded.lock() = Recorded::default();
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), BrokerError> {
        let stalled = {
            let mut recorded = self.recorded.lock();
            if recorded.failing_prefixes.iter().any(|p| topic.starts_with(p.as_str())) {
                return Err(BrokerError::Publish {
                    topic: topic.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            let stalled = recorded.stalled_prefixes.iter().any(|p| topic.starts_with(p.as_str()));
            if !stalled {
                info!("[MOCK] Published to {}: {} bytes", topic, payload.len());
                recorded.events.push(MockEvent::Published(MockMessage {
                    topic: topic.to_string(),
                    payload,
                    qos,
                    retain,
                }));
            }
            stalled
        };
        if stalled {
            info!("[MOCK] Publish to {} stalled", topic);
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        info!("[MOCK] Subscribed to {}", topic);
        self.recorded.lock().events.push(MockEvent::Subscribed {
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let stall = self.recorded.lock().stall_disconnect;
        if stall {
            info!("[MOCK] Disconnect stalled");
            std::future::pending::<()>().await;
        }
        info!("[MOCK] Disconnected");
        self.recorded.lock().events.push(MockEvent::Disconnected);
        Ok(())
    }
}
