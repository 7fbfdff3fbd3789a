//! Publisher seam between the session and the MQTT client

use crate::error::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::AsyncClient;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

pub use rumqttc::QoS;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest wait for room in the client's request queue. The queue stops
/// draining while the broker is unreachable.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The operations the session needs from a broker client
///
/// Publishes are fire-and-forget: `Ok` means the request was queued, not
/// that the broker acknowledged it.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError>;

    /// Send DISCONNECT after everything already queued
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// `rumqttc` client plus the task driving its event loop
pub struct MqttBroker {
    client: AsyncClient,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            driver: Mutex::new(None),
        }
    }

    /// Event-loop task awaited by `disconnect` so queued packets get flushed
    pub fn attach_driver(&self, handle: JoinHandle<()>) {
        *self.driver.lock() = Some(handle);
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), BrokerError> {
        let queued = tokio::time::timeout(REQUEST_TIMEOUT, self.client.publish(topic, qos, retain, payload));
        match queued.await {
            Ok(result) => result.map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: format!("request queue still full after {:?}", REQUEST_TIMEOUT),
            }),
        }
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        match tokio::time::timeout(REQUEST_TIMEOUT, self.client.subscribe(topic, qos)).await {
            Ok(result) => result.map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: format!("request queue still full after {:?}", REQUEST_TIMEOUT),
            }),
        }
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let driver = self.driver.lock().take();

        // a full queue is not drained while offline
        if let Err(e) = self.client.try_disconnect() {
            if let Some(handle) = driver {
                handle.abort();
            }
            return Err(BrokerError::Disconnect(e.to_string()));
        }

        if let Some(mut handle) = driver {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("MQTT event loop did not stop within {:?}, aborting it", DRAIN_TIMEOUT);
                handle.abort();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceIdentity;
    use crate::session::BrokerSession;
    use crate::snapshot::MetricSnapshot;
    use rumqttc::MqttOptions;
    use std::sync::Arc;

    const CAPACITY: usize = 4;

    #[tokio::test(start_paused = true)]
    async fn test_full_request_queue_does_not_block_shutdown() {
        // event loop never polled, like a broker that stays unreachable
        let options = MqttOptions::new("agent", "127.0.0.1", 1);
        let (client, _eventloop) = AsyncClient::new(options, CAPACITY);
        let device = DeviceIdentity::new("Test Pi").unwrap();
        let session = BrokerSession::new(Arc::new(MqttBroker::new(client)), device);

        let snapshot = MetricSnapshot::default();
        for _ in 0..CAPACITY {
            session.publish_snapshot(&snapshot).await.unwrap();
        }

        let started = tokio::time::Instant::now();
        let tick = session.publish_snapshot(&snapshot).await;
        assert!(matches!(tick, Err(BrokerError::Publish { .. })));
        assert!(session.announce_offline().await.is_err());
        assert!(matches!(session.disconnect().await, Err(BrokerError::Disconnect(_))));
        assert!(started.elapsed() < REQUEST_TIMEOUT * 3);
    }
}
