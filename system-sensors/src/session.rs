//! Broker session lifecycle
//!
//! States: `Disconnected -> Connecting -> Connected`, back to `Connecting`
//! when the link drops and the transport reconnects, and `Closed` once the
//! agent disconnects on purpose. Availability is published retained on the
//! availability topic; the last will registered at connect time covers
//! unclean exits.

use crate::broker::{Broker, QoS};
use crate::config::DeviceIdentity;
use crate::discovery::{self, Topics};
use crate::error::BrokerError;
use crate::snapshot::MetricSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

/// Result of the broker's CONNACK
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accepted,
    Refused(String),
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    /// Number of accepted connections so far
    connections: u32,
}

pub struct BrokerSession {
    broker: Arc<dyn Broker>,
    device: DeviceIdentity,
    topics: Topics,
    lifecycle: Mutex<Lifecycle>,
}

impl BrokerSession {
    pub fn new(broker: Arc<dyn Broker>, device: DeviceIdentity) -> Self {
        let topics = Topics::new(&device);
        Self {
            broker,
            device,
            topics,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Disconnected,
                connections: 0,
            }),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    /// Payload the broker publishes on our behalf after an unclean exit
    pub fn last_will(&self) -> (&str, Availability) {
        (&self.topics.availability, Availability::Offline)
    }

    /// The transport started (or restarted) its connection attempt
    pub fn mark_connecting(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != SessionState::Closed {
            lifecycle.state = SessionState::Connecting;
        }
    }

    /// The transport lost the link; it reconnects on its own
    pub fn on_link_lost(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == SessionState::Connected {
            warn!("Broker link lost, waiting for reconnect");
            lifecycle.state = SessionState::Connecting;
        }
    }

    /// CONNACK received
    ///
    /// On success: subscribe to the Home Assistant status topic and publish
    /// `online`. After a reconnect the discovery set is announced again
    /// since the transport may have reconnected silently.
    pub async fn on_connection_established(&self, outcome: ConnectOutcome) -> Result<(), BrokerError> {
        let reconnect = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == SessionState::Closed {
                return Err(BrokerError::Closed);
            }
            match &outcome {
                ConnectOutcome::Accepted => {
                    lifecycle.state = SessionState::Connected;
                    lifecycle.connections += 1;
                    lifecycle.connections > 1
                }
                ConnectOutcome::Refused(reason) => {
                    lifecycle.state = SessionState::Disconnected;
                    error!("Connection failed: {}", reason);
                    return Err(BrokerError::Refused(reason.clone()));
                }
            }
        };

        info!("Connected to broker");
        self.broker
            .subscribe(&self.topics.hass_status, QoS::AtMostOnce)
            .await?;
        self.publish_availability(Availability::Online).await?;

        if reconnect {
            info!("Reconnected, announcing discovery again");
            self.publish_discovery().await?;
        }
        Ok(())
    }

    /// Incoming publish on a subscribed topic
    ///
    /// `online` on the status topic means Home Assistant restarted and
    /// lost its entities, so the discovery set is published again.
    pub async fn on_message_received(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let text = String::from_utf8_lossy(payload);
        info!("Message received on {}: {}", topic, text);
        if topic == self.topics.hass_status && text == Availability::Online.as_str() {
            self.publish_discovery().await?;
        }
        Ok(())
    }

    /// State payload, QoS 1, not retained
    pub async fn publish_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let payload = snapshot.to_payload()?;
        debug!("Publishing state: {}", payload);
        self.broker
            .publish(&self.topics.state, QoS::AtLeastOnce, false, payload.into_bytes())
            .await
    }

    /// One retained descriptor per entity
    pub async fn publish_discovery(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        info!("Sending discovery config for {}", self.device.display_name);
        for (topic, payload) in discovery::announcements(&self.device, &self.topics)? {
            self.broker
                .publish(&topic, QoS::AtLeastOnce, true, payload.into_bytes())
                .await?;
        }
        Ok(())
    }

    /// Empty payloads on the topic scheme of earlier releases
    ///
    /// Each topic is cleared independently; failures are logged and the
    /// remaining topics are still cleared.
    pub async fn remove_stale_discovery(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut first_error = None;
        for topic in self.topics.legacy_discovery() {
            if let Err(e) = self.broker.publish(&topic, QoS::AtLeastOnce, false, Vec::new()).await {
                warn!("Failed to clear legacy topic {}: {}", topic, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// `offline`, retained; used only on graceful shutdown
    pub async fn announce_offline(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.publish_availability(Availability::Offline).await
    }

    /// Close the session; no publish is accepted afterwards
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == SessionState::Closed {
                return Ok(());
            }
            lifecycle.state = SessionState::Closed;
        }
        self.broker.disconnect().await
    }

    async fn publish_availability(&self, availability: Availability) -> Result<(), BrokerError> {
        self.broker
            .publish(
                &self.topics.availability,
                QoS::AtLeastOnce,
                true,
                availability.as_str().as_bytes().to_vec(),
            )
            .await
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.state() == SessionState::Closed {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, bool)>>,
        subscribed: Mutex<Vec<String>>,
        disconnects: Mutex<u32>,
    }

    #[async_trait]
    impl Broker for Recorder {
        async fn publish(&self, topic: &str, _qos: QoS, retain: bool, _payload: Vec<u8>) -> Result<(), BrokerError> {
            self.published.lock().push((topic.to_string(), retain));
            Ok(())
        }
        async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), BrokerError> {
            self.subscribed.lock().push(topic.to_string());
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), BrokerError> {
            *self.disconnects.lock() += 1;
            Ok(())
        }
    }

    fn session() -> (Arc<Recorder>, BrokerSession) {
        let recorder = Arc::new(Recorder::default());
        let device = DeviceIdentity::new("Test Pi").unwrap();
        let session = BrokerSession::new(recorder.clone(), device);
        (recorder, session)
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (recorder, session) = session();
        assert_eq!(session.state(), SessionState::Disconnected);

        session.mark_connecting();
        assert_eq!(session.state(), SessionState::Connecting);

        session.on_connection_established(ConnectOutcome::Accepted).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(*recorder.subscribed.lock(), vec!["hass/status".to_string()]);

        session.on_link_lost();
        assert_eq!(session.state(), SessionState::Connecting);

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(*recorder.disconnects.lock(), 1);

        session.mark_connecting();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_refused_connection_stays_disconnected() {
        let (recorder, session) = session();
        session.mark_connecting();
        let err = session
            .on_connection_established(ConnectOutcome::Refused("bad credentials".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Refused(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(recorder.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_announces_discovery() {
        let (recorder, session) = session();
        session.on_connection_established(ConnectOutcome::Accepted).await.unwrap();
        assert_eq!(recorder.published.lock().len(), 1);

        session.on_link_lost();
        session.on_connection_established(ConnectOutcome::Accepted).await.unwrap();
        // online + 7 descriptors
        assert_eq!(recorder.published.lock().len(), 1 + 8);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_publishes() {
        let (_, session) = session();
        session.disconnect().await.unwrap();
        let snapshot = MetricSnapshot::default();
        assert!(matches!(session.publish_snapshot(&snapshot).await, Err(BrokerError::Closed)));
        assert!(matches!(session.announce_offline().await, Err(BrokerError::Closed)));
    }

    #[test]
    fn test_last_will_targets_availability() {
        let (_, session) = session();
        let (topic, payload) = session.last_will();
        assert_eq!(topic, "system-sensors/sensor/testpi/availability");
        assert_eq!(payload.as_str(), "offline");
    }
}
