//! rumqttc connection setup and event-loop driver

use crate::broker::MqttBroker;
use crate::config::Settings;
use crate::error::BrokerError;
use crate::session::{BrokerSession, ConnectOutcome, SessionState};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;

type ReadySender = oneshot::Sender<Result<(), BrokerError>>;

/// Client options: identity, credentials and the `offline` last will
pub fn mqtt_options(settings: &Settings, will_topic: &str) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.broker.host, settings.broker.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_last_will(LastWill::new(
        will_topic,
        "offline".as_bytes().to_vec(),
        QoS::AtLeastOnce,
        true,
    ));
    if let Some(credentials) = &settings.broker.credentials {
        options.set_credentials(&credentials.username, &credentials.password);
    }
    options
}

/// Connect to the broker and wait for the first CONNACK
///
/// Fails with the fatal connection error if the broker refuses us or
/// cannot be reached; later link losses are handled by the driver.
pub async fn connect(settings: &Settings) -> Result<Arc<BrokerSession>, BrokerError> {
    let will_topic = crate::discovery::Topics::new(&settings.device).availability;
    let options = mqtt_options(settings, &will_topic);
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

    let broker = Arc::new(MqttBroker::new(client));
    let session = Arc::new(BrokerSession::new(broker.clone(), settings.device.clone()));
    session.mark_connecting();

    debug!(
        "Connecting to {}:{} as {}",
        settings.broker.host, settings.broker.port, settings.client_id
    );
    let (ready_tx, ready_rx) = oneshot::channel();
    let driver = tokio::spawn(drive(eventloop, session.clone(), ready_tx));
    broker.attach_driver(driver);

    match ready_rx.await {
        Ok(Ok(())) => Ok(session),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BrokerError::Connection("event loop stopped before connecting".into())),
    }
}

/// Poll the event loop until the session disconnects
///
/// Session callbacks run on their own tasks: they publish through the
/// client, and the client's requests are only drained by this loop.
async fn drive(mut eventloop: EventLoop, session: Arc<BrokerSession>, ready: ReadySender) {
    let mut ready = Some(ready);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let outcome = connect_outcome(ack.code);
                let session = session.clone();
                let ready = ready.take();
                tokio::spawn(async move {
                    let result = session.on_connection_established(outcome).await;
                    if let Err(e) = &result {
                        error!("Connection setup failed: {}", e);
                    }
                    if let Some(ready) = ready {
                        let _ = ready.send(result);
                    }
                });
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.on_message_received(&publish.topic, &publish.payload).await {
                        error!("Failed to handle message on {}: {}", publish.topic, e);
                    }
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent, stopping event loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(initial_connect_error(e)));
                    break;
                }
                if session.state() == SessionState::Closed {
                    break;
                }
                session.on_link_lost();
                warn!("MQTT connection error: {}", e);
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                session.mark_connecting();
            }
        }
    }
}

fn connect_outcome(code: ConnectReturnCode) -> ConnectOutcome {
    match code {
        ConnectReturnCode::Success => ConnectOutcome::Accepted,
        other => ConnectOutcome::Refused(format!("{other:?}")),
    }
}

fn initial_connect_error(e: ConnectionError) -> BrokerError {
    match e {
        ConnectionError::ConnectionRefused(code) => BrokerError::Refused(format!("{code:?}")),
        other => BrokerError::Connection(other.to_string()),
    }
}
