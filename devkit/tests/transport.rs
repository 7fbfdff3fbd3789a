use sensors_devkit::fake_broker::{CONNACK_ACCEPTED, CONNACK_BAD_CREDENTIALS};
use sensors_devkit::FakeBroker;
use serde_json::Value;
use std::time::Duration;
use system_sensors::{transport, BrokerError, SessionState, Settings};
use tokio::time::timeout;

const BUDGET: Duration = Duration::from_secs(10);
const LAST_DESCRIPTOR: &str = "homeassistant/sensor/testpi/last_boot/config";

fn settings(port: u16) -> Settings {
    let yaml = format!(
        "mqtt:\n  hostname: 127.0.0.1\n  port: {port}\ndeviceName: Test Pi\ntimezone: UTC\nclient_id: transport-test\n"
    );
    Settings::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn test_unreachable_broker_is_fatal() {
    // bind then drop: nothing listens on the port afterwards
    let port = {
        let fake = FakeBroker::bind().await.unwrap();
        fake.addr().unwrap().port()
    };

    match timeout(BUDGET, transport::connect(&settings(port))).await.unwrap() {
        Ok(_) => panic!("connected to a closed port"),
        Err(e) => assert!(matches!(e, BrokerError::Connection(_)), "{e}"),
    }
}

#[tokio::test]
async fn test_refused_connack_is_fatal() {
    let fake = FakeBroker::bind().await.unwrap();
    let settings = settings(fake.addr().unwrap().port());

    let (result, accepted) = tokio::join!(
        timeout(BUDGET, transport::connect(&settings)),
        fake.accept(CONNACK_BAD_CREDENTIALS)
    );
    accepted.unwrap();
    match result.unwrap() {
        Ok(_) => panic!("refused connection reported as connected"),
        Err(e) => assert!(matches!(e, BrokerError::Refused(_)), "{e}"),
    }
}

#[tokio::test]
async fn test_driver_dispatches_connack_and_incoming_publish() {
    let fake = FakeBroker::bind().await.unwrap();
    let settings = settings(fake.addr().unwrap().port());

    let (session, connection) = tokio::join!(
        timeout(BUDGET, transport::connect(&settings)),
        fake.accept(CONNACK_ACCEPTED)
    );
    let session = session.unwrap().unwrap();
    let mut connection = connection.unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    let online = connection
        .wait_for_publish(&session.topics().availability, BUDGET)
        .await
        .unwrap();
    assert_eq!(online.text(), "online");
    assert!(online.retain);

    connection.publish_to_client("hass/status", b"online").await.unwrap();
    let descriptor = connection.wait_for_publish(LAST_DESCRIPTOR, BUDGET).await.unwrap();
    assert!(descriptor.retain);
    let json: Value = serde_json::from_slice(&descriptor.payload).unwrap();
    assert_eq!(json["unique_id"], "testpi_sensor_last_boot");

    timeout(BUDGET, session.disconnect()).await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_link_loss_backs_off_then_reannounces() {
    let fake = FakeBroker::bind().await.unwrap();
    let settings = settings(fake.addr().unwrap().port());

    let (session, connection) = tokio::join!(
        timeout(BUDGET, transport::connect(&settings)),
        fake.accept(CONNACK_ACCEPTED)
    );
    let session = session.unwrap().unwrap();
    drop(connection.unwrap());

    let lost = timeout(BUDGET, async {
        while session.state() != SessionState::Connecting {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(lost.is_ok(), "link loss not noticed");

    // the transport comes back after its back-off and announces discovery again
    let mut connection = timeout(BUDGET, fake.accept(CONNACK_ACCEPTED))
        .await
        .unwrap()
        .unwrap();
    assert!(connection.wait_for_publish(LAST_DESCRIPTOR, BUDGET).await.is_some());
    assert_eq!(session.state(), SessionState::Connected);

    timeout(BUDGET, session.disconnect()).await.unwrap().unwrap();
}
