use sensors_devkit::{MockEvent, ScriptedReader, TestHarness};
use std::io::Write;
use std::time::Duration;
use system_sensors::broker::QoS;
use system_sensors::lifecycle::SHUTDOWN_STEP_TIMEOUT;
use system_sensors::{SessionState, Settings};

const STATE: &str = "system-sensors/sensor/testpi/state";
const AVAILABILITY: &str = "system-sensors/sensor/testpi/availability";

async fn settings_from_file() -> Settings {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "mqtt:\n  hostname: broker\ndeviceName: Test Pi\ntimezone: UTC\nclient_id: x"
    )
    .unwrap();
    Settings::load(file.path()).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_full_lifecycle() {
    let settings = settings_from_file().await;
    assert_eq!(settings.update_interval, Duration::from_secs(60));

    let harness = TestHarness::new(&settings.device.display_name)
        .unwrap()
        .with_timezone(settings.timezone);
    harness.connect().await.unwrap();
    let running = harness.spawn_agent(ScriptedReader::new(), settings.update_interval);

    // availability first, then the discovery set
    assert!(harness.wait_for_messages("homeassistant/sensor/testpi/last_boot/config", 1, Duration::from_secs(1)).await);
    let retained = harness.broker.retained_messages();
    assert_eq!(retained.len(), 8);
    assert_eq!(retained[0].topic, AVAILABILITY);
    assert_eq!(retained[0].text(), "online");
    assert!(retained[1..].iter().all(|m| m.topic.starts_with("homeassistant/")));
    assert!(harness.broker.find_messages_by_topic(STATE).is_empty());

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(harness.wait_for_messages(STATE, 1, Duration::from_secs(2)).await);

    let states = harness.broker.find_messages_by_topic(STATE);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].qos, QoS::AtLeastOnce);
    assert!(!states[0].retain);
    harness.assert_field_equals(STATE, "temperature", "48.3").unwrap();
    harness.assert_field_equals(STATE, "disk_use", "37.4").unwrap();
    harness.assert_field_equals(STATE, "memory_use", "61.0").unwrap();
    harness.assert_field_equals(STATE, "cpu_usage", "12.5").unwrap();
    harness.assert_field_equals(STATE, "swap_usage", "0.0").unwrap();
    harness.assert_field_equals(STATE, "power_status", "OFF").unwrap();
    harness
        .assert_field_equals(STATE, "last_boot", "2023-11-14T22:13:20+00:00")
        .unwrap();

    running.shutdown().await.unwrap();

    let events = harness.broker.events();
    let n = events.len();
    assert_eq!(events[n - 1], MockEvent::Disconnected);
    match &events[n - 2] {
        MockEvent::Published(msg) => {
            assert_eq!(msg.topic, AVAILABILITY);
            assert_eq!(msg.text(), "offline");
            assert!(msg.retain);
        }
        other => panic!("expected offline, got {:?}", other),
    }
    assert_eq!(harness.session.state(), SessionState::Closed);

    // the job is stopped: no further state publishes
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(harness.broker.find_messages_by_topic(STATE).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reading_is_left_out_of_payload() {
    let harness = TestHarness::new("Test Pi").unwrap();
    harness.connect().await.unwrap();
    let running = harness.spawn_agent(
        ScriptedReader::new().failing("temperature"),
        Duration::from_secs(5),
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(harness.wait_for_messages(STATE, 1, Duration::from_secs(1)).await);

    let payload: serde_json::Value = harness.broker.get_last_json_message(STATE).unwrap().unwrap();
    assert!(payload.get("temperature").is_none());
    assert_eq!(payload["cpu_usage"], "12.5");

    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_does_not_stop_schedule() {
    let harness = TestHarness::new("Test Pi").unwrap();
    harness.connect().await.unwrap();
    harness.broker.fail_publishes_to(STATE);
    let running = harness.spawn_agent(ScriptedReader::new(), Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(harness.broker.find_messages_by_topic(STATE).is_empty());

    // the broker recovers: the next tick goes through
    harness.broker.clear();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(harness.wait_for_messages(STATE, 1, Duration::from_secs(1)).await);

    running.shutdown().await.unwrap();
    assert_eq!(harness.broker.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_first_tick() {
    let harness = TestHarness::new("Test Pi").unwrap();
    harness.connect().await.unwrap();
    let running = harness.spawn_agent(ScriptedReader::new(), Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(1)).await;
    running.shutdown().await.unwrap();

    assert!(harness.broker.find_messages_by_topic(STATE).is_empty());
    let offline = harness.broker.find_messages_by_topic(AVAILABILITY);
    assert_eq!(offline.last().unwrap().text(), "offline");
    assert_eq!(harness.broker.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_finishes_when_broker_stalls() {
    let harness = TestHarness::new("Test Pi").unwrap();
    harness.connect().await.unwrap();
    let running = harness.spawn_agent(ScriptedReader::new(), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(1)).await;

    // the tick at 60s blocks on the state publish and never returns
    harness.broker.stall_publishes_to(STATE);
    harness.broker.stall_publishes_to(AVAILABILITY);
    harness.broker.stall_disconnect();
    tokio::time::sleep(Duration::from_secs(61)).await;

    let budget = SHUTDOWN_STEP_TIMEOUT * 4;
    let exit = tokio::time::timeout(budget, running.shutdown()).await;
    assert!(matches!(exit, Ok(Ok(()))), "shutdown did not finish within {:?}", budget);

    assert_eq!(harness.session.state(), SessionState::Closed);
    assert_eq!(harness.broker.disconnect_count(), 0);
    assert!(harness.broker.find_messages_by_topic(STATE).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_offline_announce_still_disconnects() {
    let harness = TestHarness::new("Test Pi").unwrap();
    harness.connect().await.unwrap();
    let running = harness.spawn_agent(ScriptedReader::new(), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(1)).await;

    harness.broker.stall_publishes_to(AVAILABILITY);
    running.shutdown().await.unwrap();

    assert_eq!(harness.broker.disconnect_count(), 1);
    assert_eq!(harness.session.state(), SessionState::Closed);
}
