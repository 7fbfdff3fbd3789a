#![cfg(unix)]

use nix::sys::signal::{raise, Signal};
use sensors_devkit::fake_broker::CONNACK_ACCEPTED;
use sensors_devkit::FakeBroker;
use std::time::Duration;
use system_sensors::{lifecycle, Settings};
use tokio::time::timeout;

const BUDGET: Duration = Duration::from_secs(15);

#[tokio::test(flavor = "multi_thread")]
async fn test_sigterm_ends_run_cleanly() {
    let fake = FakeBroker::bind().await.unwrap();
    let port = fake.addr().unwrap().port();
    let settings = Settings::from_yaml(&format!(
        "mqtt:\n  hostname: 127.0.0.1\n  port: {port}\ndeviceName: Test Pi\ntimezone: UTC\nclient_id: run-test\n"
    ))
    .unwrap();

    let run = tokio::spawn(lifecycle::run(settings));
    let mut connection = timeout(BUDGET, fake.accept(CONNACK_ACCEPTED))
        .await
        .unwrap()
        .unwrap();
    let announced = connection
        .wait_for_publish("homeassistant/sensor/testpi/last_boot/config", BUDGET)
        .await;
    assert!(announced.is_some());

    raise(Signal::SIGTERM).unwrap();
    let exit = timeout(BUDGET, run).await.unwrap().unwrap();
    assert!(exit.is_ok(), "{:?}", exit);

    let offline = connection
        .wait_for_publish("system-sensors/sensor/testpi/availability", BUDGET)
        .await
        .unwrap();
    assert_eq!(offline.text(), "offline");
    assert!(offline.retain);
}
