#![cfg(unix)]

use nix::sys::signal::{raise, Signal};
use std::time::Duration;
use system_sensors::lifecycle::ShutdownSignal;
use tokio::time::timeout;

#[tokio::test]
async fn test_shutdown_signal_names_the_signal() {
    let mut signals = ShutdownSignal::install().unwrap();

    raise(Signal::SIGTERM).unwrap();
    assert_eq!(timeout(Duration::from_secs(5), signals.recv()).await.unwrap(), "SIGTERM");

    raise(Signal::SIGINT).unwrap();
    assert_eq!(timeout(Duration::from_secs(5), signals.recv()).await.unwrap(), "SIGINT");
}
