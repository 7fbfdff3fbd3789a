//! System Sensors - host telemetry for Home Assistant over MQTT
//!
//! The agent samples local metrics on a fixed interval and publishes them:
//! - Metric readers (CPU, memory, disk, swap, temperature, boot time, under-voltage)
//! - Network rate counter over cumulative byte counters
//! - Periodic job publishing one state snapshot per tick
//! - Broker session with availability, last will and discovery announce
//! - Signal-driven graceful shutdown

pub mod broker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use config::{DeviceIdentity, Settings};
pub use error::{BrokerError, ConfigError, ReadingError};
pub use lifecycle::Agent;
pub use session::{Availability, BrokerSession, ConnectOutcome, SessionState};
pub use snapshot::{MetricSnapshot, SnapshotBuilder};
