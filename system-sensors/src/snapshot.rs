//! One metrics snapshot per publish cycle
//!
//! Each reading is sampled independently. A reading that fails is logged
//! and left out of the payload; the remaining fields are still published.

use crate::error::ReadingError;
use crate::metrics::rate::{NetRate, RateCounter};
use crate::metrics::{format_percent, LoadAverage, MetricReader};
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;

/// State payload published on `system-sensors/sensor/<device>/state`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_boot: Option<String>,

    /// Computed every cycle, not part of the state payload
    #[serde(skip)]
    pub network: Option<NetRate>,
    #[serde(skip)]
    pub load: Option<LoadAverage>,
}

impl MetricSnapshot {
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Names of the payload fields that were sampled
    pub fn present_fields(&self) -> Vec<&'static str> {
        [
            ("temperature", self.temperature.is_some()),
            ("disk_use", self.disk_use.is_some()),
            ("memory_use", self.memory_use.is_some()),
            ("cpu_usage", self.cpu_usage.is_some()),
            ("swap_usage", self.swap_usage.is_some()),
            ("power_status", self.power_status.is_some()),
            ("last_boot", self.last_boot.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

/// Boot epoch seconds -> ISO-8601 in `tz`, e.g. `2024-03-01T08:15:00+01:00`
pub fn format_boot_time(epoch_secs: i64, tz: &Tz) -> Result<String, ReadingError> {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .map(|utc| utc.with_timezone(tz).to_rfc3339())
        .ok_or_else(|| ReadingError::unavailable("last_boot", format!("invalid timestamp {epoch_secs}")))
}

pub struct SnapshotBuilder {
    reader: Mutex<Box<dyn MetricReader>>,
    rate: RateCounter,
    timezone: Tz,
    disk_mount: PathBuf,
}

impl SnapshotBuilder {
    /// Captures the network counters now as the rate baseline
    pub fn new(mut reader: Box<dyn MetricReader>, timezone: Tz) -> Self {
        let baseline = reader.net_counters().unwrap_or_else(|e| {
            warn!("{e}; network rate starts from zero");
            Default::default()
        });
        Self {
            reader: Mutex::new(reader),
            rate: RateCounter::new(baseline, Instant::now()),
            timezone,
            disk_mount: PathBuf::from("/"),
        }
    }

    pub fn with_disk_mount(mut self, mount: impl Into<PathBuf>) -> Self {
        self.disk_mount = mount.into();
        self
    }

    pub fn build(&self) -> MetricSnapshot {
        let mut reader = self.reader.lock();

        let temperature = keep(reader.temperature()).map(|c| format!("{c:.1}"));
        let disk_use = keep(reader.disk_usage(&self.disk_mount)).and_then(format_percent);
        let memory_use = keep(reader.memory_usage()).and_then(format_percent);
        let cpu_usage = keep(reader.cpu_usage()).and_then(format_percent);
        let swap_usage = keep(reader.swap_usage()).and_then(format_percent);
        let power_status = keep(reader.under_voltage())
            .map(|low| if low { "ON" } else { "OFF" }.to_string());
        let last_boot = keep(
            reader
                .boot_time()
                .and_then(|secs| format_boot_time(secs, &self.timezone)),
        );
        let load = keep(reader.load_average());
        let network = keep(reader.net_counters()).map(|c| self.rate.sample(c, Instant::now()));

        MetricSnapshot {
            temperature,
            disk_use,
            memory_use,
            cpu_usage,
            swap_usage,
            power_status,
            last_boot,
            network,
            load,
        }
    }
}

fn keep<T>(reading: Result<T, ReadingError>) -> Option<T> {
    match reading {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(reading = e.reading(), "{e}");
            None
        }
    }
}
