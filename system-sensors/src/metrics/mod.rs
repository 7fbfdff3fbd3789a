//! Instantaneous host readings
//!
//! Provides:
//! - CPU, memory, swap and disk usage percentages
//! - Load averages and boot time
//! - Temperature (firmware query or hwmon file, probed at startup)
//! - Under-voltage state on Raspberry Pi boards
//! - Cumulative network byte counters for the rate counter

pub mod power;
pub mod rate;
pub mod temperature;

use crate::error::ReadingError;
use power::UnderVoltage;
use serde::Serialize;
use std::path::Path;
use sysinfo::{Disks, Networks, System};
use temperature::TemperatureSource;
use tracing::debug;

/// Source of one reading per call
///
/// Every method is independent: a failing reading never affects the
/// others. `&mut self` only because OS handles are refreshed in place.
pub trait MetricReader: Send {
    /// Degrees Celsius
    fn temperature(&mut self) -> Result<f32, ReadingError>;
    /// Used percentage of the filesystem mounted at `mount_point`
    fn disk_usage(&mut self, mount_point: &Path) -> Result<f32, ReadingError>;
    fn memory_usage(&mut self) -> Result<f32, ReadingError>;
    fn cpu_usage(&mut self) -> Result<f32, ReadingError>;
    fn swap_usage(&mut self) -> Result<f32, ReadingError>;
    fn load_average(&mut self) -> Result<LoadAverage, ReadingError>;
    /// Boot time as seconds since the Unix epoch
    fn boot_time(&mut self) -> Result<i64, ReadingError>;
    /// `true` when the board reports an under-voltage condition
    fn under_voltage(&mut self) -> Result<bool, ReadingError>;
    fn net_counters(&mut self) -> Result<NetCounters, ReadingError>;
}

/// Cumulative bytes since boot, all interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWindow {
    One,
    Five,
    Fifteen,
}

impl LoadAverage {
    pub fn select(&self, window: LoadWindow) -> f64 {
        match window {
            LoadWindow::One => self.one,
            LoadWindow::Five => self.five,
            LoadWindow::Fifteen => self.fifteen,
        }
    }
}

/// Percentage in [0, 100] with one decimal, e.g. `"42.5"`
pub fn format_percent(value: f32) -> Option<String> {
    if value.is_nan() {
        return None;
    }
    Some(format!("{:.1}", value.clamp(0.0, 100.0)))
}

fn percent_of(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

/// Readings backed by sysinfo plus the probed board sensors
pub struct SystemReader {
    system: System,
    disks: Disks,
    networks: Networks,
    temperature: TemperatureSource,
    under_voltage: UnderVoltage,
}

impl SystemReader {
    /// Probe the host once and prime the CPU counters
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is measured between two refreshes; this one is the baseline
        system.refresh_cpu_usage();

        let temperature = TemperatureSource::probe();
        let under_voltage = UnderVoltage::probe();
        debug!(
            "Metric reader ready (temperature: {:?}, under-voltage: {:?})",
            temperature, under_voltage
        );

        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            temperature,
            under_voltage,
        }
    }
}

impl Default for SystemReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricReader for SystemReader {
    fn temperature(&mut self) -> Result<f32, ReadingError> {
        self.temperature.read()
    }

    fn disk_usage(&mut self, mount_point: &Path) -> Result<f32, ReadingError> {
        self.disks.refresh_list();
        let disk = self
            .disks
            .iter()
            .find(|d| d.mount_point() == mount_point)
            .ok_or_else(|| {
                ReadingError::unavailable(
                    "disk_use",
                    format!("no filesystem mounted at {}", mount_point.display()),
                )
            })?;
        let total = disk.total_space();
        let used = total.saturating_sub(disk.available_space());
        Ok(percent_of(used, total))
    }

    fn memory_usage(&mut self) -> Result<f32, ReadingError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ReadingError::unavailable("memory_use", "total memory is zero"));
        }
        let used = total.saturating_sub(self.system.available_memory());
        Ok(percent_of(used, total))
    }

    fn cpu_usage(&mut self) -> Result<f32, ReadingError> {
        self.system.refresh_cpu_usage();
        Ok(self.system.global_cpu_info().cpu_usage())
    }

    fn swap_usage(&mut self) -> Result<f32, ReadingError> {
        self.system.refresh_memory();
        // No swap configured reads as 0%
        Ok(percent_of(self.system.used_swap(), self.system.total_swap()))
    }

    fn load_average(&mut self) -> Result<LoadAverage, ReadingError> {
        if !cfg!(unix) {
            return Err(ReadingError::unavailable("load_average", "not supported on this OS"));
        }
        let load = System::load_average();
        Ok(LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        })
    }

    fn boot_time(&mut self) -> Result<i64, ReadingError> {
        match System::boot_time() {
            0 => Err(ReadingError::unavailable("last_boot", "boot time not reported")),
            secs => i64::try_from(secs)
                .map_err(|_| ReadingError::unavailable("last_boot", "boot time out of range")),
        }
    }

    fn under_voltage(&mut self) -> Result<bool, ReadingError> {
        self.under_voltage.read()
    }

    fn net_counters(&mut self) -> Result<NetCounters, ReadingError> {
        self.networks.refresh();
        let counters = self
            .networks
            .iter()
            .fold(NetCounters::default(), |acc, (_, data)| NetCounters {
                bytes_sent: acc.bytes_sent + data.total_transmitted(),
                bytes_recv: acc.bytes_recv + data.total_received(),
            });
        Ok(counters)
    }
}
