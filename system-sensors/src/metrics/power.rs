//! Raspberry Pi under-voltage detection
//!
//! The `rpi_volt` hwmon device raises `in1_lcrit_alarm` while the supply
//! voltage is below the safe threshold.

use crate::error::ReadingError;
use std::path::{Path, PathBuf};

const HWMON_ROOT: &str = "/sys/class/hwmon";
const SENSOR_NAME: &str = "rpi_volt";
const ALARM_FILE: &str = "in1_lcrit_alarm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnderVoltage {
    Alarm(PathBuf),
    Unsupported,
}

impl UnderVoltage {
    pub fn probe() -> Self {
        Self::probe_in(Path::new(HWMON_ROOT))
    }

    fn probe_in(root: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(root) else {
            return UnderVoltage::Unsupported;
        };
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|dir| {
                std::fs::read_to_string(dir.join("name"))
                    .map(|name| name.trim() == SENSOR_NAME)
                    .unwrap_or(false)
            })
            .map(|dir| UnderVoltage::Alarm(dir.join(ALARM_FILE)))
            .unwrap_or(UnderVoltage::Unsupported)
    }

    pub fn read(&self) -> Result<bool, ReadingError> {
        match self {
            UnderVoltage::Alarm(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ReadingError::unavailable("power_status", format!("{}: {e}", path.display()))
                })?;
                Ok(content.trim() == "1")
            }
            UnderVoltage::Unsupported => Err(ReadingError::unavailable(
                "power_status",
                "no under-voltage sensor on this host",
            )),
        }
    }
}
