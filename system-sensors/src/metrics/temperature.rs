//! Temperature reading strategy
//!
//! Raspberry Pi OS reports the SoC temperature through the firmware
//! (`vcgencmd measure_temp`); other Linux hosts expose millidegree files
//! under hwmon or the thermal subsystem. The strategy is chosen once.

use crate::error::ReadingError;
use std::path::{Path, PathBuf};
use std::process::Command;

const OS_RELEASE: &str = "/etc/os-release";

const MILLIDEGREE_CANDIDATES: &[&str] = &[
    "/sys/class/hwmon/hwmon0/temp1_input",
    "/sys/class/thermal/thermal_zone0/temp",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemperatureSource {
    /// `vcgencmd measure_temp`
    Firmware,
    /// File holding an integer in millidegrees Celsius
    Hwmon(PathBuf),
    Unavailable,
}

impl TemperatureSource {
    /// Pick a source for this host
    pub fn probe() -> Self {
        let os_id = std::fs::read_to_string(OS_RELEASE)
            .ok()
            .and_then(|content| os_release_id(&content));
        let candidates = MILLIDEGREE_CANDIDATES.iter().map(Path::new);
        Self::select(os_id.as_deref(), candidates)
    }

    fn select<'a>(os_id: Option<&str>, candidates: impl IntoIterator<Item = &'a Path>) -> Self {
        if os_id.is_some_and(|id| id.contains("rasp")) {
            return TemperatureSource::Firmware;
        }
        candidates
            .into_iter()
            .find(|path| path.exists())
            .map(|path| TemperatureSource::Hwmon(path.to_path_buf()))
            .unwrap_or(TemperatureSource::Unavailable)
    }

    pub fn read(&self) -> Result<f32, ReadingError> {
        match self {
            TemperatureSource::Firmware => {
                let output = Command::new("vcgencmd")
                    .arg("measure_temp")
                    .output()
                    .map_err(|e| ReadingError::unavailable("temperature", format!("vcgencmd: {e}")))?;
                if !output.status.success() {
                    return Err(ReadingError::unavailable(
                        "temperature",
                        format!("vcgencmd exited with {}", output.status),
                    ));
                }
                parse_firmware_reading(&String::from_utf8_lossy(&output.stdout))
            }
            TemperatureSource::Hwmon(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ReadingError::unavailable("temperature", format!("{}: {e}", path.display()))
                })?;
                parse_millidegrees(&content)
            }
            TemperatureSource::Unavailable => Err(ReadingError::unavailable(
                "temperature",
                "no temperature sensor on this host",
            )),
        }
    }
}

/// `ID=raspbian` / `ID="ubuntu"` -> value of the `ID` key
pub fn os_release_id(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "ID")
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

/// `temp=48.3'C` -> 48.3
pub fn parse_firmware_reading(reading: &str) -> Result<f32, ReadingError> {
    let value = reading
        .trim()
        .strip_prefix("temp=")
        .and_then(|rest| rest.split('\'').next())
        .ok_or_else(|| ReadingError::unavailable("temperature", format!("unexpected output {reading:?}")))?;
    value
        .parse()
        .map_err(|_| ReadingError::unavailable("temperature", format!("unexpected output {reading:?}")))
}

/// `48312` -> 48.312
pub fn parse_millidegrees(content: &str) -> Result<f32, ReadingError> {
    let millis: i64 = content.trim().parse().map_err(|_| {
        ReadingError::unavailable("temperature", format!("invalid millidegree value {content:?}"))
    })?;
    Ok(millis as f32 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_os_release_id() {
        let content = "PRETTY_NAME=\"Raspbian GNU/Linux 11 (bullseye)\"\nNAME=\"Raspbian GNU/Linux\"\nID=raspbian\nID_LIKE=debian\n";
        assert_eq!(os_release_id(content).as_deref(), Some("raspbian"));
        assert_eq!(os_release_id("ID=\"ubuntu\"\n").as_deref(), Some("ubuntu"));
        assert_eq!(os_release_id("NAME=x\n"), None);
    }

    #[test]
    fn test_parse_firmware_reading() {
        assert_eq!(parse_firmware_reading("temp=48.3'C\n").unwrap(), 48.3);
        assert!(parse_firmware_reading("error").is_err());
    }

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_millidegrees("48312\n").unwrap(), 48.312);
        assert!(parse_millidegrees("n/a").is_err());
    }

    #[test]
    fn test_raspberry_pi_selects_firmware() {
        let source = TemperatureSource::select(Some("raspbian"), Vec::<&Path>::new());
        assert_eq!(source, TemperatureSource::Firmware);
    }

    #[test]
    fn test_hwmon_selection_and_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "51250").unwrap();
        let missing = Path::new("/nonexistent/temp1_input");

        let source = TemperatureSource::select(Some("debian"), [missing, file.path()]);
        assert_eq!(source, TemperatureSource::Hwmon(file.path().to_path_buf()));
        assert_eq!(source.read().unwrap(), 51.25);
    }

    #[test]
    fn test_no_sensor_is_unavailable() {
        let source = TemperatureSource::select(None, [Path::new("/nonexistent/temp")]);
        assert_eq!(source, TemperatureSource::Unavailable);
        assert_eq!(source.read().unwrap_err().reading(), "temperature");
    }
}
