//! Settings loading and validation
//!
//! Handles:
//! - MQTT broker endpoint and optional credentials
//! - Device identity (topic name + display name)
//! - Timezone used to localize timestamps
//! - Sampling interval

use crate::error::ConfigError;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

/// Validated agent settings, immutable for the process lifetime
#[derive(Debug, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub device: DeviceIdentity,
    pub client_id: String,
    pub timezone: Tz,
    pub update_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Device naming used for topics and Home Assistant entities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Lowercase, no spaces. Used in every topic and unique id.
    pub topic_name: String,
    /// Name as written in the settings file
    pub display_name: String,
}

impl DeviceIdentity {
    pub fn new(display_name: &str) -> Result<Self, ConfigError> {
        let topic_name = normalize_device_name(display_name);
        if topic_name.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "deviceName",
                reason: "device name is empty".to_string(),
            });
        }
        Ok(Self {
            topic_name,
            display_name: display_name.to_string(),
        })
    }
}

/// `"Living Room"` -> `"livingroom"`
pub fn normalize_device_name(name: &str) -> String {
    name.replace(' ', "").to_lowercase()
}

/// Settings file as written on disk, before validation
#[derive(Debug, Deserialize)]
struct RawSettings {
    mqtt: Option<RawMqtt>,
    #[serde(rename = "deviceName")]
    device_name: Option<String>,
    client_id: Option<String>,
    timezone: Option<String>,
    update_interval: Option<u64>,
    power_integer_state: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawMqtt {
    hostname: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
}

impl Settings {
    /// Read and validate the settings file at `path`
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&content)
    }

    /// Validate settings from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::MissingField("mqtt"));
        }
        let raw: Option<RawSettings> = serde_yaml::from_str(content)?;
        let raw = raw.ok_or(ConfigError::MissingField("mqtt"))?;

        let mqtt = raw.mqtt.ok_or(ConfigError::MissingField("mqtt"))?;
        let host = required(mqtt.hostname, "mqtt.hostname")?;
        let timezone = required(raw.timezone, "timezone")?;
        let device_name = required(raw.device_name, "deviceName")?;
        let client_id = required(raw.client_id, "client_id")?;

        if raw.power_integer_state.is_some() {
            warn!("power_integer_state is deprecated please remove this option power state is now a binary_sensor!");
        }

        let credentials = match (mqtt.user, mqtt.password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (Some(_), None) => return Err(ConfigError::MissingField("mqtt.password")),
            (None, _) => None,
        };

        let timezone: Tz = timezone.parse().map_err(|e| ConfigError::InvalidField {
            field: "timezone",
            reason: format!("{e}"),
        })?;

        let interval_secs = raw.update_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(ConfigError::InvalidField {
                field: "update_interval",
                reason: "must be a positive number of seconds".to_string(),
            });
        }

        Ok(Settings {
            broker: BrokerSettings {
                host,
                port: mqtt.port.unwrap_or(DEFAULT_PORT),
                credentials,
            },
            device: DeviceIdentity::new(&device_name)?,
            client_id,
            timezone,
            update_interval: Duration::from_secs(interval_secs),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingField(field)),
    }
}
