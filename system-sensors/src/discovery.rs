//! Home Assistant MQTT discovery
//!
//! This module handles:
//! - Topic naming for state, availability and discovery config
//! - One discovery descriptor per entity, grouped under a shared device
//! - The legacy per-entity topic scheme cleared on startup

use crate::config::DeviceIdentity;
use serde::Serialize;

pub const STATE_PREFIX: &str = "system-sensors/sensor";
pub const DISCOVERY_PREFIX: &str = "homeassistant";
/// Home Assistant publishes `online` here when it (re)starts
pub const HASS_STATUS_TOPIC: &str = "hass/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Sensor,
    BinarySensor,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Sensor => "sensor",
            Component::BinarySensor => "binary_sensor",
        }
    }
}

/// Static description of one published entity
#[derive(Debug, Clone, Copy)]
pub struct Entity {
    /// Key in the state payload and suffix of the unique id
    pub key: &'static str,
    pub component: Component,
    /// Appended to the device display name
    pub label: &'static str,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub icon: Option<&'static str>,
}

pub const ENTITIES: [Entity; 7] = [
    Entity {
        key: "temperature",
        component: Component::Sensor,
        label: "Temperature",
        device_class: Some("temperature"),
        unit: Some("°C"),
        icon: Some("mdi:thermometer"),
    },
    Entity {
        key: "disk_use",
        component: Component::Sensor,
        label: "Disk Use",
        device_class: None,
        unit: Some("%"),
        icon: Some("mdi:micro-sd"),
    },
    Entity {
        key: "memory_use",
        component: Component::Sensor,
        label: "Memory Use",
        device_class: None,
        unit: Some("%"),
        icon: Some("mdi:memory"),
    },
    Entity {
        key: "cpu_usage",
        component: Component::Sensor,
        label: "Cpu Usage",
        device_class: None,
        unit: Some("%"),
        icon: Some("mdi:memory"),
    },
    Entity {
        key: "swap_usage",
        component: Component::Sensor,
        label: "Swap Usage",
        device_class: None,
        unit: Some("%"),
        icon: Some("mdi:harddisk"),
    },
    Entity {
        key: "power_status",
        component: Component::BinarySensor,
        label: "Under Voltage",
        device_class: Some("problem"),
        unit: None,
        icon: None,
    },
    Entity {
        key: "last_boot",
        component: Component::Sensor,
        label: "Last Boot",
        device_class: Some("timestamp"),
        unit: None,
        icon: Some("mdi:clock"),
    },
];

/// Entity names used by earlier releases, `homeassistant/<component>/<Display>/<Display><suffix>/config`
const LEGACY_ENTITIES: [(Component, &str); 8] = [
    (Component::Sensor, "Temp"),
    (Component::Sensor, "DiskUse"),
    (Component::Sensor, "MemoryUse"),
    (Component::Sensor, "CpuUsage"),
    (Component::Sensor, "SwapUsage"),
    (Component::BinarySensor, "PowerStatus"),
    (Component::Sensor, "PowerStatus"),
    (Component::Sensor, "LastBoot"),
];

/// Every topic the agent touches for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub state: String,
    pub availability: String,
    pub hass_status: String,
    device: String,
    display: String,
}

impl Topics {
    pub fn new(device: &DeviceIdentity) -> Self {
        Self {
            state: format!("{STATE_PREFIX}/{}/state", device.topic_name),
            availability: format!("{STATE_PREFIX}/{}/availability", device.topic_name),
            hass_status: HASS_STATUS_TOPIC.to_string(),
            device: device.topic_name.clone(),
            display: device.display_name.clone(),
        }
    }

    pub fn discovery(&self, entity: &Entity) -> String {
        format!(
            "{DISCOVERY_PREFIX}/{}/{}/{}/config",
            entity.component.as_str(),
            self.device,
            entity.key
        )
    }

    pub fn legacy_discovery(&self) -> Vec<String> {
        LEGACY_ENTITIES
            .iter()
            .map(|(component, suffix)| {
                format!(
                    "{DISCOVERY_PREFIX}/{}/{}/{}{}/config",
                    component.as_str(),
                    self.display,
                    self.display,
                    suffix
                )
            })
            .collect()
    }
}

/// Discovery config payload for one entity
#[derive(Debug, Serialize)]
pub struct Descriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    pub name: String,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    pub value_template: String,
    pub unique_id: String,
    pub availability_topic: String,
    pub device: DeviceDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
}

/// Groups all entities under one device in Home Assistant
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
}

impl DeviceDescriptor {
    pub fn new(device: &DeviceIdentity) -> Self {
        Self {
            identifiers: vec![format!("{}_sensor", device.topic_name)],
            name: format!("{} Sensors", device.display_name),
            model: format!("RPI {}", device.display_name),
            manufacturer: "RPI".to_string(),
        }
    }
}

impl Descriptor {
    pub fn new(entity: &Entity, device: &DeviceIdentity, topics: &Topics) -> Self {
        Self {
            device_class: entity.device_class,
            name: format!("{} {}", device.display_name, entity.label),
            state_topic: topics.state.clone(),
            unit_of_measurement: entity.unit,
            value_template: format!("{{{{value_json.{}}}}}", entity.key),
            unique_id: format!("{}_sensor_{}", device.topic_name, entity.key),
            availability_topic: topics.availability.clone(),
            device: DeviceDescriptor::new(device),
            icon: entity.icon,
        }
    }
}

/// `(topic, payload)` for every entity, in publish order
pub fn announcements(device: &DeviceIdentity, topics: &Topics) -> Result<Vec<(String, String)>, serde_json::Error> {
    ENTITIES
        .iter()
        .map(|entity| {
            let payload = serde_json::to_string(&Descriptor::new(entity, device, topics))?;
            Ok((topics.discovery(entity), payload))
        })
        .collect()
}
