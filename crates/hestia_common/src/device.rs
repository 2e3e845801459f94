//! Device model: types, priority tiers, live state, and the central
//! action schema used to render the action reference block of every
//! planner prompt from a single source of truth.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// How important a device is. Critical devices are permanently protected:
/// no automated plan may ever power them off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Critical,
    High,
    Medium,
    Low,
    Optional,
}

impl PriorityTier {
    /// Numeric rank, higher means more important.
    pub fn rank(&self) -> u8 {
        match self {
            PriorityTier::Critical => 4,
            PriorityTier::High => 3,
            PriorityTier::Medium => 2,
            PriorityTier::Low => 1,
            PriorityTier::Optional => 0,
        }
    }

    /// True if `self` is at or below `cutoff` in importance.
    pub fn at_or_below(&self, cutoff: PriorityTier) -> bool {
        self.rank() <= cutoff.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::Critical => "critical",
            PriorityTier::High => "high",
            PriorityTier::Medium => "medium",
            PriorityTier::Low => "low",
            PriorityTier::Optional => "optional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Light,
    Thermostat,
    Lock,
    Battery,
    CoffeeMaker,
    Sensor,
    SmartPlug,
    WaterHeater,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Light => "light",
            DeviceType::Thermostat => "thermostat",
            DeviceType::Lock => "lock",
            DeviceType::Battery => "battery",
            DeviceType::CoffeeMaker => "coffee_maker",
            DeviceType::Sensor => "sensor",
            DeviceType::SmartPlug => "smart_plug",
            DeviceType::WaterHeater => "water_heater",
        }
    }
}

/// Current state of one device as seen through the device directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    pub id: String,
    pub device_type: DeviceType,
    pub display_name: String,
    pub room: String,
    #[serde(default = "default_online")]
    pub online: bool,
    #[serde(default)]
    pub power: bool,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub priority_tier: PriorityTier,
}

fn default_online() -> bool {
    true
}

/// One device's saved state inside a pre-mode snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub power: bool,
    pub properties: Map<String, Value>,
    pub device_type: DeviceType,
}

impl DeviceState {
    pub fn snapshot(&self) -> SnapshotEntry {
        SnapshotEntry {
            power: self.power,
            properties: self.properties.clone(),
            device_type: self.device_type,
        }
    }
}

/// Failure executing an action against a device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("device offline: {0}")]
    Offline(String),
    #[error("{device_type} does not support action '{action}'")]
    Unsupported { device_type: String, action: String },
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Action schema per device type: `(action, parameter hint)`. The empty
/// hint means the action takes no parameters. Sensors are read-only.
pub const ACTION_SCHEMA: &[(DeviceType, &[(&str, &str)])] = &[
    (
        DeviceType::Light,
        &[
            ("on", "\"brightness\": 0-100"),
            ("off", ""),
            ("dim", "\"brightness\": 0-100"),
            ("color", "\"r\": 0-255, \"g\": 0-255, \"b\": 0-255"),
        ],
    ),
    (
        DeviceType::Thermostat,
        &[
            ("set_temperature", "\"temperature\": 60-85"),
            ("set_mode", "\"mode\": \"heat|cool|auto|eco|off\""),
            ("eco_mode", ""),
        ],
    ),
    (DeviceType::SmartPlug, &[("on", ""), ("off", "")]),
    (DeviceType::Lock, &[("lock", ""), ("unlock", "")]),
    (
        DeviceType::CoffeeMaker,
        &[
            ("on", ""),
            ("brew", "\"strength\": \"light|medium|strong\""),
            ("keep_warm", ""),
            ("off", ""),
        ],
    ),
    (
        DeviceType::Battery,
        &[("set_mode", "\"mode\": \"charge|discharge|auto|backup\"")],
    ),
    (
        DeviceType::WaterHeater,
        &[
            ("heat", "\"temperature_f\": 100-160"),
            ("boost", ""),
            ("standby", ""),
            ("off", ""),
        ],
    ),
    (DeviceType::Sensor, &[]),
];

/// Actions supported by a device type.
pub fn supported_actions(device_type: DeviceType) -> &'static [(&'static str, &'static str)] {
    ACTION_SCHEMA
        .iter()
        .find(|(t, _)| *t == device_type)
        .map(|(_, actions)| *actions)
        .unwrap_or(&[])
}

/// Render the device action reference block for planner prompts.
pub fn action_reference_text() -> String {
    let mut lines = Vec::new();
    for (device_type, actions) in ACTION_SCHEMA {
        if actions.is_empty() {
            lines.push(format!("- {}: read-only, no actions", device_type.as_str()));
            continue;
        }
        let parts: Vec<String> = actions
            .iter()
            .map(|(action, hint)| {
                if hint.is_empty() {
                    format!("\"{action}\"")
                } else {
                    format!("\"{action}\" (params: {{{hint}}})")
                }
            })
            .collect();
        lines.push(format!("- {}: {}", device_type.as_str(), parts.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering() {
        assert!(PriorityTier::Low.at_or_below(PriorityTier::Medium));
        assert!(PriorityTier::Medium.at_or_below(PriorityTier::Medium));
        assert!(!PriorityTier::High.at_or_below(PriorityTier::Medium));
        assert!(!PriorityTier::Critical.at_or_below(PriorityTier::Low));
    }

    #[test]
    fn action_reference_covers_every_type() {
        let text = action_reference_text();
        for (device_type, _) in ACTION_SCHEMA {
            assert!(text.contains(device_type.as_str()), "missing {device_type:?}");
        }
        assert!(text.contains("sensor: read-only"));
    }

    #[test]
    fn sensors_have_no_actions() {
        assert!(supported_actions(DeviceType::Sensor).is_empty());
        assert!(!supported_actions(DeviceType::Light).is_empty());
    }
}
