//! Device directory seam and the in-memory directory backing it.
//!
//! The orchestration core never talks to device hardware or simulators
//! directly; it only sees this trait. The in-memory implementation keeps
//! a realistic state table (brightness, thermostat setpoints, lock
//! state) so constraint and restore logic can be exercised end to end.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hestia_common::device::supported_actions;
use hestia_common::{DeviceError, DeviceState, DeviceType, PriorityTier};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::DeviceSeed;

/// Lookup and command surface over the home's devices.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn get(&self, device_id: &str) -> Option<DeviceState>;

    async fn all(&self) -> Vec<DeviceState>;

    /// Apply `action` to a device, mutating its state. Validation of the
    /// action name against the device type happens here; safety policy
    /// (critical devices, user constraints) is the executor's job.
    async fn execute(
        &self,
        device_id: &str,
        action: &str,
        parameters: &Map<String, Value>,
    ) -> Result<(), DeviceError>;

    /// Devices whose tier is at or below `cutoff` (candidates for load
    /// shedding).
    async fn all_by_priority_below(&self, cutoff: PriorityTier) -> Vec<DeviceState> {
        self.all()
            .await
            .into_iter()
            .filter(|d| d.priority_tier.at_or_below(cutoff))
            .collect()
    }

    /// Ids of devices in the critical tier.
    async fn critical_ids(&self) -> Vec<String> {
        self.all()
            .await
            .into_iter()
            .filter(|d| d.priority_tier == PriorityTier::Critical)
            .map(|d| d.id)
            .collect()
    }
}

/// In-memory directory seeded from config.
pub struct MemoryDirectory {
    devices: RwLock<HashMap<String, DeviceState>>,
}

impl MemoryDirectory {
    pub fn from_seeds(seeds: &[DeviceSeed]) -> Arc<Self> {
        let mut devices = HashMap::new();
        for seed in seeds {
            devices.insert(
                seed.id.clone(),
                DeviceState {
                    id: seed.id.clone(),
                    device_type: seed.device_type,
                    display_name: seed.display_name.clone(),
                    room: seed.room.clone(),
                    online: true,
                    power: seed.power,
                    properties: seed.properties.clone(),
                    priority_tier: seed.priority_tier,
                },
            );
        }
        Arc::new(Self {
            devices: RwLock::new(devices),
        })
    }

    /// Force a device offline (simulated fault injection for tests).
    pub async fn set_online(&self, device_id: &str, online: bool) {
        if let Some(device) = self.devices.write().await.get_mut(device_id) {
            device.online = online;
        }
    }
}

fn apply_action(
    device: &mut DeviceState,
    action: &str,
    parameters: &Map<String, Value>,
) -> Result<(), DeviceError> {
    match (device.device_type, action) {
        (DeviceType::Light, "on") => {
            device.power = true;
            if let Some(b) = parameters.get("brightness") {
                device.properties.insert("brightness".into(), b.clone());
            }
        }
        (DeviceType::Light, "off") => device.power = false,
        (DeviceType::Light, "dim") => {
            let b = parameters
                .get("brightness")
                .ok_or_else(|| DeviceError::InvalidParameters("dim requires brightness".into()))?;
            device.power = true;
            device.properties.insert("brightness".into(), b.clone());
        }
        (DeviceType::Light, "color") => {
            for channel in ["r", "g", "b"] {
                if let Some(v) = parameters.get(channel) {
                    device.properties.insert(channel.into(), v.clone());
                }
            }
        }
        (DeviceType::Thermostat, "set_temperature") => {
            let t = parameters.get("temperature").and_then(Value::as_f64).ok_or_else(|| {
                DeviceError::InvalidParameters("set_temperature requires temperature".into())
            })?;
            if !(60.0..=85.0).contains(&t) {
                return Err(DeviceError::InvalidParameters(format!(
                    "temperature {t} out of range 60-85"
                )));
            }
            device.properties.insert("target_temperature".into(), Value::from(t));
        }
        (DeviceType::Thermostat, "set_mode") => {
            let mode = parameters.get("mode").and_then(Value::as_str).ok_or_else(|| {
                DeviceError::InvalidParameters("set_mode requires mode".into())
            })?;
            device.power = mode != "off";
            device.properties.insert("mode".into(), Value::from(mode));
        }
        (DeviceType::Thermostat, "eco_mode") => {
            device.power = true;
            device.properties.insert("mode".into(), Value::from("eco"));
        }
        (DeviceType::SmartPlug, "on") => device.power = true,
        (DeviceType::SmartPlug, "off") => device.power = false,
        (DeviceType::Lock, "lock") => {
            device.properties.insert("locked".into(), Value::from(true));
        }
        (DeviceType::Lock, "unlock") => {
            device.properties.insert("locked".into(), Value::from(false));
        }
        (DeviceType::CoffeeMaker, "on") => device.power = true,
        (DeviceType::CoffeeMaker, "off") => device.power = false,
        (DeviceType::CoffeeMaker, "brew") => {
            device.power = true;
            let strength = parameters
                .get("strength")
                .cloned()
                .unwrap_or_else(|| Value::from("medium"));
            device.properties.insert("brewing".into(), Value::from(true));
            device.properties.insert("strength".into(), strength);
        }
        (DeviceType::CoffeeMaker, "keep_warm") => {
            device.properties.insert("keep_warm".into(), Value::from(true));
        }
        (DeviceType::Battery, "set_mode") => {
            let mode = parameters.get("mode").and_then(Value::as_str).ok_or_else(|| {
                DeviceError::InvalidParameters("set_mode requires mode".into())
            })?;
            device.properties.insert("mode".into(), Value::from(mode));
        }
        (DeviceType::WaterHeater, "heat") => {
            device.power = true;
            if let Some(t) = parameters.get("temperature_f") {
                device.properties.insert("temperature_f".into(), t.clone());
            }
        }
        (DeviceType::WaterHeater, "boost") => {
            device.power = true;
            device.properties.insert("temperature_f".into(), Value::from(140));
        }
        (DeviceType::WaterHeater, "standby") => device.power = false,
        (DeviceType::WaterHeater, "off") => device.power = false,
        _ => {
            return Err(DeviceError::Unsupported {
                device_type: device.device_type.as_str().to_string(),
                action: action.to_string(),
            })
        }
    }
    Ok(())
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.devices.read().await.get(device_id).cloned()
    }

    async fn all(&self) -> Vec<DeviceState> {
        let mut all: Vec<DeviceState> = self.devices.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    async fn execute(
        &self,
        device_id: &str,
        action: &str,
        parameters: &Map<String, Value>,
    ) -> Result<(), DeviceError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| DeviceError::NotFound(device_id.to_string()))?;
        if !device.online {
            return Err(DeviceError::Offline(device_id.to_string()));
        }
        if !supported_actions(device.device_type)
            .iter()
            .any(|(name, _)| *name == action)
        {
            return Err(DeviceError::Unsupported {
                device_type: device.device_type.as_str().to_string(),
                action: action.to_string(),
            });
        }
        apply_action(device, action, parameters)?;
        debug!("{device_id}.{action} applied");
        Ok(())
    }
}

/// Text inventory of every device, grouped by room, for planner prompts.
pub async fn inventory_text(directory: &dyn DeviceDirectory) -> String {
    let mut by_room: HashMap<String, Vec<DeviceState>> = HashMap::new();
    for device in directory.all().await {
        by_room.entry(device.room.clone()).or_default().push(device);
    }
    let mut rooms: Vec<&String> = by_room.keys().collect();
    rooms.sort();

    let mut lines = Vec::new();
    for room in rooms {
        lines.push(format!("[{room}]"));
        for device in &by_room[room] {
            let props = if device.properties.is_empty() {
                "none".to_string()
            } else {
                device
                    .properties
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            lines.push(format!(
                "  {} ({}) | type={} | power={} | online={} | priority={} | state: {}",
                device.id,
                device.display_name,
                device.device_type.as_str(),
                if device.power { "ON" } else { "OFF" },
                if device.online { "yes" } else { "no" },
                device.priority_tier.as_str(),
                props,
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_devices;
    use serde_json::json;

    fn directory() -> Arc<MemoryDirectory> {
        MemoryDirectory::from_seeds(&default_devices())
    }

    #[tokio::test]
    async fn light_on_applies_brightness() {
        let dir = directory();
        let mut params = Map::new();
        params.insert("brightness".into(), json!(45));
        dir.execute("light_office_main", "on", &params).await.unwrap();

        let light = dir.get("light_office_main").await.unwrap();
        assert!(light.power);
        assert_eq!(light.properties["brightness"], json!(45));
    }

    #[tokio::test]
    async fn thermostat_rejects_out_of_range_temperature() {
        let dir = directory();
        let mut params = Map::new();
        params.insert("temperature".into(), json!(95));
        let err = dir
            .execute("therm_living", "set_temperature", &params)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn sensors_reject_all_actions() {
        let dir = directory();
        let err = dir
            .execute("sensor_living_motion", "off", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn offline_device_reports_offline() {
        let dir = directory();
        dir.set_online("plug_living_tv", false).await;
        let err = dir.execute("plug_living_tv", "off", &Map::new()).await.unwrap_err();
        assert!(matches!(err, DeviceError::Offline(_)));
    }

    #[tokio::test]
    async fn unknown_device_reports_not_found() {
        let dir = directory();
        let err = dir.execute("light_garage", "on", &Map::new()).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
    }

    #[tokio::test]
    async fn priority_filter_excludes_higher_tiers() {
        let dir = directory();
        let sheddable = dir.all_by_priority_below(PriorityTier::Low).await;
        assert!(sheddable.iter().all(|d| d.priority_tier == PriorityTier::Low
            || d.priority_tier == PriorityTier::Optional));
        assert!(!sheddable.iter().any(|d| d.id == "plug_kitchen_fridge"));
    }

    #[tokio::test]
    async fn inventory_mentions_every_device() {
        let dir = directory();
        let text = inventory_text(dir.as_ref()).await;
        for device in dir.all().await {
            assert!(text.contains(&device.id), "inventory missing {}", device.id);
        }
        assert!(text.contains("[kitchen]"));
        assert!(text.contains("priority=critical"));
    }
}
