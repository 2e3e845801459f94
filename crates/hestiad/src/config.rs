//! Configuration for hestiad.
//!
//! Loads settings from /etc/hestia/config.toml or uses defaults. The
//! device list seeds the in-memory directory; the load-shed cutoffs make
//! explicit which priority tiers each flow may power off.

use anyhow::{Context, Result};
use hestia_common::{DeviceType, PriorityTier};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/hestia/config.toml";

/// Planner (LLM) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature for planning calls. Kept low so plans stay
    /// close to deterministic.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_planner_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_planner_timeout() -> u64 {
    30
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_planner_timeout(),
        }
    }
}

/// Which priority tiers each flow is allowed to power off. Devices at or
/// below the cutoff tier are sheddable; everything above it is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadShedConfig {
    /// Cutoff for location/threat shedding in general.
    #[serde(default = "default_shed_cutoff")]
    pub default_cutoff: PriorityTier,

    /// Grid strain sheds more aggressively, reaching into medium tier.
    #[serde(default = "default_grid_strain_cutoff")]
    pub grid_strain_cutoff: PriorityTier,
}

fn default_shed_cutoff() -> PriorityTier {
    PriorityTier::Low
}

fn default_grid_strain_cutoff() -> PriorityTier {
    PriorityTier::Medium
}

impl Default for LoadShedConfig {
    fn default() -> Self {
        Self {
            default_cutoff: default_shed_cutoff(),
            grid_strain_cutoff: default_grid_strain_cutoff(),
        }
    }
}

/// Location labels the presence feed may report. Labels here drive the
/// rule-based location fallbacks; anything else is planner-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_home_labels")]
    pub home: Vec<String>,

    #[serde(default = "default_away_labels")]
    pub away: Vec<String>,
}

fn default_home_labels() -> Vec<String> {
    vec!["home".to_string()]
}

fn default_away_labels() -> Vec<String> {
    vec!["away".to_string(), "leaving".to_string()]
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            home: default_home_labels(),
            away: default_away_labels(),
        }
    }
}

/// One seeded device for the in-memory directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSeed {
    pub id: String,
    pub device_type: DeviceType,
    pub display_name: String,
    pub room: String,
    #[serde(default = "default_tier")]
    pub priority_tier: PriorityTier,
    #[serde(default)]
    pub power: bool,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

fn default_tier() -> PriorityTier {
    PriorityTier::Medium
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HestiaConfig {
    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub load_shed: LoadShedConfig,

    #[serde(default)]
    pub locations: LocationConfig,

    /// Monitoring cycle interval in seconds.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// How long a permission request may stay pending.
    #[serde(default = "default_permission_timeout")]
    pub permission_timeout_secs: u64,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceSeed>,
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_permission_timeout() -> u64 {
    60
}

fn default_database_path() -> String {
    "/var/lib/hestia/patterns.db".to_string()
}

impl Default for HestiaConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            load_shed: LoadShedConfig::default(),
            locations: LocationConfig::default(),
            monitor_interval_secs: default_monitor_interval(),
            permission_timeout_secs: default_permission_timeout(),
            database_path: default_database_path(),
            devices: default_devices(),
        }
    }
}

impl HestiaConfig {
    /// Load configuration from the default path, falling back to
    /// built-in defaults when the file is missing or malformed.
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Could not load config from {}: {e:#}. Using defaults.", path.display());
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: HestiaConfig =
            toml::from_str(&content).context("failed to parse config")?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

fn seed(
    id: &str,
    device_type: DeviceType,
    display_name: &str,
    room: &str,
    priority_tier: PriorityTier,
    power: bool,
    properties: &[(&str, Value)],
) -> DeviceSeed {
    let mut props = Map::new();
    for (k, v) in properties {
        props.insert(k.to_string(), v.clone());
    }
    DeviceSeed {
        id: id.to_string(),
        device_type,
        display_name: display_name.to_string(),
        room: room.to_string(),
        priority_tier,
        power,
        properties: props,
    }
}

/// The default simulated home.
pub fn default_devices() -> Vec<DeviceSeed> {
    use serde_json::json;

    vec![
        seed(
            "light_living_main",
            DeviceType::Light,
            "Living Room Light",
            "living_room",
            PriorityTier::Medium,
            true,
            &[("brightness", json!(80))],
        ),
        seed(
            "light_bedroom_main",
            DeviceType::Light,
            "Bedroom Light",
            "bedroom",
            PriorityTier::Low,
            false,
            &[("brightness", json!(60))],
        ),
        seed(
            "light_office_main",
            DeviceType::Light,
            "Office Light",
            "office",
            PriorityTier::Medium,
            false,
            &[("brightness", json!(50))],
        ),
        seed(
            "light_kitchen_main",
            DeviceType::Light,
            "Kitchen Light",
            "kitchen",
            PriorityTier::Medium,
            true,
            &[("brightness", json!(80))],
        ),
        seed(
            "therm_living",
            DeviceType::Thermostat,
            "Main Thermostat",
            "living_room",
            PriorityTier::High,
            true,
            &[("target_temperature", json!(72)), ("mode", json!("auto"))],
        ),
        seed(
            "therm_office",
            DeviceType::Thermostat,
            "Office Thermostat",
            "office",
            PriorityTier::High,
            true,
            &[("target_temperature", json!(72)), ("mode", json!("auto"))],
        ),
        seed(
            "lock_front_door",
            DeviceType::Lock,
            "Front Door Lock",
            "front_door",
            PriorityTier::High,
            true,
            &[("locked", json!(true))],
        ),
        seed(
            "plug_kitchen_fridge",
            DeviceType::SmartPlug,
            "Fridge Plug",
            "kitchen",
            PriorityTier::Critical,
            true,
            &[],
        ),
        seed(
            "plug_living_tv",
            DeviceType::SmartPlug,
            "TV Plug",
            "living_room",
            PriorityTier::Low,
            true,
            &[],
        ),
        seed(
            "coffee_maker_kitchen",
            DeviceType::CoffeeMaker,
            "Coffee Maker",
            "kitchen",
            PriorityTier::Optional,
            false,
            &[],
        ),
        seed(
            "battery_main",
            DeviceType::Battery,
            "Home Battery",
            "energy_system",
            PriorityTier::Critical,
            true,
            &[("mode", json!("auto")), ("charge_pct", json!(80))],
        ),
        seed(
            "water_heater_main",
            DeviceType::WaterHeater,
            "Water Heater",
            "energy_system",
            PriorityTier::High,
            true,
            &[("temperature_f", json!(120))],
        ),
        seed(
            "sensor_living_motion",
            DeviceType::Sensor,
            "Living Room Motion",
            "living_room",
            PriorityTier::Optional,
            true,
            &[("motion", json!(false))],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = HestiaConfig::default();
        assert_eq!(config.monitor_interval_secs, 10);
        assert_eq!(config.permission_timeout_secs, 60);
        assert_eq!(config.load_shed.default_cutoff, PriorityTier::Low);
        assert_eq!(config.load_shed.grid_strain_cutoff, PriorityTier::Medium);
        assert!(config.locations.away.contains(&"leaving".to_string()));
        assert!(config.devices.iter().any(|d| d.id == "plug_kitchen_fridge"
            && d.priority_tier == PriorityTier::Critical));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: HestiaConfig = toml::from_str(
            r#"
            monitor_interval_secs = 5

            [planner]
            model = "llama3.1:8b"
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor_interval_secs, 5);
        assert_eq!(config.planner.model, "llama3.1:8b");
        assert_eq!(config.permission_timeout_secs, 60);
        assert!(!config.devices.is_empty());
    }
}
