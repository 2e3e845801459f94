//! Rule-based fallback plans.
//!
//! Every planner-driven flow has a deterministic counterpart here so the
//! home stays protected when the model is unreachable. Fallbacks are
//! intentionally conservative: shed low-priority load, secure the house,
//! hold comfort setpoints. They still run through the executor, so the
//! constraint screen applies to them as well.

use hestia_common::{Action, DeviceState, DeviceType, PriorityTier, ThreatKind};

use crate::config::{LoadShedConfig, LocationConfig};

/// Power-down actions for every sheddable device at or below `cutoff`.
/// Locks and batteries are never shed; thermostats drop to eco instead
/// of off.
pub fn shed_actions(devices: &[DeviceState], cutoff: PriorityTier) -> Vec<Action> {
    let mut actions = Vec::new();
    for d in devices {
        if !d.priority_tier.at_or_below(cutoff) {
            continue;
        }
        match d.device_type {
            DeviceType::Light | DeviceType::SmartPlug | DeviceType::CoffeeMaker => {
                if d.power {
                    actions.push(Action::new(&d.id, "off"));
                }
            }
            DeviceType::WaterHeater => {
                if d.power {
                    actions.push(Action::new(&d.id, "standby"));
                }
            }
            DeviceType::Thermostat => {
                actions.push(Action::new(&d.id, "eco_mode"));
            }
            DeviceType::Lock | DeviceType::Battery | DeviceType::Sensor => {}
        }
    }
    actions
}

/// Deterministic response to a threat kind.
pub fn threat_actions(
    kind: ThreatKind,
    devices: &[DeviceState],
    load_shed: &LoadShedConfig,
) -> Vec<Action> {
    let mut actions = Vec::new();
    match kind {
        ThreatKind::HeatWave => {
            // Pre-cool while the grid is still healthy, bank energy.
            for d in devices {
                match d.device_type {
                    DeviceType::Thermostat => {
                        actions.push(
                            Action::new(&d.id, "set_temperature").with_param("temperature", 68),
                        );
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "cool"));
                    }
                    DeviceType::Battery => {
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "charge"))
                    }
                    _ => {}
                }
            }
            actions.extend(shed_actions(devices, load_shed.default_cutoff));
        }
        ThreatKind::GridStrain => {
            for d in devices {
                match d.device_type {
                    DeviceType::Thermostat => actions.push(Action::new(&d.id, "eco_mode")),
                    DeviceType::Battery => {
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "backup"))
                    }
                    _ => {}
                }
            }
            actions.extend(shed_actions(devices, load_shed.grid_strain_cutoff));
        }
        ThreatKind::Storm | ThreatKind::PowerOutage => {
            for d in devices {
                match d.device_type {
                    DeviceType::Lock => actions.push(Action::new(&d.id, "lock")),
                    DeviceType::Battery => {
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "backup"))
                    }
                    _ => {}
                }
            }
            actions.extend(shed_actions(devices, load_shed.default_cutoff));
        }
        ThreatKind::ColdSnap => {
            for d in devices {
                match d.device_type {
                    DeviceType::Thermostat => {
                        actions.push(
                            Action::new(&d.id, "set_temperature").with_param("temperature", 72),
                        );
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "heat"));
                    }
                    DeviceType::Battery => {
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "charge"))
                    }
                    _ => {}
                }
            }
        }
        ThreatKind::None => {}
    }
    actions
}

/// Deterministic response to a location change. Labels outside the
/// configured home/away sets get no blanket behavior.
pub fn location_actions(
    location: &str,
    devices: &[DeviceState],
    load_shed: &LoadShedConfig,
    locations: &LocationConfig,
) -> Vec<Action> {
    let mut actions = Vec::new();
    if locations.home.iter().any(|l| l == location) {
        for d in devices {
            match d.device_type {
                DeviceType::Lock => actions.push(Action::new(&d.id, "unlock")),
                DeviceType::Light if d.room == "living_room" || d.room == "kitchen" => {
                    actions.push(Action::new(&d.id, "on").with_param("brightness", 80))
                }
                DeviceType::Thermostat => {
                    actions.push(
                        Action::new(&d.id, "set_temperature").with_param("temperature", 72),
                    );
                    actions.push(Action::new(&d.id, "set_mode").with_param("mode", "auto"));
                }
                _ => {}
            }
        }
    } else if locations.away.iter().any(|l| l == location) {
        for d in devices {
            match d.device_type {
                DeviceType::Lock => actions.push(Action::new(&d.id, "lock")),
                DeviceType::Thermostat => actions.push(Action::new(&d.id, "eco_mode")),
                _ => {}
            }
        }
        actions.extend(shed_actions(devices, load_shed.default_cutoff));
    }
    actions
}
