//! Home mode machine.
//!
//! Tracks the current mode and computes the device actions a transition
//! implies. Leaving Normal captures a snapshot of every device; coming
//! back to Normal replays it, so a sleep or focus session never loses
//! the resident's manual setup. The machine only computes actions; they
//! run through the plan executor like any other plan, so constraint
//! screening applies to mode changes too.

use std::collections::HashMap;

use hestia_common::{Action, DeviceState, DeviceType, HomeMode, SnapshotEntry};
use serde_json::Value;
use tracing::info;

/// Result of a mode change: what to run and what happened to the
/// snapshot.
#[derive(Debug)]
pub struct ModeTransition {
    pub from: HomeMode,
    pub to: HomeMode,
    pub actions: Vec<Action>,
    pub snapshot_taken: bool,
    pub restored: bool,
}

#[derive(Default)]
pub struct ModeMachine {
    current: HomeMode,
    snapshot: Option<HashMap<String, SnapshotEntry>>,
}

impl ModeMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> HomeMode {
        self.current
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Apply a mode change. Returns `None` when `to` equals the current
    /// mode. The returned actions are the rule-based defaults for the
    /// target mode (or the snapshot replay for Normal); a planner may
    /// refine them upstream, but these always work.
    pub fn transition(&mut self, to: HomeMode, devices: &[DeviceState]) -> Option<ModeTransition> {
        if to == self.current {
            return None;
        }
        let from = self.current;

        let mut snapshot_taken = false;
        if from == HomeMode::Normal && self.snapshot.is_none() {
            self.snapshot = Some(
                devices
                    .iter()
                    .map(|d| (d.id.clone(), d.snapshot()))
                    .collect(),
            );
            snapshot_taken = true;
        }

        let (actions, restored) = if to == HomeMode::Normal {
            match self.snapshot.take() {
                Some(snapshot) => (restore_actions(&snapshot, devices), true),
                // No snapshot to replay (e.g. after a restart mid-mode);
                // settle on comfort defaults instead.
                None => (mode_default_actions(HomeMode::Normal, devices), false),
            }
        } else {
            (mode_default_actions(to, devices), false)
        };

        self.current = to;
        info!("Home mode: {} -> {}", from.as_str(), to.as_str());

        Some(ModeTransition {
            from,
            to,
            actions,
            snapshot_taken,
            restored,
        })
    }
}

/// Actions that bring devices back to their snapshotted state. Only
/// devices that drifted from the snapshot get an action.
pub fn restore_actions(
    snapshot: &HashMap<String, SnapshotEntry>,
    devices: &[DeviceState],
) -> Vec<Action> {
    let mut actions = Vec::new();
    for device in devices {
        let Some(saved) = snapshot.get(&device.id) else {
            continue;
        };
        match device.device_type {
            DeviceType::Light => {
                if saved.power && !device.power {
                    let mut action = Action::new(&device.id, "on");
                    if let Some(b) = saved.properties.get("brightness") {
                        action = action.with_param("brightness", b.clone());
                    }
                    actions.push(action);
                } else if !saved.power && device.power {
                    actions.push(Action::new(&device.id, "off"));
                }
            }
            DeviceType::Thermostat => {
                let saved_t = saved.properties.get("target_temperature");
                if saved_t.is_some() && saved_t != device.properties.get("target_temperature") {
                    actions.push(
                        Action::new(&device.id, "set_temperature")
                            .with_param("temperature", saved_t.cloned().unwrap_or(Value::Null)),
                    );
                }
                let saved_mode = saved.properties.get("mode");
                if saved_mode.is_some() && saved_mode != device.properties.get("mode") {
                    actions.push(
                        Action::new(&device.id, "set_mode")
                            .with_param("mode", saved_mode.cloned().unwrap_or(Value::Null)),
                    );
                }
            }
            DeviceType::SmartPlug | DeviceType::CoffeeMaker => {
                if saved.power != device.power {
                    actions.push(Action::new(&device.id, if saved.power { "on" } else { "off" }));
                }
            }
            DeviceType::Lock => {
                let saved_locked = saved.properties.get("locked").and_then(Value::as_bool);
                let now_locked = device.properties.get("locked").and_then(Value::as_bool);
                if let Some(locked) = saved_locked {
                    if Some(locked) != now_locked {
                        actions.push(Action::new(&device.id, if locked { "lock" } else { "unlock" }));
                    }
                }
            }
            DeviceType::WaterHeater => {
                if saved.power && !device.power {
                    let mut action = Action::new(&device.id, "heat");
                    if let Some(t) = saved.properties.get("temperature_f") {
                        action = action.with_param("temperature_f", t.clone());
                    }
                    actions.push(action);
                } else if !saved.power && device.power {
                    actions.push(Action::new(&device.id, "standby"));
                }
            }
            // Battery mode is energy policy, not comfort; leave it.
            DeviceType::Battery | DeviceType::Sensor => {}
        }
    }
    actions
}

/// Rule-based defaults for entering a mode. These are the fallback when
/// no planner refinement is available, and they are always safe.
pub fn mode_default_actions(mode: HomeMode, devices: &[DeviceState]) -> Vec<Action> {
    let mut actions = Vec::new();
    match mode {
        // Comfort defaults, used when there is no snapshot to restore.
        HomeMode::Normal => {
            for d in devices {
                if d.device_type == DeviceType::Thermostat {
                    actions.push(
                        Action::new(&d.id, "set_temperature").with_param("temperature", 72),
                    );
                    actions.push(Action::new(&d.id, "set_mode").with_param("mode", "auto"));
                }
            }
        }
        HomeMode::Active => {
            for d in devices {
                match d.device_type {
                    DeviceType::Light if d.room == "living_room" => {
                        actions.push(Action::new(&d.id, "on").with_param("brightness", 90))
                    }
                    DeviceType::Thermostat => {
                        actions.push(
                            Action::new(&d.id, "set_temperature").with_param("temperature", 70),
                        );
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "auto"));
                    }
                    _ => {}
                }
            }
        }
        HomeMode::PreparingForMeeting => {
            for d in devices {
                match d.device_type {
                    DeviceType::Light if d.room == "office" => {
                        actions.push(Action::new(&d.id, "on").with_param("brightness", 80))
                    }
                    DeviceType::Light if d.power => {
                        actions.push(Action::new(&d.id, "dim").with_param("brightness", 30))
                    }
                    DeviceType::Lock => actions.push(Action::new(&d.id, "lock")),
                    _ => {}
                }
            }
        }
        // Focus and do-not-disturb share one profile: the office is left
        // alone, the rest of the house goes quiet.
        HomeMode::Focus | HomeMode::DoNotDisturb => {
            for d in devices {
                match d.device_type {
                    DeviceType::Light if d.room != "office" && d.power => {
                        actions.push(Action::new(&d.id, "off"))
                    }
                    DeviceType::Thermostat if d.room != "office" => {
                        actions.push(Action::new(&d.id, "eco_mode"))
                    }
                    DeviceType::Lock => actions.push(Action::new(&d.id, "lock")),
                    DeviceType::CoffeeMaker if d.power => actions.push(Action::new(&d.id, "off")),
                    _ => {}
                }
            }
        }
        HomeMode::Sleep => {
            for d in devices {
                match d.device_type {
                    DeviceType::Light if d.power => actions.push(Action::new(&d.id, "off")),
                    DeviceType::Lock => actions.push(Action::new(&d.id, "lock")),
                    DeviceType::Thermostat => {
                        actions.push(
                            Action::new(&d.id, "set_temperature").with_param("temperature", 68),
                        );
                        actions.push(Action::new(&d.id, "set_mode").with_param("mode", "auto"));
                    }
                    DeviceType::CoffeeMaker if d.power => actions.push(Action::new(&d.id, "off")),
                    _ => {}
                }
            }
        }
    }
    actions
}
