//! Execution constraints: the hard rules screened before any device
//! action runs.
//!
//! Two sources feed the constraint set. Devices in the critical priority
//! tier may never be powered off, period. And user-taught global
//! patterns whose wording is prohibitive ("never turn off the fridge")
//! block the named device/action pairs. The set is derived fresh from
//! current device and pattern state before each plan executes, so a
//! newly taught rule binds immediately.

use std::collections::{HashMap, HashSet};
use std::fmt;

use hestia_common::{Action, DeviceState, Pattern, PatternType, PriorityTier, TriggerKind};
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches prohibitive phrasing in a taught rule. Word boundaries keep
/// "whenever" from matching "never".
static PROHIBITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(never|don'?t|do not|prohibit|block|prevent|forbid)\b")
        .expect("prohibition regex is valid")
});

/// The critical-device protection blocks exactly one action: powering
/// the device off. Everything else on a critical device stays allowed.
pub fn is_power_off(action: &str) -> bool {
    action == "off"
}

pub fn is_prohibition_text(text: &str) -> bool {
    PROHIBITION_RE.is_match(text)
}

/// Whether a pattern reads as a prohibition rather than an automation.
pub fn is_prohibition(pattern: &Pattern) -> bool {
    is_prohibition_text(&pattern.source_utterance) || is_prohibition_text(&pattern.description)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    CriticalDevice,
    UserConstraint,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::CriticalDevice => write!(f, "BLOCKED (critical device)"),
            BlockReason::UserConstraint => write!(f, "BLOCKED (user constraint)"),
        }
    }
}

/// The screened rule set for one execution round.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    /// Device ids that may never be disabled (critical tier).
    protected: HashSet<String>,
    /// Device id to the set of actions a user constraint blocks on it.
    pattern_blocked: HashMap<String, HashSet<String>>,
    /// Human-readable rule texts, for planner prompts.
    descriptions: Vec<String>,
}

impl ConstraintSet {
    /// Build from current device states and the approved pattern list.
    pub fn derive(devices: &[DeviceState], patterns: &[Pattern]) -> Self {
        let mut set = ConstraintSet::default();

        for device in devices {
            if device.priority_tier == PriorityTier::Critical {
                set.protected.insert(device.id.clone());
            }
        }

        for pattern in patterns {
            if pattern.pattern_type != PatternType::UserDefined
                || pattern.trigger.kind != TriggerKind::Global
                || !pattern.approved
            {
                continue;
            }
            // Only prohibitions block; positive global rules are prompt
            // context for the planner and nothing more.
            if is_prohibition(pattern) {
                for step in &pattern.action_sequence {
                    set.pattern_blocked
                        .entry(step.device_id.clone())
                        .or_default()
                        .insert(step.action.clone());
                }
            }
            let text = if pattern.description.is_empty() {
                pattern.source_utterance.clone()
            } else {
                pattern.description.clone()
            };
            if !text.is_empty() {
                set.descriptions.push(text);
            }
        }

        set
    }

    /// Check one action. `None` means the action may run.
    pub fn is_blocked(&self, action: &Action) -> Option<BlockReason> {
        if is_power_off(&action.action) && self.protected.contains(&action.device_id) {
            return Some(BlockReason::CriticalDevice);
        }
        if let Some(blocked) = self.pattern_blocked.get(&action.device_id) {
            if blocked.contains(&action.action) {
                return Some(BlockReason::UserConstraint);
            }
        }
        None
    }

    pub fn descriptions(&self) -> &[String] {
        &self.descriptions
    }
}
