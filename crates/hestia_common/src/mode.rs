//! Home modes. Exactly one mode is current at any time; the mode state
//! machine in the daemon owns transitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeMode {
    #[default]
    Normal,
    Active,
    PreparingForMeeting,
    Focus,
    DoNotDisturb,
    Sleep,
}

impl HomeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HomeMode::Normal => "normal",
            HomeMode::Active => "active",
            HomeMode::PreparingForMeeting => "preparing_for_meeting",
            HomeMode::Focus => "focus",
            HomeMode::DoNotDisturb => "do_not_disturb",
            HomeMode::Sleep => "sleep",
        }
    }

    pub fn parse(s: &str) -> Option<HomeMode> {
        match s {
            "normal" => Some(HomeMode::Normal),
            "active" => Some(HomeMode::Active),
            "preparing_for_meeting" => Some(HomeMode::PreparingForMeeting),
            "focus" => Some(HomeMode::Focus),
            "do_not_disturb" => Some(HomeMode::DoNotDisturb),
            "sleep" => Some(HomeMode::Sleep),
            _ => None,
        }
    }

    /// Modes during which the escalation component suppresses
    /// non-critical audio.
    pub fn is_quiet(&self) -> bool {
        matches!(self, HomeMode::DoNotDisturb | HomeMode::Focus)
    }
}
