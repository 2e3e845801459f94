//! Automation patterns: user-taught rules and statistically-detected
//! routines, persisted by the pattern store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Routine,
    Preference,
    Energy,
    /// Explicitly taught by the user in natural language.
    UserDefined,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Routine => "routine",
            PatternType::Preference => "preference",
            PatternType::Energy => "energy",
            PatternType::UserDefined => "user_defined",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    CalendarMode,
    Location,
    Time,
    Threat,
    /// Applies at all times; prohibitions with this kind become hard
    /// execution constraints.
    Global,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::CalendarMode => "calendar_mode",
            TriggerKind::Location => "location",
            TriggerKind::Time => "time",
            TriggerKind::Threat => "threat",
            TriggerKind::Global => "global",
        }
    }

    pub fn parse(s: &str) -> Option<TriggerKind> {
        match s {
            "calendar_mode" => Some(TriggerKind::CalendarMode),
            "location" => Some(TriggerKind::Location),
            "time" => Some(TriggerKind::Time),
            "threat" => Some(TriggerKind::Threat),
            "global" => Some(TriggerKind::Global),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub value: String,
}

impl Trigger {
    pub fn new(kind: TriggerKind, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

/// One step of a pattern's action sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAction {
    pub device_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub delay_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub action_sequence: Vec<PatternAction>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub approved: bool,
    /// The raw user message(s) that created this pattern; merges append
    /// with " | " so the teaching trail is preserved.
    #[serde(default)]
    pub source_utterance: String,
    pub created_at: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

impl Pattern {
    /// Whether this pattern has enough evidence to be suggested for
    /// automation. User-taught patterns bypass the threshold: the user
    /// already told us what they want.
    pub fn is_ready_to_suggest(&self) -> bool {
        if self.pattern_type == PatternType::UserDefined {
            return true;
        }
        self.frequency >= 3 && self.confidence >= 0.8
    }

    pub fn matches(&self, kind: TriggerKind, value: &str) -> bool {
        self.trigger.kind == kind && self.trigger.value == value
    }
}
