//! Threat assessment model. Assessments are produced by an external
//! monitor; the orchestrator only consumes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::None => "none",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    HeatWave,
    GridStrain,
    PowerOutage,
    Storm,
    ColdSnap,
    None,
}

impl ThreatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::HeatWave => "heat_wave",
            ThreatKind::GridStrain => "grid_strain",
            ThreatKind::PowerOutage => "power_outage",
            ThreatKind::Storm => "storm",
            ThreatKind::ColdSnap => "cold_snap",
            ThreatKind::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
    pub kind: ThreatKind,
    #[serde(default)]
    pub urgency: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ThreatAssessment {
    pub fn none() -> Self {
        Self {
            level: ThreatLevel::None,
            kind: ThreatKind::None,
            urgency: 0.0,
            summary: String::new(),
            reasoning: String::new(),
            recommended_actions: vec![],
            timestamp: Utc::now(),
        }
    }

    /// High and critical threats need user approval before any device
    /// action is taken.
    pub fn requires_permission(&self) -> bool {
        matches!(self.level, ThreatLevel::High | ThreatLevel::Critical)
    }

    /// De-duplication key: the same kind at the same level is the same
    /// incident as far as re-handling is concerned.
    pub fn dedup_key(&self) -> String {
        format!("{}_{}", self.kind.as_str(), self.level.as_str())
    }
}
