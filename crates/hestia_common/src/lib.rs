//! Shared data model for the Hestia smart-home orchestrator.
//!
//! Plain serde types used by both the daemon and its tests: devices,
//! action plans, automation patterns, threat assessments, home modes,
//! and the decision ring.

pub mod device;
pub mod events;
pub mod mode;
pub mod pattern;
pub mod plan;
pub mod threat;

pub use device::{DeviceError, DeviceState, DeviceType, PriorityTier, SnapshotEntry};
pub use events::{DecisionLog, DecisionRecord};
pub use mode::HomeMode;
pub use pattern::{Pattern, PatternAction, PatternType, Trigger, TriggerKind};
pub use plan::{Action, ActionPlan, ExecutionOutcome};
pub use threat::{ThreatAssessment, ThreatKind, ThreatLevel};
