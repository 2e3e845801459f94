//! Action plans: what a planner proposes and what the executor reports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single device command. Ephemeral: built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub device_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Action {
    pub fn new(device_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            action: action.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Short description used in executed/failed lists and logs,
    /// e.g. `light_living_main.on({"brightness":80})`.
    pub fn describe(&self) -> String {
        if self.parameters.is_empty() {
            format!("{}.{}", self.device_id, self.action)
        } else {
            format!(
                "{}.{}({})",
                self.device_id,
                self.action,
                Value::Object(self.parameters.clone())
            )
        }
    }
}

/// A plan produced by the planner (or a fallback rule table) for one
/// trigger. Consumed exactly once by the plan executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub voice_message: Option<String>,
    #[serde(default)]
    pub requires_permission: bool,
}

impl ActionPlan {
    pub fn from_actions(reasoning: &str, actions: Vec<Action>) -> Self {
        Self {
            reasoning: reasoning.to_string(),
            actions,
            voice_message: None,
            requires_permission: false,
        }
    }
}

/// Per-action results of running a plan through the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub executed: Vec<String>,
    pub failed: Vec<String>,
}

impl ExecutionOutcome {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.failed.is_empty()
    }
}
