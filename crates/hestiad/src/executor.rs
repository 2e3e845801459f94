//! Plan executor - runs screened actions against the device directory.
//!
//! Actions run strictly in order. A failure never aborts the rest of the
//! plan; it is recorded and the plan continues. Every successful action
//! broadcasts the device's fresh state.

use std::sync::Arc;

use hestia_common::events::topics;
use hestia_common::{Action, ExecutionOutcome};
use serde_json::json;
use tracing::{info, warn};

use crate::constraints::ConstraintSet;
use crate::devices::DeviceDirectory;
use crate::notify::NotificationSink;

pub struct PlanExecutor {
    directory: Arc<dyn DeviceDirectory>,
    sink: Arc<dyn NotificationSink>,
}

impl PlanExecutor {
    pub fn new(directory: Arc<dyn DeviceDirectory>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { directory, sink }
    }

    /// Execute `actions` in order, screening each against `constraints`.
    pub async fn execute(&self, actions: &[Action], constraints: &ConstraintSet) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::default();

        for action in actions {
            let label = action.describe();

            if action.device_id.is_empty() || action.action.is_empty() {
                warn!("Skipping malformed action '{label}'");
                outcome.failed.push(format!("{label}: malformed action"));
                continue;
            }

            if let Some(reason) = constraints.is_blocked(action) {
                warn!("{label}: {reason}");
                outcome.failed.push(format!("{label}: {reason}"));
                continue;
            }

            match self
                .directory
                .execute(&action.device_id, &action.action, &action.parameters)
                .await
            {
                Ok(()) => {
                    info!("Executed {label}");
                    outcome.executed.push(label);
                    if let Some(state) = self.directory.get(&action.device_id).await {
                        self.sink.broadcast(
                            topics::DEVICE_STATE,
                            json!({
                                "device_id": state.id,
                                "power": state.power,
                                "properties": state.properties,
                            }),
                        );
                    }
                }
                Err(e) => {
                    warn!("{label} failed: {e}");
                    outcome.failed.push(format!("{label}: {e}"));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_devices;
    use crate::devices::MemoryDirectory;
    use crate::notify::RecordingSink;
    use hestia_common::Pattern;

    fn harness() -> (Arc<MemoryDirectory>, Arc<RecordingSink>, PlanExecutor) {
        let directory = MemoryDirectory::from_seeds(&default_devices());
        let sink = Arc::new(RecordingSink::new());
        let executor = PlanExecutor::new(directory.clone(), sink.clone());
        (directory, sink, executor)
    }

    async fn constraints(directory: &MemoryDirectory, patterns: &[Pattern]) -> ConstraintSet {
        ConstraintSet::derive(&directory.all().await, patterns)
    }

    #[tokio::test]
    async fn executes_in_order_and_broadcasts_each_success() {
        let (directory, sink, executor) = harness();
        let set = constraints(&directory, &[]).await;
        let actions = vec![
            Action::new("light_kitchen_main", "off"),
            Action::new("plug_living_tv", "off"),
        ];

        let outcome = executor.execute(&actions, &set).await;

        assert_eq!(outcome.executed, vec!["light_kitchen_main.off", "plug_living_tv.off"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(sink.count(topics::DEVICE_STATE), 2);
        assert!(!directory.get("plug_living_tv").await.unwrap().power);
    }

    #[tokio::test]
    async fn blocked_action_is_skipped_but_plan_continues() {
        let (directory, sink, executor) = harness();
        let set = constraints(&directory, &[]).await;
        let actions = vec![
            Action::new("plug_kitchen_fridge", "off"),
            Action::new("plug_living_tv", "off"),
        ];

        let outcome = executor.execute(&actions, &set).await;

        assert_eq!(outcome.executed, vec!["plug_living_tv.off"]);
        assert_eq!(
            outcome.failed,
            vec!["plug_kitchen_fridge.off: BLOCKED (critical device)"]
        );
        // Fridge never changed, and no state event was sent for it.
        assert!(directory.get("plug_kitchen_fridge").await.unwrap().power);
        assert_eq!(sink.count(topics::DEVICE_STATE), 1);
    }

    #[tokio::test]
    async fn malformed_actions_fail_descriptively() {
        let (directory, _sink, executor) = harness();
        let set = constraints(&directory, &[]).await;
        let actions = vec![Action::new("", "off"), Action::new("plug_living_tv", "")];

        let outcome = executor.execute(&actions, &set).await;

        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed.iter().all(|f| f.ends_with("malformed action")));
    }

    #[tokio::test]
    async fn device_failure_does_not_abort_remaining_actions() {
        let (directory, _sink, executor) = harness();
        directory.set_online("light_office_main", false).await;
        let set = constraints(&directory, &[]).await;
        let actions = vec![
            Action::new("light_office_main", "on"),
            Action::new("light_bedroom_main", "on"),
        ];

        let outcome = executor.execute(&actions, &set).await;

        assert_eq!(outcome.executed, vec!["light_bedroom_main.on"]);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].starts_with("light_office_main.on:"));
    }
}
