//! The orchestrator: ties context, planning, constraints, execution,
//! modes, patterns, and escalation into one decision loop.
//!
//! Each monitoring cycle reads the shared context and reacts in a fixed
//! order: active threat first, then the calendar's suggested mode, then
//! the resident's location. Every plan, whether model-proposed or
//! rule-based fallback, runs through the same constraint-screened
//! executor. High and critical threats ask for permission before a
//! single device changes; no answer within the timeout means no.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hestia_common::events::topics;
use hestia_common::{
    Action, ActionPlan, DecisionLog, ExecutionOutcome, HomeMode, Pattern, ThreatAssessment,
    ThreatLevel, Trigger, TriggerKind,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{LoadShedConfig, LocationConfig};
use crate::constraints::ConstraintSet;
use crate::context::ContextSource;
use crate::devices::{inventory_text, DeviceDirectory};
use crate::escalation::{AlertRequest, Escalator};
use crate::executor::PlanExecutor;
use crate::fallback;
use crate::modes::ModeMachine;
use crate::notify::NotificationSink;
use crate::patterns::PatternEngine;
use crate::planner::{Planner, PromptContext};
use crate::prompts;

/// Threats older decisions already covered are skipped; this is how far
/// back the handler looks.
const THREAT_DEDUP_WINDOW: usize = 5;

/// Result of a spoken or typed request.
#[derive(Debug)]
pub struct CommandOutcome {
    pub intent: String,
    pub voice_response: String,
    pub outcome: ExecutionOutcome,
    pub learned: Option<Pattern>,
}

pub struct Orchestrator {
    directory: Arc<dyn DeviceDirectory>,
    planner: Arc<dyn Planner>,
    patterns: Arc<PatternEngine>,
    escalator: Arc<Escalator>,
    executor: PlanExecutor,
    sink: Arc<dyn NotificationSink>,
    context: Arc<dyn ContextSource>,
    modes: Mutex<ModeMachine>,
    decisions: Mutex<DecisionLog>,
    last_location: Mutex<Option<String>>,
    load_shed: LoadShedConfig,
    locations: LocationConfig,
    monitor_interval: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        planner: Arc<dyn Planner>,
        patterns: Arc<PatternEngine>,
        escalator: Arc<Escalator>,
        sink: Arc<dyn NotificationSink>,
        context: Arc<dyn ContextSource>,
        load_shed: LoadShedConfig,
        locations: LocationConfig,
        monitor_interval: Duration,
    ) -> Self {
        let executor = PlanExecutor::new(directory.clone(), sink.clone());
        Self {
            directory,
            planner,
            patterns,
            escalator,
            executor,
            sink,
            context,
            modes: Mutex::new(ModeMachine::new()),
            decisions: Mutex::new(DecisionLog::default()),
            last_location: Mutex::new(None),
            load_shed,
            locations,
            monitor_interval,
        }
    }

    pub async fn current_mode(&self) -> HomeMode {
        self.modes.lock().await.current()
    }

    pub async fn decision_history(&self) -> Vec<(String, String, bool)> {
        self.decisions
            .lock()
            .await
            .iter()
            .map(|r| (r.key.clone(), r.description.clone(), r.executed))
            .collect()
    }

    /// Run the monitoring loop until the task is cancelled.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.monitor_interval);
        info!(
            "Monitoring loop started (interval {}s)",
            self.monitor_interval.as_secs()
        );
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One monitoring cycle: threat, then calendar mode, then location.
    pub async fn tick(&self) {
        if let Some(threat) = self.context.latest_threat() {
            self.handle_threat(&threat).await;
        }
        if let Some(mode) = self.context.calendar().suggested_mode {
            self.handle_mode_change(mode).await;
        }
        if let Some(location) = self.context.location() {
            self.handle_location(&location).await;
        }
        self.patterns.detect().await;
    }

    /// React to a threat assessment. Low and no-threat readings are log
    /// material only. A threat already handled within the last few
    /// decisions is skipped, so a persistent feed does not re-trigger
    /// the same response every cycle.
    pub async fn handle_threat(&self, threat: &ThreatAssessment) {
        if matches!(threat.level, ThreatLevel::None | ThreatLevel::Low) {
            debug!("Threat below action threshold: {}", threat.dedup_key());
            return;
        }
        let key = threat.dedup_key();
        if self
            .decisions
            .lock()
            .await
            .contains_recent(&key, THREAT_DEDUP_WINDOW)
        {
            debug!("Threat {key} already handled recently");
            return;
        }

        if threat.requires_permission() {
            let outcome = self
                .escalator
                .alert(
                    AlertRequest::ask(format!(
                        "{} I recommend: {}.",
                        threat.summary,
                        threat.recommended_actions.join(", ")
                    ))
                    .with_threat(threat.clone()),
                )
                .await;
            if !outcome.approved {
                let why = if outcome.timed_out { "timed out" } else { "denied" };
                info!("Threat response for {key} {why}");
                self.decisions
                    .lock()
                    .await
                    .push(&key, format!("response {why}"), false);
                return;
            }
        }

        let devices = self.directory.all().await;
        let plan = match self.plan_threat_response(threat).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Planner unavailable for threat {key} ({e}), using fallback rules");
                ActionPlan::from_actions(
                    "rule-based threat response",
                    fallback::threat_actions(threat.kind, &devices, &self.load_shed),
                )
            }
        };
        if !self.clear_plan(&plan).await {
            self.decisions
                .lock()
                .await
                .push(&key, "planned response declined", false);
            return;
        }

        let outcome = self
            .execute_and_observe(&plan.actions, Trigger::new(TriggerKind::Threat, threat.kind.as_str()))
            .await;
        self.record(&key, &format!("threat response: {}", threat.summary), &outcome)
            .await;
    }

    async fn plan_threat_response(&self, threat: &ThreatAssessment) -> Result<ActionPlan> {
        let inventory = inventory_text(self.directory.as_ref()).await;
        let mode = self.current_mode().await;
        let constraint_texts = {
            let devices = self.directory.all().await;
            let patterns = self.patterns.all().await;
            ConstraintSet::derive(&devices, &patterns)
                .descriptions()
                .to_vec()
        };
        let matching = self
            .patterns
            .matching(TriggerKind::Threat, threat.kind.as_str())
            .await;
        let ctx = PromptContext::new(prompts::threat_plan(
            threat,
            &inventory,
            mode,
            &constraint_texts,
            &matching,
        ));
        let plan = self.planner.propose(ctx).await?;
        info!("Threat plan: {}", plan.reasoning);
        Ok(plan.into_action_plan())
    }

    /// Voice and permission handling for a planner-proposed plan. A plan
    /// flagged `requires_permission` waits for the resident's answer;
    /// one with only a voice message announces itself and proceeds.
    async fn clear_plan(&self, plan: &ActionPlan) -> bool {
        let message = plan
            .voice_message
            .clone()
            .unwrap_or_else(|| plan.reasoning.clone());
        if plan.requires_permission {
            return self.escalator.alert(AlertRequest::ask(message)).await.approved;
        }
        if plan.voice_message.is_some() {
            self.escalator.alert(AlertRequest::inform(message)).await;
        }
        true
    }

    /// Apply a calendar-suggested mode. No-op when already current. A
    /// planner proposal refines the rule-based defaults when available;
    /// approved patterns for the target mode are added on top either
    /// way. The return to normal replays the snapshot and asks nobody.
    pub async fn handle_mode_change(&self, to: HomeMode) {
        let devices = self.directory.all().await;
        let transition = {
            let mut modes = self.modes.lock().await;
            modes.transition(to, &devices)
        };
        let Some(transition) = transition else {
            return;
        };

        self.escalator.set_mode(to);
        self.sink.broadcast(
            topics::HOME_MODE_CHANGE,
            json!({
                "from": transition.from.as_str(),
                "to": transition.to.as_str(),
                "restored": transition.restored,
            }),
        );

        let mut actions = if to == HomeMode::Normal {
            transition.actions
        } else {
            match self.plan_mode_response(transition.from, to).await {
                // A declined refinement falls back to the default table.
                Ok(plan) if self.clear_plan(&plan).await => plan.actions,
                Ok(_) => transition.actions,
                Err(e) => {
                    warn!("Planner unavailable for mode change ({e}), using default table");
                    transition.actions
                }
            }
        };
        for pattern in self.patterns.matching(TriggerKind::CalendarMode, to.as_str()).await {
            for step in &pattern.action_sequence {
                let mut action = Action::new(&step.device_id, &step.action);
                action.parameters = step.parameters.clone();
                actions.push(action);
            }
        }

        let outcome = self
            .execute_and_observe(&actions, Trigger::new(TriggerKind::CalendarMode, to.as_str()))
            .await;
        self.record(
            &format!("mode_{}", to.as_str()),
            &format!("mode change {} -> {}", transition.from.as_str(), to.as_str()),
            &outcome,
        )
        .await;
    }

    async fn plan_mode_response(&self, from: HomeMode, to: HomeMode) -> Result<ActionPlan> {
        let inventory = inventory_text(self.directory.as_ref()).await;
        let ctx = PromptContext::new(prompts::mode_plan(from, to, &inventory));
        let plan = self.planner.propose(ctx).await?;
        info!("Mode plan: {}", plan.reasoning);
        Ok(plan.into_action_plan())
    }

    /// React to a location change. The last seen location is a single
    /// slot: the same value twice in a row does nothing.
    pub async fn handle_location(&self, location: &str) {
        {
            let mut last = self.last_location.lock().await;
            if last.as_deref() == Some(location) {
                return;
            }
            *last = Some(location.to_string());
        }
        info!("Location changed to '{location}'");

        let devices = self.directory.all().await;
        let matching = self.patterns.matching(TriggerKind::Location, location).await;
        let actions = match self.plan_location_response(location, &matching).await {
            Ok(plan) => {
                if !self.clear_plan(&plan).await {
                    self.decisions.lock().await.push(
                        &format!("location_{location}"),
                        "planned response declined",
                        false,
                    );
                    return;
                }
                plan.actions
            }
            Err(e) => {
                warn!("Planner unavailable for location change ({e}), using fallback rules");
                let mut actions =
                    fallback::location_actions(location, &devices, &self.load_shed, &self.locations);
                // Approved location patterns still apply without a planner.
                for pattern in &matching {
                    for step in &pattern.action_sequence {
                        let mut action = Action::new(&step.device_id, &step.action);
                        action.parameters = step.parameters.clone();
                        actions.push(action);
                    }
                }
                actions
            }
        };

        let outcome = self
            .execute_and_observe(&actions, Trigger::new(TriggerKind::Location, location))
            .await;
        self.record(
            &format!("location_{location}"),
            &format!("location change to {location}"),
            &outcome,
        )
        .await;
    }

    async fn plan_location_response(
        &self,
        location: &str,
        matching: &[Pattern],
    ) -> Result<ActionPlan> {
        let inventory = inventory_text(self.directory.as_ref()).await;
        let mode = self.current_mode().await;
        let ctx = PromptContext::new(prompts::location_plan(location, &inventory, mode, matching));
        let plan = self.planner.propose(ctx).await?;
        info!("Location plan: {}", plan.reasoning);
        Ok(plan.into_action_plan())
    }

    /// Handle a freeform request: classify intent, act, and/or learn.
    pub async fn submit_command(&self, utterance: &str) -> CommandOutcome {
        let inventory = inventory_text(self.directory.as_ref()).await;
        let mode = self.current_mode().await;
        let constraint_texts = {
            let devices = self.directory.all().await;
            let patterns = self.patterns.all().await;
            ConstraintSet::derive(&devices, &patterns)
                .descriptions()
                .to_vec()
        };
        let ctx = PromptContext::new(prompts::command_plan(
            utterance,
            &inventory,
            mode,
            &constraint_texts,
        ));

        let plan = match self.planner.propose(ctx).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Planner unavailable for command ({e})");
                return CommandOutcome {
                    intent: "unclear".to_string(),
                    voice_response:
                        "Sorry, I couldn't work out what to do with that right now.".to_string(),
                    outcome: ExecutionOutcome::default(),
                    learned: None,
                };
            }
        };

        let intent = plan.extra_str("intent").unwrap_or("not_understood").to_string();
        let voice_response = plan
            .extra_str("voice_response")
            .unwrap_or("Okay.")
            .to_string();
        info!("Command intent '{intent}': {}", plan.reasoning);

        let mut learned = None;
        if intent == "preference" || intent == "both" {
            match self.learn_preference(utterance).await {
                Ok(pattern) => learned = Some(pattern),
                Err(e) => warn!("Failed to learn from '{utterance}': {e:#}"),
            }
        }

        let outcome = if intent == "command" || intent == "both" {
            // Command observations are tagged with the wall-clock slot
            // so the detector can spot time-of-day routines.
            let slot = chrono::Utc::now().format("%a_%H").to_string().to_lowercase();
            let trigger = Trigger::new(TriggerKind::Time, slot);
            let outcome = self.execute_and_observe(&plan.actions, trigger).await;
            self.record("command", utterance, &outcome).await;
            outcome
        } else {
            ExecutionOutcome::default()
        };

        CommandOutcome {
            intent,
            voice_response,
            outcome,
            learned,
        }
    }

    /// Teach a standing rule directly, without intent classification.
    pub async fn learn_preference(&self, utterance: &str) -> Result<Pattern> {
        let inventory = inventory_text(self.directory.as_ref()).await;
        let critical = self.directory.critical_ids().await;
        self.patterns
            .learn_from_utterance(utterance, &inventory, &critical)
            .await
    }

    /// Forward the resident's answer to a pending permission request.
    pub fn resolve_permission(&self, alert_id: &str, approved: bool) -> Result<()> {
        self.escalator.resolve(alert_id, approved)
    }

    pub async fn approve_pattern(&self, pattern_id: &str) -> Result<Pattern> {
        self.patterns.approve(pattern_id).await
    }

    pub async fn dismiss_pattern(&self, pattern_id: &str) -> Result<()> {
        self.patterns.dismiss(pattern_id).await
    }

    /// Screen, execute, broadcast, and feed the observation log.
    async fn execute_and_observe(&self, actions: &[Action], context: Trigger) -> ExecutionOutcome {
        if actions.is_empty() {
            return ExecutionOutcome::default();
        }
        let constraints = {
            let devices = self.directory.all().await;
            let patterns = self.patterns.all().await;
            ConstraintSet::derive(&devices, &patterns)
        };
        let outcome = self.executor.execute(actions, &constraints).await;

        for action in actions {
            let label = action.describe();
            if outcome.executed.contains(&label) {
                self.patterns
                    .observe(&action.device_id, &action.action, &action.parameters, context.clone())
                    .await;
            }
        }
        outcome
    }

    async fn record(&self, key: &str, description: &str, outcome: &ExecutionOutcome) {
        let executed = !outcome.executed.is_empty();
        self.decisions.lock().await.push(key, description, executed);
        self.sink.broadcast(
            topics::ORCHESTRATOR_ACTION,
            json!({
                "key": key,
                "description": description,
                "executed": outcome.executed,
                "failed": outcome.failed,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_devices;
    use crate::devices::MemoryDirectory;
    use crate::escalation::Escalator;
    use crate::notify::RecordingSink;
    use crate::planner::FakePlanner;
    use crate::context::SharedContext;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn build(planner: Arc<FakePlanner>) -> (Arc<MemoryDirectory>, Arc<RecordingSink>, Orchestrator) {
        let directory = MemoryDirectory::from_seeds(&default_devices());
        let sink = Arc::new(RecordingSink::new());
        let patterns = Arc::new(
            PatternEngine::new(Arc::new(MemoryStore::new()), planner.clone(), sink.clone())
                .unwrap(),
        );
        let escalator = Arc::new(Escalator::new(
            planner.clone(),
            sink.clone(),
            Duration::from_secs(60),
        ));
        let orchestrator = Orchestrator::new(
            directory.clone(),
            planner,
            patterns,
            escalator,
            sink.clone(),
            Arc::new(SharedContext::new()),
            LoadShedConfig::default(),
            LocationConfig::default(),
            Duration::from_secs(10),
        );
        (directory, sink, orchestrator)
    }

    #[tokio::test]
    async fn repeated_location_is_ignored() {
        let planner = Arc::new(FakePlanner::new());
        planner.push_json(json!({"reasoning": "welcome home", "actions": []}));
        let (_directory, sink, orchestrator) = build(planner.clone());

        orchestrator.handle_location("home").await;
        orchestrator.handle_location("home").await;

        // Only the first change consumed a planner call and recorded.
        assert_eq!(planner.prompts().len(), 1);
        assert_eq!(sink.count(topics::ORCHESTRATOR_ACTION), 1);
    }

    #[tokio::test]
    async fn low_threats_are_log_only() {
        let planner = Arc::new(FakePlanner::new());
        let (_directory, sink, orchestrator) = build(planner.clone());

        let threat = ThreatAssessment {
            level: ThreatLevel::Low,
            kind: hestia_common::ThreatKind::Storm,
            urgency: 0.2,
            summary: "Light rain expected".to_string(),
            reasoning: String::new(),
            recommended_actions: vec![],
            timestamp: chrono::Utc::now(),
        };
        orchestrator.handle_threat(&threat).await;

        assert!(planner.prompts().is_empty());
        assert_eq!(sink.count(topics::ORCHESTRATOR_ACTION), 0);
    }

    #[tokio::test]
    async fn medium_threat_acts_without_permission() {
        let planner = Arc::new(FakePlanner::new());
        planner.push_json(json!({
            "reasoning": "reduce load",
            "actions": [{"device_id": "plug_living_tv", "action": "off", "parameters": {}}]
        }));
        let (directory, sink, orchestrator) = build(planner);

        let threat = ThreatAssessment {
            level: ThreatLevel::Medium,
            kind: hestia_common::ThreatKind::GridStrain,
            urgency: 0.5,
            summary: "Grid load rising".to_string(),
            reasoning: String::new(),
            recommended_actions: vec!["shed low-priority load".to_string()],
            timestamp: chrono::Utc::now(),
        };
        orchestrator.handle_threat(&threat).await;

        assert!(!directory.get("plug_living_tv").await.unwrap().power);
        // Medium threats never raise alerts.
        assert_eq!(sink.count(topics::ALERT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn planner_requested_permission_is_honored() {
        let planner = Arc::new(FakePlanner::new());
        planner.push_json(json!({
            "reasoning": "shedding the entertainment plug",
            "requires_permission": true,
            "voice_message": "Grid load is high, can I turn the TV plug off?",
            "actions": [{"device_id": "plug_living_tv", "action": "off", "parameters": {}}]
        }));
        let (directory, sink, orchestrator) = build(planner);

        let threat = ThreatAssessment {
            level: ThreatLevel::Medium,
            kind: hestia_common::ThreatKind::GridStrain,
            urgency: 0.5,
            summary: "Grid load rising".to_string(),
            reasoning: String::new(),
            recommended_actions: vec![],
            timestamp: chrono::Utc::now(),
        };
        // Nobody answers; the ask times out and the plan is dropped.
        orchestrator.handle_threat(&threat).await;

        assert!(directory.get("plug_living_tv").await.unwrap().power);
        assert_eq!(sink.count(topics::ALERT_TIMEOUT), 1);
        let history = orchestrator.decision_history().await;
        assert!(!history.last().unwrap().2);
    }

    #[tokio::test]
    async fn command_intent_executes_and_replies() {
        let planner = Arc::new(FakePlanner::new());
        planner.push_json(json!({
            "reasoning": "user asked",
            "intent": "command",
            "voice_response": "Turning off the TV.",
            "actions": [{"device_id": "plug_living_tv", "action": "off", "parameters": {}}]
        }));
        let (directory, _sink, orchestrator) = build(planner);

        let result = orchestrator.submit_command("turn off the tv").await;

        assert_eq!(result.intent, "command");
        assert_eq!(result.voice_response, "Turning off the TV.");
        assert_eq!(result.outcome.executed, vec!["plug_living_tv.off"]);
        assert!(!directory.get("plug_living_tv").await.unwrap().power);
    }

    #[tokio::test]
    async fn not_understood_changes_nothing() {
        let planner = Arc::new(FakePlanner::new());
        planner.push_json(json!({
            "reasoning": "unrelated",
            "intent": "not_understood",
            "voice_response": "I can only help with the home.",
            "actions": []
        }));
        let (_directory, sink, orchestrator) = build(planner);

        let result = orchestrator.submit_command("what's the capital of France?").await;
        assert_eq!(result.intent, "not_understood");
        assert!(result.outcome.is_empty());
        assert_eq!(sink.count(topics::DEVICE_STATE), 0);
    }

    #[tokio::test]
    async fn planner_outage_yields_unclear() {
        let planner = Arc::new(FakePlanner::new());
        let (_directory, _sink, orchestrator) = build(planner);

        let result = orchestrator.submit_command("do the thing").await;
        assert_eq!(result.intent, "unclear");
        assert!(result.outcome.is_empty());
    }
}
