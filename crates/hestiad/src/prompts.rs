//! Prompt templates for the planner.
//!
//! Each builder takes the pieces of home context its flow knows about
//! and renders one self-contained prompt. All plan prompts demand bare
//! JSON with an `actions` array so parsing stays uniform.

use hestia_common::device::action_reference_text;
use hestia_common::{HomeMode, Pattern, ThreatAssessment};

const PLAN_FORMAT: &str = r#"Respond with ONLY a JSON object, no prose:
{
  "reasoning": "<one sentence>",
  "actions": [{"device_id": "...", "action": "...", "parameters": {}}]
}
Use only device ids from the inventory and actions from the reference.
An empty actions array is a valid answer when nothing should change."#;

/// Plan a response to an environmental threat.
pub fn threat_plan(
    threat: &ThreatAssessment,
    inventory: &str,
    mode: HomeMode,
    constraints: &[String],
    matching: &[Pattern],
) -> String {
    format!(
        "You manage a smart home. An environmental threat needs a response.\n\n\
         Threat: {kind} (level: {level}, urgency: {urgency:.2})\n\
         Summary: {summary}\n\
         Recommended: {recommended}\n\
         Current home mode: {mode}\n\n\
         Standing rules the resident has taught:\n{constraints_block}\n\n\
         Approved patterns for this threat:\n{patterns_block}\n\n\
         Device inventory:\n{inventory}\n\n\
         Action reference:\n{reference}\n\n\
         Plan device actions that protect the home. Never power off devices \
         marked priority=critical.\n\n{format}",
        kind = threat.kind.as_str(),
        level = threat.level.as_str(),
        urgency = threat.urgency,
        summary = threat.summary,
        recommended = threat.recommended_actions.join("; "),
        mode = mode.as_str(),
        constraints_block = bullet_list(constraints),
        patterns_block = pattern_list(matching),
        reference = action_reference_text(),
        format = PLAN_FORMAT,
    )
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
    }
}

fn pattern_list(patterns: &[Pattern]) -> String {
    if patterns.is_empty() {
        "none".to_string()
    } else {
        patterns
            .iter()
            .map(|p| format!("- {} ({}): {}", p.display_name, p.pattern_type.as_str(), p.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Plan adjustments after the user's location changed.
pub fn location_plan(location: &str, inventory: &str, mode: HomeMode, matching: &[Pattern]) -> String {
    let patterns_block = pattern_list(matching);
    format!(
        "You manage a smart home. The resident's location changed to: {location}\n\
         Current home mode: {mode}\n\n\
         Approved patterns matching this location:\n{patterns_block}\n\n\
         Device inventory:\n{inventory}\n\n\
         Action reference:\n{reference}\n\n\
         Plan device adjustments appropriate for this location. Prefer the \
         approved patterns when they apply. Keep it minimal.\n\n{format}",
        mode = mode.as_str(),
        reference = action_reference_text(),
        format = PLAN_FORMAT,
    )
}

/// Plan device adjustments for a home mode transition.
pub fn mode_plan(from: HomeMode, to: HomeMode, inventory: &str) -> String {
    format!(
        "You manage a smart home. The home mode is changing from {from} to {to}.\n\n\
         Device inventory:\n{inventory}\n\n\
         Action reference:\n{reference}\n\n\
         Plan device adjustments that suit the new mode. Keep it minimal \
         and never power off devices marked priority=critical.\n\n{format}",
        from = from.as_str(),
        to = to.as_str(),
        reference = action_reference_text(),
        format = PLAN_FORMAT,
    )
}

/// Classify a freeform utterance and plan any immediate actions.
pub fn command_plan(utterance: &str, inventory: &str, mode: HomeMode, constraints: &[String]) -> String {
    let constraints_block = bullet_list(constraints);
    format!(
        "You manage a smart home. The resident said: \"{utterance}\"\n\
         Current home mode: {mode}\n\n\
         Standing rules the resident has taught:\n{constraints_block}\n\n\
         Device inventory:\n{inventory}\n\n\
         Action reference:\n{reference}\n\n\
         First decide the intent:\n\
         - \"command\": do something right now\n\
         - \"preference\": a standing rule to remember, nothing to do now\n\
         - \"both\": act now AND remember the rule\n\
         - \"not_understood\": unrelated to home control\n\n\
         Respond with ONLY a JSON object, no prose:\n\
         {{\n\
           \"intent\": \"command|preference|both|not_understood\",\n\
           \"reasoning\": \"<one sentence>\",\n\
           \"actions\": [{{\"device_id\": \"...\", \"action\": \"...\", \"parameters\": {{}}}}],\n\
           \"voice_response\": \"<short confirmation to speak back>\"\n\
         }}\n\
         Leave actions empty for preference and not_understood intents.",
        mode = mode.as_str(),
        reference = action_reference_text(),
    )
}

/// Extract a structured pattern from a taught preference.
pub fn pattern_extraction(utterance: &str, inventory: &str) -> String {
    format!(
        "Extract a reusable automation pattern from what the resident said:\n\
         \"{utterance}\"\n\n\
         Device inventory:\n{inventory}\n\n\
         Action reference:\n{reference}\n\n\
         Respond with ONLY a JSON object, no prose:\n\
         {{\n\
           \"name\": \"<short name>\",\n\
           \"description\": \"<one sentence>\",\n\
           \"trigger_kind\": \"calendar_mode|location|time|threat|global\",\n\
           \"trigger_value\": \"<e.g. focus, home, 07:00, heat_wave, or * for global>\",\n\
           \"actions\": [{{\"device_id\": \"...\", \"action\": \"...\", \"parameters\": {{}}, \"delay_seconds\": 0}}]\n\
         }}\n\
         Use trigger_kind \"global\" with value \"*\" for rules that always \
         apply (prohibitions). Leave actions empty if the rule only forbids.",
        reference = action_reference_text(),
    )
}

/// Reconcile an existing pattern with a new instruction for the same
/// trigger. The answer carries the complete updated action list, so the
/// new instruction can add, change, or remove steps.
pub fn pattern_merge(existing: &Pattern, new_instruction: &str) -> String {
    let current_actions =
        serde_json::to_string(&existing.action_sequence).unwrap_or_else(|_| "[]".to_string());
    format!(
        "An automation pattern already exists:\n\
         Name: {name}\n\
         Description: {description}\n\
         Trigger: {trigger_kind}={trigger_value}\n\
         Current actions: {current_actions}\n\n\
         The resident just said about this same situation:\n\
         \"{new_instruction}\"\n\n\
         Update the pattern to reflect both the original behavior and the \
         new instruction. Keep steps that still apply, change steps the \
         instruction revises, and drop steps it revokes.\n\n\
         Respond with ONLY a JSON object, no prose:\n\
         {{\n\
           \"display_name\": \"<short name>\",\n\
           \"description\": \"<one sentence>\",\n\
           \"reasoning\": \"<one sentence>\",\n\
           \"actions\": [{{\"device_id\": \"...\", \"action\": \"...\", \"parameters\": {{}}, \"delay_seconds\": 0}}]\n\
         }}\n\
         The actions array must be the COMPLETE updated sequence.",
        name = existing.display_name,
        description = existing.description,
        trigger_kind = existing.trigger.kind.as_str(),
        trigger_value = existing.trigger.value,
    )
}

/// Phrase an alert for speech.
pub fn voice_phrasing(message: &str, requires_approval: bool) -> String {
    let ask = if requires_approval {
        "End by asking for a yes or no."
    } else {
        "This is informational; do not ask a question."
    };
    format!(
        "Rephrase this smart-home alert as one short, warm spoken sentence \
         or two. {ask}\n\nAlert: {message}\n\n\
         Respond with ONLY the spoken text, no quotes, no JSON."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hestia_common::{ThreatKind, ThreatLevel};

    #[test]
    fn threat_prompt_carries_threat_and_inventory() {
        let threat = ThreatAssessment {
            level: ThreatLevel::High,
            kind: ThreatKind::HeatWave,
            urgency: 0.9,
            summary: "Outside temp 104F".to_string(),
            reasoning: String::new(),
            recommended_actions: vec!["pre-cool".to_string()],
            timestamp: chrono::Utc::now(),
        };
        let rules = vec!["Never turn off the bedroom light".to_string()];
        let prompt = threat_plan(
            &threat,
            "[kitchen]\n  plug_kitchen_fridge",
            HomeMode::Normal,
            &rules,
            &[],
        );
        assert!(prompt.contains("heat_wave"));
        assert!(prompt.contains("plug_kitchen_fridge"));
        assert!(prompt.contains("priority=critical"));
        assert!(prompt.contains("Never turn off the bedroom light"));
    }

    #[test]
    fn command_prompt_lists_intents() {
        let prompt = command_plan("turn off the tv", "inventory", HomeMode::Normal, &[]);
        for intent in ["command", "preference", "both", "not_understood"] {
            assert!(prompt.contains(intent), "missing intent {intent}");
        }
    }

    #[test]
    fn merge_prompt_shows_the_current_sequence() {
        use hestia_common::{PatternAction, PatternType, Trigger, TriggerKind};
        let existing = Pattern {
            pattern_id: "user_1".into(),
            pattern_type: PatternType::UserDefined,
            display_name: "Focus lighting".into(),
            description: "Dim the living room during focus".into(),
            trigger: Trigger::new(TriggerKind::CalendarMode, "focus"),
            action_sequence: vec![PatternAction {
                device_id: "light_living_main".into(),
                action: "dim".into(),
                parameters: serde_json::Map::new(),
                delay_seconds: 0.0,
            }],
            confidence: 1.0,
            frequency: 1,
            approved: true,
            source_utterance: "dim when I focus".into(),
            created_at: chrono::Utc::now(),
            last_occurrence: chrono::Utc::now(),
        };
        let prompt = pattern_merge(&existing, "make it darker");
        assert!(prompt.contains("light_living_main"));
        assert!(prompt.contains("COMPLETE updated sequence"));
        assert!(prompt.contains("make it darker"));
    }

    #[test]
    fn voice_prompt_only_asks_when_approval_needed() {
        assert!(voice_phrasing("m", true).contains("yes or no"));
        assert!(!voice_phrasing("m", false).contains("yes or no"));
    }
}
