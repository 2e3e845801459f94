//! Planner seam - the LLM behind every freeform planning decision.
//!
//! The orchestrator, pattern engine, and escalator all reason through
//! this trait. The production implementation speaks the OpenAI-compatible
//! chat completions protocol (Ollama serves it locally); tests script a
//! fake. Every caller must tolerate failure and fall back to rule-based
//! behavior, so errors here are ordinary, not fatal.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use hestia_common::{Action, ActionPlan};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PlannerConfig;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("planner returned no usable JSON: {0}")]
    BadResponse(String),

    #[error("planner unavailable: {0}")]
    Unavailable(String),
}

/// One planning request: a fully rendered prompt plus sampling knobs.
/// Temperature defaults to the planner's configured value.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl PromptContext {
    pub fn new(prompt: String) -> Self {
        Self {
            prompt,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A plan as proposed by the model, before constraint screening.
///
/// `extras` carries any additional top-level JSON keys the prompt asked
/// for (intent classification, pattern names, voice text) so each caller
/// can pull out what its prompt requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposedPlan {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
    /// The `actions` array exactly as the model sent it. `Action` drops
    /// keys it does not model (notably `delay_seconds`), so pattern
    /// teaching re-reads the steps from here.
    #[serde(skip)]
    raw_actions: Value,
}

impl ProposedPlan {
    /// Parse from raw JSON, tolerating the common model quirks: an
    /// `action` key instead of `actions`, and a bare action object
    /// instead of an array.
    pub fn from_value(mut value: Value) -> Result<Self, PlannerError> {
        if let Some(obj) = value.as_object_mut() {
            if !obj.contains_key("actions") {
                if let Some(single) = obj.remove("action") {
                    let actions = if single.is_array() { single } else { Value::Array(vec![single]) };
                    obj.insert("actions".to_string(), actions);
                }
            }
        }
        let raw_actions = value.get("actions").cloned().unwrap_or(Value::Null);
        let mut plan: ProposedPlan =
            serde_json::from_value(value).map_err(|e| PlannerError::BadResponse(e.to_string()))?;
        plan.raw_actions = raw_actions;
        Ok(plan)
    }

    /// The proposed actions as pattern steps, with per-step delays kept.
    pub fn pattern_steps(&self) -> Result<Vec<hestia_common::PatternAction>, PlannerError> {
        match &self.raw_actions {
            Value::Null => Ok(Vec::new()),
            raw => serde_json::from_value(raw.clone())
                .map_err(|e| PlannerError::BadResponse(e.to_string())),
        }
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras.get(key).and_then(Value::as_str)
    }

    pub fn extra_bool(&self, key: &str) -> bool {
        self.extras.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Collapse into the executable plan shape, picking up the optional
    /// voice and permission extras.
    pub fn into_action_plan(self) -> ActionPlan {
        let voice_message = self.extra_str("voice_message").map(str::to_string);
        let requires_permission = self.extra_bool("requires_permission");
        ActionPlan {
            reasoning: self.reasoning,
            actions: self.actions,
            voice_message,
            requires_permission,
        }
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn propose(&self, ctx: PromptContext) -> Result<ProposedPlan, PlannerError>;

    /// Freeform text completion, used for voice phrasing. Default goes
    /// through `propose` and reads a `text` key.
    async fn compose_text(&self, ctx: PromptContext) -> Result<String, PlannerError> {
        let plan = self.propose(ctx).await?;
        plan.extra_str("text")
            .map(str::to_string)
            .ok_or_else(|| PlannerError::BadResponse("missing 'text' key".to_string()))
    }
}

/// Planner backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmPlanner {
    client: reqwest::Client,
    config: PlannerConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl LlmPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: Option<u32>) -> Result<String, PlannerError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature,
            max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(PlannerError::Unavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }
        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PlannerError::BadResponse("empty choices".to_string()))
    }
}

/// Extract the outermost JSON object from model output. Models wrap JSON
/// in prose or code fences more often than not.
pub fn extract_json(text: &str) -> Result<Value, PlannerError> {
    let start = text
        .find('{')
        .ok_or_else(|| PlannerError::BadResponse(format!("no JSON object in: {text}")))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| PlannerError::BadResponse(format!("no JSON object in: {text}")))?;
    serde_json::from_str(&text[start..=end])
        .map_err(|e| PlannerError::BadResponse(format!("invalid JSON: {e}")))
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn propose(&self, ctx: PromptContext) -> Result<ProposedPlan, PlannerError> {
        let temperature = ctx.temperature.unwrap_or(self.config.temperature);
        let raw = self.complete(&ctx.prompt, temperature, ctx.max_tokens).await?;
        debug!("Planner raw response: {}", raw.chars().take(200).collect::<String>());
        let value = extract_json(&raw)?;
        ProposedPlan::from_value(value)
    }

    async fn compose_text(&self, ctx: PromptContext) -> Result<String, PlannerError> {
        let temperature = ctx.temperature.unwrap_or(self.config.temperature);
        let raw = self.complete(&ctx.prompt, temperature, ctx.max_tokens).await?;
        let text = raw.trim().trim_matches('"').to_string();
        if text.is_empty() {
            warn!("Planner returned empty text");
            return Err(PlannerError::BadResponse("empty text".to_string()));
        }
        Ok(text)
    }
}

/// Scripted planner for tests. Responses are consumed in order; once the
/// script runs dry every call fails as unavailable.
#[derive(Default)]
pub struct FakePlanner {
    script: Mutex<VecDeque<Result<ProposedPlan, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl FakePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_plan(&self, plan: ProposedPlan) {
        self.script.lock().unwrap().push_back(Ok(plan));
    }

    pub fn push_json(&self, json: Value) {
        let plan = ProposedPlan::from_value(json).expect("invalid scripted plan");
        self.push_plan(plan);
    }

    pub fn push_failure(&self, reason: &str) {
        self.script.lock().unwrap().push_back(Err(reason.to_string()));
    }

    /// Prompts seen so far, for assertions on what context was sent.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for FakePlanner {
    async fn propose(&self, ctx: PromptContext) -> Result<ProposedPlan, PlannerError> {
        self.prompts.lock().unwrap().push(ctx.prompt);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(plan)) => Ok(plan),
            Some(Err(reason)) => Err(PlannerError::Unavailable(reason)),
            None => Err(PlannerError::Unavailable("script exhausted".to_string())),
        }
    }

    /// Voice phrasing never consumes the plan script; callers fall back
    /// to their templates.
    async fn compose_text(&self, _ctx: PromptContext) -> Result<String, PlannerError> {
        Err(PlannerError::Unavailable("no scripted voice".to_string()))
    }
}

/// Planner that always fails. Exercises rule-based fallback paths.
pub struct UnavailablePlanner;

#[async_trait]
impl Planner for UnavailablePlanner {
    async fn propose(&self, _ctx: PromptContext) -> Result<ProposedPlan, PlannerError> {
        Err(PlannerError::Unavailable("planner offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_json_skips_prose_and_fences() {
        let text = "Sure, here is the plan:\n```json\n{\"reasoning\": \"ok\", \"actions\": []}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["reasoning"], "ok");
    }

    #[test]
    fn extract_json_rejects_plain_prose() {
        assert!(extract_json("I could not produce a plan.").is_err());
    }

    #[test]
    fn from_value_accepts_singular_action_key() {
        let plan = ProposedPlan::from_value(json!({
            "reasoning": "turn it off",
            "action": {"device_id": "plug_living_tv", "action": "off", "parameters": {}}
        }))
        .unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].device_id, "plug_living_tv");
    }

    #[test]
    fn pattern_steps_keep_per_step_delays() {
        let plan = ProposedPlan::from_value(json!({
            "reasoning": "evening wind-down",
            "actions": [
                {"device_id": "light_living_main", "action": "dim",
                 "parameters": {"brightness": 30}, "delay_seconds": 5.0},
                {"device_id": "lock_front_door", "action": "lock"}
            ]
        }))
        .unwrap();

        let steps = plan.pattern_steps().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].delay_seconds, 5.0);
        assert_eq!(steps[1].delay_seconds, 0.0);
        // The executable view drops the delay but keeps the command.
        assert_eq!(plan.actions[0].describe(), "light_living_main.dim({\"brightness\":30})");
    }

    #[test]
    fn from_value_keeps_extra_keys() {
        let plan = ProposedPlan::from_value(json!({
            "reasoning": "routine",
            "actions": [],
            "intent": "preference",
            "requires_permission": true
        }))
        .unwrap();
        assert_eq!(plan.extra_str("intent"), Some("preference"));
        assert!(plan.extra_bool("requires_permission"));
    }

    #[tokio::test]
    async fn fake_planner_replays_script_in_order() {
        let fake = FakePlanner::new();
        fake.push_json(json!({"reasoning": "first", "actions": []}));
        fake.push_failure("down");

        let first = fake.propose(PromptContext::new("p1".into())).await.unwrap();
        assert_eq!(first.reasoning, "first");
        assert!(fake.propose(PromptContext::new("p2".into())).await.is_err());
        assert_eq!(fake.prompts(), vec!["p1", "p2"]);
    }
}
