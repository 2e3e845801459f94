//! Pattern engine: learns automation patterns from natural language and
//! from observed behavior.
//!
//! Two acquisition paths feed one pattern list. Teaching ("always dim
//! the lights when I focus") goes through the planner to extract a
//! structured pattern, then merges with an existing pattern for the
//! same situation instead of duplicating it. Observation records every
//! device action with its context and statistically promotes repeated
//! behavior into candidate routines and preferences. Detected patterns
//! stay dormant until the user approves them; taught patterns are
//! suggestion-ready immediately.
//!
//! Lock discipline: the planner is always consulted before the pattern
//! list lock is taken, never while holding it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use hestia_common::events::topics;
use hestia_common::{Pattern, PatternAction, PatternType, Trigger, TriggerKind};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::notify::NotificationSink;
use crate::planner::{Planner, PromptContext};
use crate::prompts;
use crate::store::PatternStore;

/// Observed sequences must repeat this often before promotion.
const ROUTINE_MIN_SEQUENCE_LEN: usize = 2;
const PREFERENCE_MIN_OCCURRENCES: usize = 3;

/// Actions closer together than this belong to the same sequence.
const SEQUENCE_GAP_SECS: i64 = 300;

/// One observed device action with the context it happened in.
#[derive(Debug, Clone)]
pub struct Observation {
    pub device_id: String,
    pub action: String,
    pub parameters: Map<String, Value>,
    pub context: Trigger,
    pub timestamp: DateTime<Utc>,
}

pub struct PatternEngine {
    store: Arc<dyn PatternStore>,
    planner: Arc<dyn Planner>,
    sink: Arc<dyn NotificationSink>,
    patterns: RwLock<Vec<Pattern>>,
    observations: RwLock<Vec<Observation>>,
}

impl PatternEngine {
    pub fn new(
        store: Arc<dyn PatternStore>,
        planner: Arc<dyn Planner>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let patterns = store.load_all().context("failed to load patterns")?;
        info!("Pattern engine loaded {} pattern(s)", patterns.len());
        Ok(Self {
            store,
            planner,
            sink,
            patterns: RwLock::new(patterns),
            observations: RwLock::new(Vec::new()),
        })
    }

    pub async fn all(&self) -> Vec<Pattern> {
        self.patterns.read().await.clone()
    }

    /// Approved patterns matching a trigger, for planning context.
    pub async fn matching(&self, kind: TriggerKind, value: &str) -> Vec<Pattern> {
        self.patterns
            .read()
            .await
            .iter()
            .filter(|p| p.approved && p.matches(kind, value))
            .cloned()
            .collect()
    }

    /// Learn a pattern from a taught preference. The planner extracts
    /// structure; an existing pattern for the same trigger is refined in
    /// place, so one situation is always covered by one taught pattern.
    /// Automation steps that would power off a critical device are
    /// dropped before the pattern is kept.
    pub async fn learn_from_utterance(
        &self,
        utterance: &str,
        inventory: &str,
        critical_ids: &[String],
    ) -> Result<Pattern> {
        let ctx = PromptContext::new(prompts::pattern_extraction(utterance, inventory));
        let proposed = self
            .planner
            .propose(ctx)
            .await
            .context("pattern extraction failed")?;

        let trigger_kind = proposed
            .extra_str("trigger_kind")
            .and_then(TriggerKind::parse)
            .ok_or_else(|| anyhow!("extraction missing trigger_kind"))?;
        let trigger_value = proposed
            .extra_str("trigger_value")
            .unwrap_or("*")
            .to_string();
        let name = proposed.extra_str("name").unwrap_or("Taught rule").to_string();
        let description = proposed
            .extra_str("description")
            .unwrap_or(utterance)
            .to_string();
        let mut action_sequence = proposed
            .pattern_steps()
            .context("extraction produced malformed actions")?;

        // A prohibition's action list names what to block, so it is kept
        // verbatim. Automation sequences lose critical-device power-offs.
        let prohibition = crate::constraints::is_prohibition_text(utterance)
            || crate::constraints::is_prohibition_text(&description);
        if !prohibition && !action_sequence.is_empty() {
            action_sequence = filter_safe_steps(action_sequence, critical_ids);
            if action_sequence.is_empty() {
                return Err(anyhow!("no safe actions identified"));
            }
        }

        let trigger = Trigger::new(trigger_kind, trigger_value);
        let existing = {
            let patterns = self.patterns.read().await;
            patterns
                .iter()
                .find(|p| {
                    p.pattern_type == PatternType::UserDefined && p.trigger == trigger
                })
                .cloned()
        };

        // One taught pattern per trigger: a second instruction for the
        // same situation always refines the first.
        if let Some(existing) = existing {
            return self
                .merge_into(existing, utterance, description, action_sequence, prohibition, critical_ids)
                .await;
        }

        let pattern = Pattern {
            pattern_id: format!("user_{}", short_hash(&format!("{utterance}{}", Utc::now()))),
            pattern_type: PatternType::UserDefined,
            display_name: name,
            description,
            trigger,
            action_sequence,
            confidence: 1.0,
            frequency: 1,
            approved: true,
            source_utterance: utterance.to_string(),
            created_at: Utc::now(),
            last_occurrence: Utc::now(),
        };

        self.store.save(&pattern)?;
        self.patterns.write().await.push(pattern.clone());
        info!("Learned pattern '{}' ({})", pattern.display_name, pattern.pattern_id);
        self.sink.broadcast(
            topics::PATTERN_LEARNED,
            json!({"pattern_id": pattern.pattern_id, "name": pattern.display_name}),
        );
        Ok(pattern)
    }

    /// Fold a new instruction into the existing pattern for the same
    /// trigger. The planner sees the existing sequence and the new
    /// instruction and returns the full reconciled sequence, so a
    /// reteach can remove or replace steps, not just add them. Without a
    /// usable planner answer the newly extracted steps are folded into
    /// the existing sequence.
    async fn merge_into(
        &self,
        existing: Pattern,
        utterance: &str,
        description: String,
        extracted: Vec<PatternAction>,
        prohibition: bool,
        critical_ids: &[String],
    ) -> Result<Pattern> {
        // Reconciliation happens outside the lock.
        let ctx = PromptContext::new(prompts::pattern_merge(&existing, utterance));
        let reconciled = match self.planner.propose(ctx).await {
            Ok(plan) => match plan.pattern_steps() {
                Ok(steps) if !steps.is_empty() => Some((plan, steps)),
                Ok(_) => {
                    warn!("Merge reconciliation returned no steps, folding in extracted steps");
                    None
                }
                Err(e) => {
                    warn!("Merge reconciliation malformed ({e}), folding in extracted steps");
                    None
                }
            },
            Err(e) => {
                warn!("Merge reconciliation unavailable ({e}), folding in extracted steps");
                None
            }
        };

        let pattern_id = existing.pattern_id;
        let mut patterns = self.patterns.write().await;
        let pattern = patterns
            .iter_mut()
            .find(|p| p.pattern_id == pattern_id)
            .ok_or_else(|| anyhow!("pattern {pattern_id} vanished during merge"))?;

        match reconciled {
            Some((plan, steps)) => {
                let steps = if prohibition {
                    steps
                } else {
                    filter_safe_steps(steps, critical_ids)
                };
                if let Some(name) = plan.extra_str("display_name") {
                    pattern.display_name = name.to_string();
                }
                pattern.description = plan
                    .extra_str("description")
                    .map(str::to_string)
                    .unwrap_or(description);
                pattern.action_sequence = steps;
            }
            None => {
                pattern.description = description;
                // Union: a refinement of an existing step updates it in
                // place, a new step extends the sequence.
                for step in extracted {
                    match pattern
                        .action_sequence
                        .iter_mut()
                        .find(|s| s.device_id == step.device_id && s.action == step.action)
                    {
                        Some(current) => {
                            current.parameters = step.parameters;
                            current.delay_seconds = step.delay_seconds;
                        }
                        None => pattern.action_sequence.push(step),
                    }
                }
            }
        }
        pattern.source_utterance = format!("{} | {}", pattern.source_utterance, utterance);
        pattern.frequency += 1;
        pattern.last_occurrence = Utc::now();

        let updated = pattern.clone();
        drop(patterns);

        self.store.save(&updated)?;
        info!("Refined pattern '{}' ({})", updated.display_name, updated.pattern_id);
        self.sink.broadcast(
            topics::PATTERN_UPDATED,
            json!({"pattern_id": updated.pattern_id, "name": updated.display_name}),
        );
        Ok(updated)
    }

    /// Record one observed action for statistical detection.
    pub async fn observe(
        &self,
        device_id: &str,
        action: &str,
        parameters: &Map<String, Value>,
        context: Trigger,
    ) {
        self.observations.write().await.push(Observation {
            device_id: device_id.to_string(),
            action: action.to_string(),
            parameters: parameters.clone(),
            context,
            timestamp: Utc::now(),
        });
    }

    /// Run statistical detection over accumulated observations. Repeated
    /// multi-action sequences in the same context become routines;
    /// repeated single actions become preferences. Re-detections of a
    /// known pattern bump its frequency and confidence instead of
    /// creating a twin.
    pub async fn detect(&self) -> Vec<Pattern> {
        let observations = self.observations.read().await.clone();
        let candidates = detect_candidates(&observations);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut changed = Vec::new();
        let mut patterns = self.patterns.write().await;
        for candidate in candidates {
            if let Some(existing) = patterns
                .iter_mut()
                .find(|p| p.trigger == candidate.trigger && same_actions(p, &candidate))
            {
                existing.frequency = candidate.frequency.max(existing.frequency);
                existing.confidence = candidate.confidence.max(existing.confidence);
                existing.last_occurrence = Utc::now();
                changed.push(existing.clone());
            } else {
                info!(
                    "Detected candidate pattern '{}' (freq {}, conf {:.2})",
                    candidate.display_name, candidate.frequency, candidate.confidence
                );
                patterns.push(candidate.clone());
                changed.push(candidate);
            }
        }
        drop(patterns);

        for pattern in &changed {
            if let Err(e) = self.store.save(pattern) {
                warn!("Failed to persist detected pattern {}: {e:#}", pattern.pattern_id);
            }
            if pattern.is_ready_to_suggest() && !pattern.approved {
                self.sink.broadcast(
                    topics::PATTERN_SUGGESTION,
                    json!({
                        "pattern_id": pattern.pattern_id,
                        "name": pattern.display_name,
                        "description": pattern.description,
                        "frequency": pattern.frequency,
                        "confidence": pattern.confidence,
                    }),
                );
            }
        }
        changed
    }

    pub async fn approve(&self, pattern_id: &str) -> Result<Pattern> {
        let mut patterns = self.patterns.write().await;
        let pattern = patterns
            .iter_mut()
            .find(|p| p.pattern_id == pattern_id)
            .ok_or_else(|| anyhow!("no pattern with id {pattern_id}"))?;
        pattern.approved = true;
        let approved = pattern.clone();
        drop(patterns);

        self.store.save(&approved)?;
        self.sink.broadcast(
            topics::PATTERN_APPROVED,
            json!({"pattern_id": approved.pattern_id}),
        );
        Ok(approved)
    }

    pub async fn dismiss(&self, pattern_id: &str) -> Result<()> {
        let mut patterns = self.patterns.write().await;
        let before = patterns.len();
        patterns.retain(|p| p.pattern_id != pattern_id);
        if patterns.len() == before {
            return Err(anyhow!("no pattern with id {pattern_id}"));
        }
        drop(patterns);

        self.store.delete(pattern_id)?;
        self.sink.broadcast(topics::PATTERN_DISMISSED, json!({"pattern_id": pattern_id}));
        Ok(())
    }
}

/// Drop automation steps that would power off a critical device.
fn filter_safe_steps(steps: Vec<PatternAction>, critical_ids: &[String]) -> Vec<PatternAction> {
    steps
        .into_iter()
        .filter(|step| {
            let unsafe_step = crate::constraints::is_power_off(&step.action)
                && critical_ids.contains(&step.device_id);
            if unsafe_step {
                warn!("Dropping unsafe taught step {}.{}", step.device_id, step.action);
            }
            !unsafe_step
        })
        .collect()
}

fn short_hash(input: &str) -> String {
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:04}", hasher.finish() % 10_000)
}

fn same_actions(pattern: &Pattern, candidate: &Pattern) -> bool {
    pattern.action_sequence.len() == candidate.action_sequence.len()
        && pattern
            .action_sequence
            .iter()
            .zip(&candidate.action_sequence)
            .all(|(a, b)| a.device_id == b.device_id && a.action == b.action)
}

/// Pure detection over an observation log.
fn detect_candidates(observations: &[Observation]) -> Vec<Pattern> {
    let mut by_context: HashMap<Trigger, Vec<&Observation>> = HashMap::new();
    for obs in observations {
        by_context.entry(obs.context.clone()).or_default().push(obs);
    }

    let mut candidates = Vec::new();
    for (trigger, group) in by_context {
        // Split the context's observations into time-gapped sequences.
        let mut sequences: Vec<Vec<&Observation>> = Vec::new();
        for obs in group {
            let continues = sequences.last().and_then(|seq| seq.last()).is_some_and(|prev| {
                obs.timestamp - prev.timestamp < Duration::seconds(SEQUENCE_GAP_SECS)
            });
            if continues {
                sequences.last_mut().unwrap().push(obs);
            } else {
                sequences.push(vec![obs]);
            }
        }

        // Repeated multi-step sequences become routines.
        let mut seq_counts: HashMap<Vec<(String, String)>, (usize, Vec<&Observation>)> =
            HashMap::new();
        for seq in &sequences {
            if seq.len() < ROUTINE_MIN_SEQUENCE_LEN {
                continue;
            }
            let key: Vec<(String, String)> = seq
                .iter()
                .map(|o| (o.device_id.clone(), o.action.clone()))
                .collect();
            let entry = seq_counts.entry(key).or_insert((0, seq.clone()));
            entry.0 += 1;
        }
        for (key, (count, sample)) in seq_counts {
            if count < 2 {
                continue;
            }
            candidates.push(candidate_pattern(
                PatternType::Routine,
                trigger.clone(),
                &key,
                sample.iter().map(|o| o.parameters.clone()).collect(),
                count as u32,
            ));
        }

        // Repeated single actions become preferences.
        let mut action_counts: HashMap<(String, String), (usize, Map<String, Value>)> =
            HashMap::new();
        for seq in &sequences {
            if seq.len() != 1 {
                continue;
            }
            let obs = seq[0];
            let entry = action_counts
                .entry((obs.device_id.clone(), obs.action.clone()))
                .or_insert((0, obs.parameters.clone()));
            entry.0 += 1;
            // Most recent parameters win.
            entry.1 = obs.parameters.clone();
        }
        for ((device_id, action), (count, parameters)) in action_counts {
            if count < PREFERENCE_MIN_OCCURRENCES {
                continue;
            }
            candidates.push(candidate_pattern(
                PatternType::Preference,
                trigger.clone(),
                &[(device_id, action)],
                vec![parameters],
                count as u32,
            ));
        }
    }
    candidates
}

fn candidate_pattern(
    pattern_type: PatternType,
    trigger: Trigger,
    steps: &[(String, String)],
    parameters: Vec<Map<String, Value>>,
    frequency: u32,
) -> Pattern {
    let prefix = match pattern_type {
        PatternType::Routine => "routine",
        _ => "pref",
    };
    let key: String = steps
        .iter()
        .map(|(d, a)| format!("{d}.{a}"))
        .collect::<Vec<_>>()
        .join(",");
    let action_sequence = steps
        .iter()
        .zip(parameters)
        .map(|((device_id, action), params)| PatternAction {
            device_id: device_id.clone(),
            action: action.clone(),
            parameters: params,
            delay_seconds: 0.0,
        })
        .collect();
    let description = format!(
        "When {}={}, you usually: {}",
        trigger.kind.as_str(),
        trigger.value,
        key,
    );

    Pattern {
        pattern_id: format!("{prefix}_{}", short_hash(&format!("{trigger:?}{key}"))),
        pattern_type,
        display_name: format!("{} near {}", key, trigger.value),
        description,
        trigger,
        action_sequence,
        // Grows with repetition, saturating at 1.
        confidence: (frequency as f64 / 5.0).min(1.0),
        frequency,
        approved: false,
        source_utterance: String::new(),
        created_at: Utc::now(),
        last_occurrence: Utc::now(),
    }
}
