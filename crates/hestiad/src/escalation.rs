//! Escalation: alerts, spoken phrasing, and permission requests.
//!
//! An alert either informs or asks. Asking parks the caller on a
//! one-shot channel until the resident answers or sixty seconds pass;
//! timeout counts as denial. The answer channel is taken out of the
//! pending table on first resolution, so a permission is granted at most
//! once and a late or duplicate answer is rejected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use hestia_common::events::topics;
use hestia_common::{HomeMode, ThreatAssessment, ThreatLevel};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notify::NotificationSink;
use crate::planner::{Planner, PromptContext};
use crate::prompts;

#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub message: String,
    pub requires_approval: bool,
    pub threat: Option<ThreatAssessment>,
}

impl AlertRequest {
    pub fn inform(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requires_approval: false,
            threat: None,
        }
    }

    pub fn ask(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requires_approval: true,
            threat: None,
        }
    }

    pub fn with_threat(mut self, threat: ThreatAssessment) -> Self {
        self.threat = Some(threat);
        self
    }
}

#[derive(Debug, Clone)]
pub struct AlertOutcome {
    pub alert_id: String,
    pub approved: bool,
    pub timed_out: bool,
    pub audio_suppressed: bool,
}

#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub alert_id: String,
    pub message: String,
    pub requires_approval: bool,
    pub approved: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

pub struct Escalator {
    planner: Arc<dyn Planner>,
    sink: Arc<dyn NotificationSink>,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    history: Mutex<Vec<AlertRecord>>,
    quiet_mode: Mutex<HomeMode>,
    timeout: Duration,
}

impl Escalator {
    pub fn new(
        planner: Arc<dyn Planner>,
        sink: Arc<dyn NotificationSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            planner,
            sink,
            pending: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            quiet_mode: Mutex::new(HomeMode::Normal),
            timeout,
        }
    }

    /// Mode changes feed the audio suppression decision.
    pub fn set_mode(&self, mode: HomeMode) {
        *self.quiet_mode.lock().unwrap() = mode;
    }

    /// Raise an alert. Returns once the alert is answered, times out,
    /// or (for informational alerts) immediately after broadcast.
    pub async fn alert(&self, request: AlertRequest) -> AlertOutcome {
        let alert_id = Uuid::new_v4().to_string();
        let voice = self.phrase(&request).await;

        // Permission requests and serious threats always speak; quiet
        // modes only mute routine announcements.
        let is_critical = request.requires_approval
            || request
                .threat
                .as_ref()
                .map(|t| matches!(t.level, ThreatLevel::High | ThreatLevel::Critical))
                .unwrap_or(false);
        let audio_suppressed = self.quiet_mode.lock().unwrap().is_quiet() && !is_critical;

        self.history.lock().unwrap().push(AlertRecord {
            alert_id: alert_id.clone(),
            message: request.message.clone(),
            requires_approval: request.requires_approval,
            approved: None,
            timestamp: Utc::now(),
        });

        self.sink.broadcast(
            topics::ALERT,
            json!({
                "alert_id": alert_id,
                "message": request.message,
                "voice": voice,
                "requires_approval": request.requires_approval,
                "audio_suppressed": audio_suppressed,
                "threat": request.threat.as_ref().map(|t| t.dedup_key()),
            }),
        );

        // Nothing to wait for; an announcement never blocks its caller.
        if !request.requires_approval {
            return AlertOutcome {
                alert_id,
                approved: true,
                timed_out: false,
                audio_suppressed,
            };
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(alert_id.clone(), tx);
        info!("Awaiting permission for alert {alert_id}");

        let (approved, timed_out) = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(approved)) => (approved, false),
            // Sender dropped without an answer; treat as denial.
            Ok(Err(_)) => (false, false),
            Err(_) => {
                self.pending.lock().unwrap().remove(&alert_id);
                warn!("Permission request {alert_id} timed out, treating as denied");
                self.sink
                    .broadcast(topics::ALERT_TIMEOUT, json!({"alert_id": alert_id}));
                (false, true)
            }
        };

        if let Some(record) = self
            .history
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.alert_id == alert_id)
        {
            record.approved = Some(approved);
        }

        AlertOutcome {
            alert_id,
            approved,
            timed_out,
            audio_suppressed,
        }
    }

    /// Deliver the resident's answer to a pending alert. Fails when the
    /// alert is unknown, already answered, or timed out.
    pub fn resolve(&self, alert_id: &str, approved: bool) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .unwrap()
            .remove(alert_id)
            .ok_or_else(|| anyhow!("no pending alert {alert_id}"))?;
        sender
            .send(approved)
            .map_err(|_| anyhow!("alert {alert_id} is no longer waiting"))?;
        self.sink.broadcast(
            topics::ALERT_RESPONSE,
            json!({"alert_id": alert_id, "approved": approved}),
        );
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn history(&self) -> Vec<AlertRecord> {
        self.history.lock().unwrap().clone()
    }

    /// Spoken phrasing, via the planner with a scripted fallback.
    async fn phrase(&self, request: &AlertRequest) -> String {
        let ctx = PromptContext::new(prompts::voice_phrasing(
            &request.message,
            request.requires_approval,
        ));
        match self.planner.compose_text(ctx).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Voice phrasing unavailable ({e}), using scripted template");
                if request.requires_approval {
                    format!(
                        "Hey, I wanted to check with you. {} Should I go ahead with that?",
                        request.message
                    )
                } else {
                    format!("Hey, I wanted to let you know. {}", request.message)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingSink;
    use crate::planner::{FakePlanner, UnavailablePlanner};

    fn escalator(planner: Arc<dyn Planner>) -> (Arc<RecordingSink>, Arc<Escalator>) {
        let sink = Arc::new(RecordingSink::new());
        let escalator = Arc::new(Escalator::new(planner, sink.clone(), Duration::from_secs(60)));
        (sink, escalator)
    }

    #[tokio::test]
    async fn informational_alert_returns_immediately() {
        let (sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        let outcome = escalator.alert(AlertRequest::inform("Storm expected tonight")).await;
        assert!(outcome.approved);
        assert!(!outcome.timed_out);
        assert_eq!(sink.count(topics::ALERT), 1);
        assert_eq!(escalator.pending_count(), 0);
    }

    #[tokio::test]
    async fn approval_resolves_waiting_alert() {
        let (sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        let waiting = {
            let escalator = escalator.clone();
            tokio::spawn(async move { escalator.alert(AlertRequest::ask("Pre-cool the house?")).await })
        };

        // Wait until the alert is registered before answering.
        while escalator.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        let alert_id = sink.events()[0].1["alert_id"].as_str().unwrap().to_string();
        escalator.resolve(&alert_id, true).unwrap();

        let outcome = waiting.await.unwrap();
        assert!(outcome.approved);
        assert!(!outcome.timed_out);
        assert_eq!(sink.count(topics::ALERT_RESPONSE), 1);
        let history = escalator.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].approved, Some(true));
    }

    #[tokio::test]
    async fn second_answer_is_rejected() {
        let (sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        let waiting = {
            let escalator = escalator.clone();
            tokio::spawn(async move { escalator.alert(AlertRequest::ask("Shed load?")).await })
        };
        while escalator.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        let alert_id = sink.events()[0].1["alert_id"].as_str().unwrap().to_string();

        escalator.resolve(&alert_id, false).unwrap();
        assert!(escalator.resolve(&alert_id, true).is_err());

        let outcome = waiting.await.unwrap();
        assert!(!outcome.approved);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_denial_and_clears_pending() {
        let (sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        let outcome = escalator.alert(AlertRequest::ask("Boost the water heater?")).await;

        assert!(!outcome.approved);
        assert!(outcome.timed_out);
        assert_eq!(escalator.pending_count(), 0);
        assert_eq!(sink.count(topics::ALERT_TIMEOUT), 1);
        assert!(escalator.resolve(&outcome.alert_id, true).is_err());
    }

    #[tokio::test]
    async fn quiet_mode_suppresses_audio_for_noncritical() {
        let (sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        escalator.set_mode(HomeMode::Focus);
        let outcome = escalator.alert(AlertRequest::inform("Pattern suggestion ready")).await;
        assert!(outcome.audio_suppressed);
        assert_eq!(sink.events()[0].1["audio_suppressed"], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn permission_requests_stay_audible_under_dnd() {
        let (sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        escalator.set_mode(HomeMode::DoNotDisturb);
        let outcome = escalator.alert(AlertRequest::ask("Unlock the door for the sitter?")).await;
        assert!(!outcome.audio_suppressed);
        assert_eq!(sink.events()[0].1["audio_suppressed"], json!(false));
    }

    #[tokio::test]
    async fn high_threat_alert_stays_audible_under_quiet_mode() {
        use hestia_common::ThreatKind;
        let (_sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        escalator.set_mode(HomeMode::Focus);
        let threat = ThreatAssessment {
            level: ThreatLevel::High,
            kind: ThreatKind::GridStrain,
            urgency: 0.8,
            summary: "Grid strain rising".to_string(),
            reasoning: String::new(),
            recommended_actions: vec![],
            timestamp: Utc::now(),
        };
        let outcome = escalator
            .alert(AlertRequest::inform("Grid strain detected").with_threat(threat))
            .await;
        assert!(!outcome.audio_suppressed);
    }

    #[tokio::test]
    async fn critical_threat_overrides_quiet_mode() {
        use hestia_common::{ThreatKind};
        let (_sink, escalator) = escalator(Arc::new(UnavailablePlanner));
        escalator.set_mode(HomeMode::DoNotDisturb);
        let threat = ThreatAssessment {
            level: ThreatLevel::Critical,
            kind: ThreatKind::PowerOutage,
            urgency: 1.0,
            summary: "Grid down".to_string(),
            reasoning: String::new(),
            recommended_actions: vec![],
            timestamp: Utc::now(),
        };
        let outcome = escalator
            .alert(AlertRequest::inform("Power outage detected").with_threat(threat))
            .await;
        assert!(!outcome.audio_suppressed);
    }

    #[tokio::test]
    async fn scripted_fallback_asks_for_permission() {
        let planner = Arc::new(FakePlanner::new());
        // Empty script: compose_text fails, template kicks in.
        let (sink, escalator) = escalator(planner);
        escalator.alert(AlertRequest::inform("Heat wave tomorrow")).await;
        let voice = sink.events()[0].1["voice"].as_str().unwrap().to_string();
        assert!(voice.contains("Heat wave tomorrow"));
        assert!(!voice.contains("go ahead"));
    }
}
