//! Notification bus - fan-out of orchestrator events to observers.
//!
//! Every executed action, mode transition, alert, and pattern change is
//! broadcast exactly once. Delivery is best-effort: an event with no
//! subscribers is dropped silently.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Sink consumed by every component that emits observable events.
pub trait NotificationSink: Send + Sync {
    fn broadcast(&self, event_type: &str, payload: Value);
}

#[derive(Debug, Clone)]
pub struct BusEvent {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast-channel backed bus. Cloneable handles; subscribers receive
/// every event published after they subscribe.
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for EventBus {
    fn broadcast(&self, event_type: &str, payload: Value) {
        let event = BusEvent {
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        // Err means no live subscribers, which is fine.
        if self.tx.send(event).is_err() {
            debug!("No subscribers for event '{event_type}'");
        }
    }
}

/// Sink that records events in memory. Exposed for tests that assert on
/// broadcast traffic.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }
}

impl NotificationSink for RecordingSink {
    fn broadcast(&self, event_type: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event_type.to_string(), payload));
    }
}
