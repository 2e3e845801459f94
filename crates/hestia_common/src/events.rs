//! Decision history: a bounded, append-only ring used both as the audit
//! trail and as the threat de-duplication window.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event names used on the notification bus.
pub mod topics {
    pub const DEVICE_STATE: &str = "device_state";
    pub const ORCHESTRATOR_ACTION: &str = "orchestrator_action";
    pub const HOME_MODE_CHANGE: &str = "home_mode_change";
    pub const ALERT: &str = "alert";
    pub const ALERT_RESPONSE: &str = "alert_response";
    pub const ALERT_TIMEOUT: &str = "alert_timeout";
    pub const PATTERN_LEARNED: &str = "pattern_learned";
    pub const PATTERN_UPDATED: &str = "pattern_updated";
    pub const PATTERN_APPROVED: &str = "pattern_approved";
    pub const PATTERN_DISMISSED: &str = "pattern_dismissed";
    pub const PATTERN_SUGGESTION: &str = "pattern_suggestion";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// De-dup key: `<threat_kind>_<level>`, `mode_<mode>`, `location_<loc>`,
    /// or `command` for user requests.
    pub key: String,
    pub description: String,
    pub executed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Ring of the most recent decisions. Capacity 50; the threat handler
/// only consults the newest 5 keys.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    records: VecDeque<DecisionRecord>,
    capacity: usize,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(50)
    }
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, key: impl Into<String>, description: impl Into<String>, executed: bool) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(DecisionRecord {
            key: key.into(),
            description: description.into(),
            executed,
            timestamp: Utc::now(),
        });
    }

    /// The newest `n` keys, most recent last.
    pub fn recent_keys(&self, n: usize) -> Vec<&str> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).map(|r| r.key.as_str()).collect()
    }

    pub fn contains_recent(&self, key: &str, window: usize) -> bool {
        self.recent_keys(window).contains(&key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecisionRecord> {
        self.records.iter()
    }
}
