//! External context feeding the monitoring loop: the latest threat
//! assessment, the calendar's suggested mode, and the resident's
//! location. Sources push updates in; the orchestrator polls on its
//! monitoring interval.

use std::sync::Mutex;

use hestia_common::{HomeMode, ThreatAssessment};

#[derive(Debug, Clone, Default)]
pub struct CalendarContext {
    pub suggested_mode: Option<HomeMode>,
    pub current_event: Option<String>,
}

pub trait ContextSource: Send + Sync {
    fn latest_threat(&self) -> Option<ThreatAssessment>;
    fn calendar(&self) -> CalendarContext;
    fn location(&self) -> Option<String>;
}

/// Context holder updated by feeds (weather poller, calendar sync,
/// presence events) and read by the orchestrator.
#[derive(Default)]
pub struct SharedContext {
    threat: Mutex<Option<ThreatAssessment>>,
    calendar: Mutex<CalendarContext>,
    location: Mutex<Option<String>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_threat(&self, threat: Option<ThreatAssessment>) {
        *self.threat.lock().unwrap() = threat;
    }

    pub fn set_calendar(&self, calendar: CalendarContext) {
        *self.calendar.lock().unwrap() = calendar;
    }

    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.lock().unwrap() = Some(location.into());
    }
}

impl ContextSource for SharedContext {
    fn latest_threat(&self) -> Option<ThreatAssessment> {
        self.threat.lock().unwrap().clone()
    }

    fn calendar(&self) -> CalendarContext {
        self.calendar.lock().unwrap().clone()
    }

    fn location(&self) -> Option<String> {
        self.location.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let ctx = SharedContext::new();
        assert!(ctx.latest_threat().is_none());
        assert!(ctx.location().is_none());
        assert!(ctx.calendar().suggested_mode.is_none());
    }

    #[test]
    fn updates_are_visible() {
        let ctx = SharedContext::new();
        ctx.set_location("home");
        ctx.set_calendar(CalendarContext {
            suggested_mode: Some(HomeMode::Focus),
            current_event: Some("Deep work".to_string()),
        });
        assert_eq!(ctx.location().as_deref(), Some("home"));
        assert_eq!(ctx.calendar().suggested_mode, Some(HomeMode::Focus));
    }
}
