// MIT License - Copyright (c) 2026 Peter Wright
// Human-readable log line of the latest event

use crate::entities::{EntityKind, SiaEntity};
use crate::event::DecodedEvent;

const NO_LOGS: &str = "No logs";

/// Automatic test reports are not logged.
const SKIPPED_CODES: &[&str] = &["RP"];

/// Latest event of one zone as a line such as
/// `OP - Opening Report (User: John)`.
#[derive(Debug, Clone)]
pub struct TextLogEntity {
    account: String,
    zone: u32,
    line: Option<String>,
}

/// Text between the first pair of single quotes, if non-empty.
fn actor(message: &str) -> Option<&str> {
    let (_, rest) = message.split_once('\'')?;
    let (actor, _) = rest.split_once('\'')?;
    (!actor.is_empty()).then_some(actor)
}

/// Build the log line for an event.
pub fn format_entry(event: &DecodedEvent) -> String {
    let description = event.description().unwrap_or("Unknown event");
    let mut entry = format!("{} - {}", event.code, description);

    if let Some(actor) = event.message.as_deref().and_then(actor) {
        let what = event
            .concerns()
            .filter(|c| *c != "Unused")
            .and_then(|c| c.split_whitespace().next());
        match what {
            Some(what) => entry.push_str(&format!(" ({}: {})", what, actor)),
            None => entry.push_str(&format!(" ({})", actor)),
        }
    }
    entry
}

impl TextLogEntity {
    pub fn new(account: impl Into<String>, zone: u32) -> Self {
        Self {
            account: account.into(),
            zone,
            line: None,
        }
    }
}

impl SiaEntity for TextLogEntity {
    fn kind(&self) -> EntityKind {
        EntityKind::Log
    }

    fn account(&self) -> &str {
        &self.account
    }

    fn zone(&self) -> u32 {
        self.zone
    }

    fn handle_last_state(&mut self, last_state: Option<&str>) {
        if let Some(state) = last_state {
            self.line = Some(state.to_string());
        }
    }

    fn update_state(&mut self, event: &DecodedEvent) -> bool {
        if SKIPPED_CODES.contains(&event.code.as_str()) {
            return false;
        }
        self.line = Some(format_entry(event));
        true
    }

    fn state(&self) -> String {
        self.line.clone().unwrap_or_else(|| NO_LOGS.to_string())
    }

    fn available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::event;

    #[test]
    fn test_default_state() {
        assert_eq!(TextLogEntity::new("1234", 0).state(), "No logs");
    }

    #[test]
    fn test_entry_with_actor() {
        let mut log = TextLogEntity::new("1234", 1);
        assert!(log.update_state(&event("OP", 1, Some("Disarmed by 'John'"))));
        assert_eq!(log.state(), "OP - Opening Report (User: John)");
    }

    #[test]
    fn test_entry_without_actor() {
        assert_eq!(format_entry(&event("BA", 1, None)), "BA - Burglary Alarm");
        assert_eq!(
            format_entry(&event("BA", 1, Some("no quotes here"))),
            "BA - Burglary Alarm"
        );
        assert_eq!(format_entry(&event("BA", 1, Some("''"))), "BA - Burglary Alarm");
    }

    #[test]
    fn test_unused_concerns_keeps_actor_only() {
        assert_eq!(
            format_entry(&event("YT", 0, Some("'Panel'"))),
            "YT - System Battery Trouble (Panel)"
        );
    }

    #[test]
    fn test_automatic_test_skipped() {
        let mut log = TextLogEntity::new("1234", 0);
        assert!(!log.update_state(&event("RP", 0, None)));
        assert_eq!(log.state(), "No logs");
    }

    #[test]
    fn test_handle_last_state() {
        let mut log = TextLogEntity::new("1234", 0);
        log.handle_last_state(Some("CA - Automatic Closing"));
        assert_eq!(log.state(), "CA - Automatic Closing");
    }
}
