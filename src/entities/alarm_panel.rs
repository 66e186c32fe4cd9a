// MIT License - Copyright (c) 2026 Peter Wright
// Alarm panel state tracked from SIA codes

use std::str::FromStr;

use tracing::debug;

use crate::entities::{EntityKind, SiaEntity};
use crate::event::DecodedEvent;

/// State of an alarm panel zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmState {
    Disarmed,
    ArmedHome,
    ArmedAway,
    ArmedNight,
    ArmedCustomBypass,
    Triggered,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::ArmedHome => "armed_home",
            Self::ArmedAway => "armed_away",
            Self::ArmedNight => "armed_night",
            Self::ArmedCustomBypass => "armed_custom_bypass",
            Self::Triggered => "triggered",
        }
    }
}

impl FromStr for AlarmState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disarmed" => Ok(Self::Disarmed),
            "armed_home" => Ok(Self::ArmedHome),
            "armed_away" => Ok(Self::ArmedAway),
            "armed_night" => Ok(Self::ArmedNight),
            "armed_custom_bypass" => Ok(Self::ArmedCustomBypass),
            "triggered" => Ok(Self::Triggered),
            _ => Err(()),
        }
    }
}

/// What an event code does to the panel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consequence {
    Set(AlarmState),
    /// Return to the state held before the alarm.
    Previous,
}

fn consequence(code: &str) -> Option<Consequence> {
    use AlarmState::*;
    use Consequence::*;
    let consequence = match code {
        "PA" | "JA" | "TA" | "BA" => Set(Triggered),
        "CA" | "CB" | "CL" | "CP" | "CQ" | "CS" => Set(ArmedAway),
        "CG" => Set(ArmedHome),
        "CF" | "NE" | "NF" => Set(ArmedCustomBypass),
        "NL" => Set(ArmedNight),
        "NP" | "NO" | "OA" | "OB" | "OG" | "OP" | "OQ" | "OR" | "OS" => Set(Disarmed),
        "BR" => Previous,
        _ => return None,
    };
    Some(consequence)
}

/// Alarm panel for one zone of an account.
///
/// `previous` holds the last state before the most recent change out of
/// a non-triggered state, so a burglary restore after any number of
/// alarms returns to the armed state the panel was in.
#[derive(Debug, Clone)]
pub struct AlarmPanelEntity {
    account: String,
    zone: u32,
    current: Option<AlarmState>,
    previous: Option<AlarmState>,
    available: bool,
}

impl AlarmPanelEntity {
    pub fn new(account: impl Into<String>, zone: u32) -> Self {
        Self {
            account: account.into(),
            zone,
            current: None,
            previous: None,
            available: true,
        }
    }

    pub fn current(&self) -> Option<AlarmState> {
        self.current
    }

    pub fn previous(&self) -> Option<AlarmState> {
        self.previous
    }

    fn transition(&mut self, next: AlarmState) {
        if self.current == Some(next) {
            return;
        }
        if self.current != Some(AlarmState::Triggered) {
            self.previous = self.current;
        }
        self.current = Some(next);
    }
}

impl SiaEntity for AlarmPanelEntity {
    fn kind(&self) -> EntityKind {
        EntityKind::Alarm
    }

    fn account(&self) -> &str {
        &self.account
    }

    fn zone(&self) -> u32 {
        self.zone
    }

    fn handle_last_state(&mut self, last_state: Option<&str>) {
        match last_state {
            Some("unavailable") => self.available = false,
            Some(state) => self.current = state.parse().ok(),
            None => {}
        }
    }

    fn update_state(&mut self, event: &DecodedEvent) -> bool {
        let next = match consequence(event.code.as_str()) {
            Some(Consequence::Set(state)) => state,
            Some(Consequence::Previous) => match self.previous.or(self.current) {
                Some(state) => state,
                None => return true,
            },
            None => return false,
        };
        debug!(
            "Account {} zone {}: {} -> {} (previous {:?})",
            self.account,
            self.zone,
            self.state(),
            next.as_str(),
            self.previous
        );
        self.transition(next);
        self.available = true;
        true
    }

    fn state(&self) -> String {
        self.current
            .map_or("unknown", |state| state.as_str())
            .to_string()
    }

    fn available(&self) -> bool {
        self.available
    }
}
