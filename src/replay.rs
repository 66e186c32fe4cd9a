// MIT License - Copyright (c) 2026 Peter Wright
// Per-account replay protection

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::{DEFAULT_SKEW_FUTURE, DEFAULT_SKEW_PAST, SEQUENCE_RING};
use crate::error::ReplayReason;

/// How far a panel timestamp may drift from the receiver clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSkew {
    /// Maximum age of a message.
    pub past: Duration,
    /// Maximum lead of the panel clock.
    pub future: Duration,
}

impl Default for ClockSkew {
    fn default() -> Self {
        Self {
            past: DEFAULT_SKEW_PAST,
            future: DEFAULT_SKEW_FUTURE,
        }
    }
}

impl ClockSkew {
    pub fn new(past: Duration, future: Duration) -> Self {
        Self { past, future }
    }

    /// Same tolerance in both directions.
    pub fn symmetric(window: Duration) -> Self {
        Self::new(window, window)
    }

    pub fn contains(&self, panel_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let delta = now.signed_duration_since(panel_time);
        match delta.to_std() {
            Ok(age) => age <= self.past,
            Err(_) => (-delta)
                .to_std()
                .map(|lead| lead <= self.future)
                .unwrap_or(false),
        }
    }
}

/// Forward distance from `last` to `seq` on the sequence ring.
fn forward_distance(last: u16, seq: u16) -> u32 {
    (seq as i64 - last as i64).rem_euclid(SEQUENCE_RING as i64) as u32
}

/// Last accepted sequence number and timestamp of one account.
///
/// A sequence number is accepted when it lies in the forward half of the
/// ring relative to the last accepted one, so 9999 → 0001 wraps cleanly
/// while a repeat or anything behind it is refused.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    last_sequence: Option<u16>,
    last_timestamp: Option<DateTime<Utc>>,
    accepted: u64,
    rejected: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sequence(&self) -> Option<u16> {
        self.last_sequence
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Validate a message against the window without updating it.
    pub fn check(
        &self,
        sequence: u16,
        panel_time: Option<DateTime<Utc>>,
        require_timestamp: bool,
        skew: &ClockSkew,
        now: DateTime<Utc>,
    ) -> Result<(), ReplayReason> {
        match panel_time {
            Some(ts) if !skew.contains(ts, now) => return Err(ReplayReason::ClockSkew),
            None if require_timestamp => return Err(ReplayReason::MissingTimestamp),
            _ => {}
        }

        if let Some(last) = self.last_sequence {
            let distance = forward_distance(last, sequence);
            if distance == 0 {
                return Err(ReplayReason::Duplicate);
            }
            if distance > SEQUENCE_RING / 2 {
                return Err(ReplayReason::Stale);
            }
        }
        Ok(())
    }

    /// Record an accepted message.
    pub fn accept(&mut self, sequence: u16, panel_time: Option<DateTime<Utc>>) {
        self.last_sequence = Some(sequence);
        if panel_time.is_some() {
            self.last_timestamp = panel_time;
        }
        self.accepted += 1;
    }

    /// Check and, on success, record in one step.
    pub fn admit(
        &mut self,
        sequence: u16,
        panel_time: Option<DateTime<Utc>>,
        require_timestamp: bool,
        skew: &ClockSkew,
        now: DateTime<Utc>,
    ) -> Result<(), ReplayReason> {
        match self.check(sequence, panel_time, require_timestamp, skew, now) {
            Ok(()) => {
                self.accept(sequence, panel_time);
                Ok(())
            }
            Err(reason) => {
                self.rejected += 1;
                Err(reason)
            }
        }
    }

    /// Forget the last accepted sequence number (e.g. after a panel reboot
    /// restarted its numbering).
    pub fn reset(&mut self) {
        self.last_sequence = None;
        self.last_timestamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_clock_skew_window() {
        let skew = ClockSkew::default();
        let now = now();
        assert!(skew.contains(now, now));
        assert!(skew.contains(now - chrono::Duration::seconds(40), now));
        assert!(!skew.contains(now - chrono::Duration::seconds(41), now));
        assert!(skew.contains(now + chrono::Duration::seconds(20), now));
        assert!(!skew.contains(now + chrono::Duration::seconds(21), now));

        let wide = ClockSkew::symmetric(Duration::from_secs(300));
        assert!(wide.contains(now + chrono::Duration::seconds(299), now));
    }

    #[test]
    fn test_first_message_accepted() {
        let mut window = ReplayWindow::new();
        assert!(window.admit(17, None, false, &ClockSkew::default(), now()).is_ok());
        assert_eq!(window.last_sequence(), Some(17));
        assert_eq!(window.accepted(), 1);
    }

    #[test]
    fn test_duplicate_and_stale() {
        let skew = ClockSkew::default();
        let mut window = ReplayWindow::new();
        window.admit(100, None, false, &skew, now()).unwrap();
        assert_eq!(
            window.admit(100, None, false, &skew, now()),
            Err(ReplayReason::Duplicate)
        );
        assert_eq!(
            window.admit(99, None, false, &skew, now()),
            Err(ReplayReason::Stale)
        );
        assert!(window.admit(101, None, false, &skew, now()).is_ok());
        assert_eq!(window.rejected(), 2);
    }

    #[test]
    fn test_sequence_wraps() {
        let skew = ClockSkew::default();
        let mut window = ReplayWindow::new();
        window.admit(9999, None, false, &skew, now()).unwrap();
        assert!(window.admit(1, None, false, &skew, now()).is_ok());
        assert_eq!(
            window.admit(9998, None, false, &skew, now()),
            Err(ReplayReason::Stale)
        );
    }

    #[test]
    fn test_timestamp_rules() {
        let skew = ClockSkew::default();
        let mut window = ReplayWindow::new();
        assert_eq!(
            window.admit(1, None, true, &skew, now()),
            Err(ReplayReason::MissingTimestamp)
        );
        assert_eq!(
            window.admit(1, Some(now() - chrono::Duration::minutes(5)), true, &skew, now()),
            Err(ReplayReason::ClockSkew)
        );
        assert!(window.admit(1, Some(now()), true, &skew, now()).is_ok());
        assert_eq!(window.last_timestamp(), Some(now()));
    }

    #[test]
    fn test_reset() {
        let skew = ClockSkew::default();
        let mut window = ReplayWindow::new();
        window.admit(500, None, false, &skew, now()).unwrap();
        window.reset();
        assert!(window.admit(1, None, false, &skew, now()).is_ok());
    }

    proptest! {
        #[test]
        fn fresh_window_accepts_exactly_once(seq in 0u16..10_000) {
            let skew = ClockSkew::default();
            let mut window = ReplayWindow::new();
            prop_assert!(window.admit(seq, Some(now()), true, &skew, now()).is_ok());
            prop_assert_eq!(
                window.admit(seq, Some(now()), true, &skew, now()),
                Err(ReplayReason::Duplicate)
            );
        }

        #[test]
        fn same_sequence_twice_accepts_once(
            start in 0u16..10_000,
            seq in 0u16..10_000,
        ) {
            let skew = ClockSkew::default();
            let mut window = ReplayWindow::new();
            window.admit(start, None, false, &skew, now()).unwrap();
            let first = window.admit(seq, None, false, &skew, now());
            let second = window.admit(seq, None, false, &skew, now());
            if first.is_ok() {
                prop_assert_eq!(second, Err(ReplayReason::Duplicate));
            } else {
                prop_assert!(second.is_err());
            }
        }
    }
}
