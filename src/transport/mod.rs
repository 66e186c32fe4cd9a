// MIT License - Copyright (c) 2026 Peter Wright
// Network listeners feeding the pipeline

pub mod tcp;
pub mod udp;

use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::constants::{BAD_FRAME_LIMIT, BAD_FRAME_WINDOW};

/// Counts framing errors on one connection.
///
/// The count restarts when more than the window has passed since the
/// previous error.
#[derive(Debug, Clone)]
pub(crate) struct BadFrameCounter {
    count: u32,
    last_error: Option<Instant>,
    limit: u32,
    window: Duration,
}

impl Default for BadFrameCounter {
    fn default() -> Self {
        Self::new(BAD_FRAME_LIMIT, BAD_FRAME_WINDOW)
    }
}

impl BadFrameCounter {
    pub(crate) fn new(limit: u32, window: Duration) -> Self {
        Self {
            count: 0,
            last_error: None,
            limit,
            window,
        }
    }

    /// Record a framing error. Returns true once the limit is reached.
    pub(crate) fn record(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_error {
            if now.duration_since(last) > self.window {
                self.count = 0;
            }
        }

        self.count += 1;
        self.last_error = Some(now);

        if self.count >= self.limit {
            error!("Too many bad frames ({})", self.count);
            true
        } else {
            warn!("Bad frame (count: {})", self.count);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_reached_within_window() {
        let mut counter = BadFrameCounter::default();
        let start = Instant::now();
        for i in 0..9 {
            assert!(!counter.record(start + Duration::from_secs(i)));
        }
        assert!(counter.record(start + Duration::from_secs(9)));
    }

    #[test]
    fn test_window_resets_count() {
        let mut counter = BadFrameCounter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        assert!(!counter.record(start));
        assert!(!counter.record(start + Duration::from_secs(1)));
        assert!(!counter.record(start + Duration::from_secs(62)));
        assert!(!counter.record(start + Duration::from_secs(63)));
        assert!(counter.record(start + Duration::from_secs(64)));
    }
}
