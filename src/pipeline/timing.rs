//! Sample-interval gate for decode requests

use std::time::{Duration, Instant};

/// Gate deciding whether a tick should issue a new decode request
#[derive(Debug, Clone, Copy)]
pub struct TimingRef {
    last_sample: Instant,
    interval: Duration,
}

impl TimingRef {
    pub fn new(interval: Duration, started: Instant) -> Self {
        Self {
            last_sample: started,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_sample(&self) -> Instant {
        self.last_sample
    }

    /// True when strictly more than `interval` has passed since the last
    /// sample; records `now` as the new sample time in that case.
    pub fn should_sample(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_sample) > self.interval {
            self.last_sample = now;
            true
        } else {
            false
        }
    }
}
