//! Time source for RTMP timestamps
//!
//! RTMP timestamps are milliseconds relative to an arbitrary epoch chosen by
//! the sender. The publisher takes the time source as a seam so callers can
//! align RTMP timestamps with their capture pipeline.

use std::time::Instant;

/// Source of monotonic milliseconds used for RTMP timestamps.
///
/// Implementations must keep the returned value linear and non-decreasing for
/// the lifetime of a session.
pub trait Clock: Send + Sync {
    /// Current timestamp in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Default clock: milliseconds elapsed since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
