#![forbid(unsafe_code)]

//! Monotonic time sources.
//!
//! A session reads time only through its [`Clock`]. [`SystemClock`] is the
//! default; [`DeterministicClock`] lets tests and replays step time by hand.

use std::time::Duration;

/// Source of monotonic time since an arbitrary origin.
pub trait Clock {
    fn now_mono(&self) -> Duration;
}

/// Host-driven clock for tests and replays.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicClock {
    now: Duration,
}

impl DeterministicClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: Duration::ZERO,
        }
    }

    pub fn set(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn advance(&mut self, dt: Duration) {
        self.now = self.now.saturating_add(dt);
    }
}

impl Clock for DeterministicClock {
    fn now_mono(&self) -> Duration {
        self.now
    }
}

/// Real monotonic clock. Works on native and `wasm32` targets.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: web_time::Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_mono(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_clock_advances_and_saturates() {
        let mut clock = DeterministicClock::new();
        assert_eq!(clock.now_mono(), Duration::ZERO);
        clock.advance(Duration::from_millis(16));
        assert_eq!(clock.now_mono(), Duration::from_millis(16));
        clock.set(Duration::MAX);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_mono(), Duration::MAX);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_mono();
        let b = clock.now_mono();
        assert!(b >= a);
    }
}
