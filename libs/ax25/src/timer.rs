//! Countdown timers (T1/T2/T3 retry/ack/idle timers) driven by the event
//! loop's own elapsed-time measurement rather than OS alarms.

use std::time::Duration;

/// A single countdown timer. `reset()` restores it to its configured
/// duration; `tick()` advances it by however long the last poll() wait
/// actually took.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    duration: Duration,
    remaining: Duration,
    running: bool,
}

impl Timer {
    pub fn new(duration: Duration) -> Timer {
        Timer { duration, remaining: Duration::ZERO, running: false }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn expired(&self) -> bool {
        self.running && self.remaining.is_zero()
    }

    pub fn start(&mut self) {
        self.remaining = self.duration;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn clear(&mut self) {
        self.remaining = Duration::ZERO;
        self.running = false;
    }

    /// Advance the countdown by `elapsed`. A no-op on a stopped timer.
    pub fn tick(&mut self, elapsed: Duration) {
        if !self.running {
            return;
        }
        self.remaining = self.remaining.saturating_sub(elapsed);
    }

    /// Time left before expiry, for sizing the event loop's poll timeout.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_and_expires() {
        let mut t = Timer::new(Duration::from_millis(100));
        assert!(!t.running());
        t.start();
        assert!(t.running());
        assert!(!t.expired());
        t.tick(Duration::from_millis(60));
        assert!(!t.expired());
        t.tick(Duration::from_millis(60));
        assert!(t.expired());
    }

    #[test]
    fn stopped_timer_does_not_tick() {
        let mut t = Timer::new(Duration::from_millis(50));
        t.tick(Duration::from_millis(1000));
        assert!(!t.expired());
    }

    #[test]
    fn restart_resets_remaining() {
        let mut t = Timer::new(Duration::from_millis(100));
        t.start();
        t.tick(Duration::from_millis(100));
        assert!(t.expired());
        t.start();
        assert!(!t.expired());
        assert_eq!(t.remaining(), Duration::from_millis(100));
    }
}
