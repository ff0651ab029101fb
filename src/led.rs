// /src/led.rs
//! Status LED patterns.
//!
//! The LED is not driven by a timer of its own: the control loop asks for the
//! level at the current instant on every tick and writes it out.

use embassy_time::{Duration, Instant};

use crate::constants::{
    LED_CONNECTING_PULSE_MS, LED_ERROR_BLINK_MS, LED_ERROR_GAP_MS, LED_HEARTBEAT_LIT_MS, LED_HEARTBEAT_PAUSE_MS,
    LED_PULSE_LIT_MS, LED_RUNNING_PULSE_MS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedPattern {
    Off,
    On,
    /// Short flash at the start of every period.
    Pulse { period: Duration },
    /// Two flashes separated by `pause`, then dark for four pauses.
    Heartbeat { lit: Duration, pause: Duration },
    /// `count` blinks, then a longer gap.
    Error { count: u8 },
}

impl LedPattern {
    /// Waiting for the network.
    pub const CONNECTING: LedPattern = LedPattern::Pulse {
        period: Duration::from_millis(LED_CONNECTING_PULSE_MS),
    };

    /// Normal operation.
    pub const RUNNING: LedPattern = LedPattern::Pulse {
        period: Duration::from_millis(LED_RUNNING_PULSE_MS),
    };

    /// Waiting for the first call to assign the master.
    pub const AWAITING_MASTER: LedPattern = LedPattern::Heartbeat {
        lit: Duration::from_millis(LED_HEARTBEAT_LIT_MS),
        pause: Duration::from_millis(LED_HEARTBEAT_PAUSE_MS),
    };

    /// Level of the LED `elapsed` after the pattern started.
    pub fn level(self, elapsed: Duration) -> bool {
        let t = elapsed.as_millis();
        match self {
            LedPattern::Off => false,
            LedPattern::On => true,
            LedPattern::Pulse { period } => {
                let period = period.as_millis().max(1);
                let lit = LED_PULSE_LIT_MS.min(period / 2);
                t % period < lit
            }
            LedPattern::Heartbeat { lit, pause } => {
                let (lit, pause) = (lit.as_millis(), pause.as_millis());
                let cycle = (2 * lit + 5 * pause).max(1);
                let t = t % cycle;
                t < lit || (t >= lit + pause && t < 2 * lit + pause)
            }
            LedPattern::Error { count } => {
                let blinks = u64::from(count) * 2 * LED_ERROR_BLINK_MS;
                let t = t % (blinks + LED_ERROR_GAP_MS);
                t < blinks && (t / LED_ERROR_BLINK_MS) % 2 == 0
            }
        }
    }
}

pub struct StatusLed {
    pattern: LedPattern,
    since: Instant,
}

impl StatusLed {
    pub const fn new() -> Self {
        Self {
            pattern: LedPattern::Off,
            since: Instant::from_ticks(0),
        }
    }

    pub fn pattern(&self) -> LedPattern {
        self.pattern
    }

    /// Switches to `pattern`. Setting the current pattern again keeps its
    /// phase.
    pub fn set(&mut self, pattern: LedPattern, now: Instant) {
        if self.pattern != pattern {
            debug!("LED pattern {}", pattern);
            self.pattern = pattern;
            self.since = now;
        }
    }

    pub fn level(&self, now: Instant) -> bool {
        let elapsed = now.checked_duration_since(self.since).unwrap_or(Duration::from_ticks(0));
        self.pattern.level(elapsed)
    }
}

impl Default for StatusLed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(pattern: LedPattern, step_ms: u64, steps: u64) -> std::vec::Vec<bool> {
        (0..steps)
            .map(|i| pattern.level(Duration::from_millis(i * step_ms)))
            .collect()
    }

    #[test]
    fn steady_patterns() {
        assert!(levels(LedPattern::Off, 100, 50).iter().all(|lit| !lit));
        assert!(levels(LedPattern::On, 100, 50).iter().all(|lit| *lit));
    }

    #[test]
    fn running_pulse_flashes_every_three_seconds() {
        let pattern = LedPattern::RUNNING;
        assert!(pattern.level(Duration::from_millis(0)));
        assert!(pattern.level(Duration::from_millis(99)));
        assert!(!pattern.level(Duration::from_millis(100)));
        assert!(!pattern.level(Duration::from_millis(2_999)));
        assert!(pattern.level(Duration::from_millis(3_000)));
    }

    #[test]
    fn heartbeat_double_flash() {
        // 50 on, 100 off, 50 on, 500 off.
        let seen = levels(LedPattern::AWAITING_MASTER, 50, 12);
        assert_eq!(
            seen,
            [true, false, false, true, false, false, false, false, false, false, false, false]
        );
        assert!(LedPattern::AWAITING_MASTER.level(Duration::from_millis(600)));
    }

    #[test]
    fn error_blinks_count_then_gap() {
        let seen = levels(LedPattern::Error { count: 2 }, 200, 12);
        assert_eq!(
            seen,
            [true, false, true, false, false, false, false, false, false, true, false, true]
        );
    }

    #[test]
    fn phase_restarts_only_on_change() {
        let mut led = StatusLed::new();
        led.set(LedPattern::RUNNING, Instant::from_millis(1_000));
        assert!(led.level(Instant::from_millis(1_050)));
        led.set(LedPattern::RUNNING, Instant::from_millis(2_000));
        assert!(!led.level(Instant::from_millis(2_050)));
        led.set(LedPattern::On, Instant::from_millis(2_500));
        assert_eq!(led.pattern(), LedPattern::On);
        assert!(led.level(Instant::from_millis(2_600)));
    }
}
