//! Cooperative timer bank driving the sampling and publication cadence.
//!
//! The session loop asks once per tick whether each activity is due. The
//! "due" test uses wrapping subtraction so a millisecond counter that
//! overflows does not make the test falsely fail across the wrap.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CadenceConfig {
    pub sample_interval: Duration,
    pub telemetry_interval: Duration,
    pub property_interval: Duration,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(2_500),
            telemetry_interval: Duration::from_millis(60_000),
            property_interval: Duration::from_millis(60_000),
        }
    }
}

/// One scheduled activity: fires when more than `interval_ms` has elapsed
/// since it last fired.
#[derive(Debug, Clone)]
pub struct Timer {
    interval_ms: u64,
    last_fired_ms: u64,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_fired_ms: 0,
        }
    }

    pub fn due(&self, now_ms: u64) -> bool {
        now_ms.wrapping_sub(self.last_fired_ms) > self.interval_ms
    }

    pub fn fire(&mut self, now_ms: u64) {
        self.last_fired_ms = now_ms;
    }
}

/// The three timers the session loop consults every tick. Timers are not
/// reset while the broker session is down, so the first pass after a
/// reconnect runs every overdue activity immediately.
#[derive(Debug, Clone)]
pub struct Cadence {
    pub sample: Timer,
    pub telemetry: Timer,
    pub properties: Timer,
}

impl Cadence {
    pub fn new(config: &CadenceConfig) -> Self {
        Self {
            sample: Timer::new(config.sample_interval),
            telemetry: Timer::new(config.telemetry_interval),
            properties: Timer::new(config.property_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_after_the_interval_elapses() {
        let mut timer = Timer::new(Duration::from_millis(2_500));
        timer.fire(0);

        assert!(!timer.due(2_499));
        assert!(timer.due(2_501));

        timer.fire(2_501);
        assert!(!timer.due(2_502));
        assert!(timer.due(5_002));
    }

    #[test]
    fn due_test_survives_counter_wraparound() {
        let mut timer = Timer::new(Duration::from_millis(2_500));
        timer.fire(u64::MAX - 1_000);

        // 1 001 ms elapsed across the wrap: not yet due
        assert!(!timer.due(0));
        // 3 001 ms elapsed across the wrap: due
        assert!(timer.due(2_000));
    }

    #[test]
    fn bank_uses_the_configured_intervals() {
        let cadence = Cadence::new(&CadenceConfig::default());
        assert!(!cadence.sample.due(2_500));
        assert!(cadence.sample.due(2_501));
        assert!(!cadence.telemetry.due(60_000));
        assert!(cadence.telemetry.due(60_001));
        assert!(!cadence.properties.due(60_000));
        assert!(cadence.properties.due(60_001));
    }
}
