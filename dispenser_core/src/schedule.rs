use std::time::Duration;

use crate::config::ScheduleCfg;

/// Periodic tasks due on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Due {
    pub sample: bool,
    pub publish: bool,
}

/// Sampling and telemetry accumulators of the control loop.
///
/// Both advance by the nominal tick, not by wall time, so a tick stretched
/// by a long dispense still counts once.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTimers {
    sensor_accumulator: Duration,
    telemetry_accumulator: Duration,
}

impl ScheduleTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, cfg: &ScheduleCfg) -> Due {
        self.sensor_accumulator += cfg.tick;
        self.telemetry_accumulator += cfg.tick;
        let mut due = Due::default();
        if self.sensor_accumulator >= cfg.sample_every {
            self.sensor_accumulator = Duration::ZERO;
            due.sample = true;
        }
        if self.telemetry_accumulator >= cfg.publish_every {
            self.telemetry_accumulator = Duration::ZERO;
            due.publish = true;
        }
        due
    }

    pub fn sensor_accumulator(&self) -> Duration {
        self.sensor_accumulator
    }

    pub fn telemetry_accumulator(&self) -> Duration {
        self.telemetry_accumulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fire_every_tenth_and_twentieth_tick() {
        let cfg = ScheduleCfg::default();
        let mut t = ScheduleTimers::new();
        let mut samples = Vec::new();
        let mut publishes = Vec::new();
        for tick in 1..=40 {
            let due = t.advance(&cfg);
            if due.sample {
                samples.push(tick);
            }
            if due.publish {
                publishes.push(tick);
            }
        }
        assert_eq!(samples, vec![10, 20, 30, 40]);
        assert_eq!(publishes, vec![20, 40]);
        assert_eq!(t.sensor_accumulator(), Duration::ZERO);
    }

    #[test]
    fn uneven_tick_resets_to_zero_not_remainder() {
        let cfg = ScheduleCfg {
            tick: Duration::from_millis(300),
            sample_every: Duration::from_millis(1000),
            publish_every: Duration::from_millis(2000),
        };
        let mut t = ScheduleTimers::new();
        let fired: Vec<bool> = (0..8).map(|_| t.advance(&cfg).sample).collect();
        assert_eq!(fired, vec![false, false, false, true, false, false, false, true]);
        assert_eq!(t.telemetry_accumulator(), Duration::from_millis(300));
    }
}
