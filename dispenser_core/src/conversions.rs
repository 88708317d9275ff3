//! `From` implementations bridging `dispenser_config` types to core types.

use std::time::Duration;

use crate::config::{DispenseCfg, ScheduleCfg, SensorCfg, StepperCfg, Topics};
use crate::stepper::StepMode;

impl From<dispenser_config::StepMode> for StepMode {
    fn from(m: dispenser_config::StepMode) -> Self {
        match m {
            dispenser_config::StepMode::Half => StepMode::Half,
            dispenser_config::StepMode::Full => StepMode::Full,
        }
    }
}

// ── StepperCfg ───────────────────────────────────────────────────────────────

impl From<&dispenser_config::StepperCfg> for StepperCfg {
    fn from(c: &dispenser_config::StepperCfg) -> Self {
        Self {
            mode: c.mode.into(),
            row_delay: Duration::from_millis(c.delay_ms),
            steps_per_rotation: c.steps_per_rotation,
        }
    }
}

// ── DispenseCfg ──────────────────────────────────────────────────────────────

impl From<&dispenser_config::DispenseCfg> for DispenseCfg {
    fn from(c: &dispenser_config::DispenseCfg) -> Self {
        Self {
            steps_per_ml: c.steps_per_ml,
            settle: Duration::from_millis(c.settle_ms),
            max_ml: c.max_ml,
        }
    }
}

// ── SensorCfg ────────────────────────────────────────────────────────────────

impl From<&dispenser_config::SensorsCfg> for SensorCfg {
    fn from(c: &dispenser_config::SensorsCfg) -> Self {
        Self {
            beam_threshold: c.beam_threshold,
            beam_hysteresis: c.beam_hysteresis,
            temp_settle: Duration::from_millis(c.temp_settle_ms),
        }
    }
}

// ── ScheduleCfg ──────────────────────────────────────────────────────────────

impl From<&dispenser_config::ScheduleCfg> for ScheduleCfg {
    fn from(c: &dispenser_config::ScheduleCfg) -> Self {
        Self {
            tick: Duration::from_millis(c.tick_ms),
            sample_every: Duration::from_millis(c.sample_ms),
            publish_every: Duration::from_millis(c.publish_ms),
        }
    }
}

// ── Topics ───────────────────────────────────────────────────────────────────

impl From<&dispenser_config::Topics> for Topics {
    fn from(c: &dispenser_config::Topics) -> Self {
        Self {
            command: c.command.clone(),
            status: c.status.clone(),
            level: c.level.clone(),
            temperature: c.temperature.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_defaults_map_onto_runtime_defaults() {
        let cfg = dispenser_config::Config::default();
        let stepper = StepperCfg::from(&cfg.stepper);
        assert_eq!(stepper.mode, StepMode::Half);
        assert_eq!(stepper.row_delay, Duration::from_millis(1));
        let schedule = ScheduleCfg::from(&cfg.schedule);
        assert_eq!(schedule.publish_every, Duration::from_secs(2));
        let dispense = DispenseCfg::from(&cfg.dispense);
        assert_eq!(dispense.settle, Duration::from_secs(1));
    }
}
