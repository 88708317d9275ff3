//! Runtime configuration of the controller components.
//!
//! These are separate from the TOML-deserialized config in `dispenser_config`;
//! `conversions` maps one onto the other.
use std::time::Duration;

use crate::stepper::StepMode;

/// Actuator drive parameters.
#[derive(Debug, Clone)]
pub struct StepperCfg {
    pub mode: StepMode,
    /// Delay after every written table row.
    pub row_delay: Duration,
    /// Table cycles per output-shaft revolution (used by `angle`).
    pub steps_per_rotation: u32,
}

impl Default for StepperCfg {
    fn default() -> Self {
        Self {
            mode: StepMode::Half,
            row_delay: Duration::from_millis(1),
            steps_per_rotation: crate::stepper::STEPS_PER_ROTATION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispenseCfg {
    pub steps_per_ml: f64,
    /// Wait between the end of motion and the second level read.
    pub settle: Duration,
    pub max_ml: Option<f64>,
}

impl Default for DispenseCfg {
    fn default() -> Self {
        Self {
            steps_per_ml: 170.0,
            settle: Duration::from_secs(1),
            max_ml: Some(50.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorCfg {
    pub beam_threshold: u16,
    /// Release band below the threshold; 0 = plain comparison.
    pub beam_hysteresis: u16,
    /// Conversion wait of the temperature probes.
    pub temp_settle: Duration,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            beam_threshold: 4000,
            beam_hysteresis: 0,
            temp_settle: Duration::from_millis(750),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleCfg {
    pub tick: Duration,
    pub sample_every: Duration,
    pub publish_every: Duration,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            sample_every: Duration::from_millis(1000),
            publish_every: Duration::from_millis(2000),
        }
    }
}

/// Messaging topics.
#[derive(Debug, Clone)]
pub struct Topics {
    pub command: String,
    pub status: String,
    pub level: String,
    pub temperature: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            command: "liquid_system/command".to_string(),
            status: "liquid_system/status".to_string(),
            level: "liquid_system/level".to_string(),
            temperature: "liquid_system/temperature".to_string(),
        }
    }
}
