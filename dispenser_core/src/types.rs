//! Values passed between the controller components.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::DispenserError;
use crate::stepper::Rotation;

/// Plunger direction of a dispense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Push liquid out (dispense).
    Push,
    /// Draw liquid in.
    Pull,
}

impl Direction {
    /// Rotor direction that moves the plunger this way.
    pub fn rotation(self) -> Rotation {
        match self {
            Direction::Push => Rotation::Forward,
            Direction::Pull => Rotation::Backward,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        }
    }
}

/// A validated request to move `volume_ml` of liquid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispenseRequest {
    volume_ml: f64,
    direction: Direction,
}

impl DispenseRequest {
    /// Rejects non-finite and non-positive volumes.
    pub fn new(volume_ml: f64, direction: Direction) -> Result<Self, DispenserError> {
        if !volume_ml.is_finite() || volume_ml <= 0.0 {
            return Err(DispenserError::InvalidVolume(volume_ml));
        }
        Ok(Self {
            volume_ml,
            direction,
        })
    }

    pub fn volume_ml(&self) -> f64 {
        self.volume_ml
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Outcome of one completed actuator run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispenseResult {
    pub volume_ml: f64,
    pub steps: u32,
    pub direction: Direction,
    pub level_before: u16,
    pub level_after: u16,
    /// `level_after - level_before`
    pub displacement: i32,
    pub timestamp: DateTime<Utc>,
}

/// One reading of every sensor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorSnapshot {
    /// Probe id to degrees Celsius; empty when no probe answered.
    pub temperatures: BTreeMap<String, f32>,
    pub water_level: u16,
    pub beam_broken: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_rejects_non_positive_and_non_finite_volumes() {
        for v in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(DispenseRequest::new(v, Direction::Push).is_err(), "{v}");
        }
        let r = DispenseRequest::new(0.1, Direction::Pull).unwrap();
        assert_eq!(r.direction().rotation(), Rotation::Backward);
    }
}
