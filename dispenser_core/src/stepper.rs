//! Step sequencing for a four-coil unipolar stepper (28BYJ-48 on a ULN2003).
//!
//! A "step" here is one pass over the active table. Each row is written to
//! the four coil outputs at once and followed by the row delay. After a run
//! the coils are always left de-energized: the gearbox cannot be back-driven,
//! so there is nothing to hold and the windings only heat up.
//!
//! `drive` blocks for `steps × rows × row_delay`. There is no way to stop
//! mid-table without leaving the rotor between phases, so callers treat a run
//! as one uninterruptible operation.
use std::sync::Arc;
use std::time::Duration;

use dispenser_traits::{Clock, CoilDriver};
use tracing::{debug, trace};

use crate::config::StepperCfg;
use crate::error::DispenserError;
use crate::hw_error::{Origin, map_hw_error};

/// Coil pattern of a released motor.
pub const DE_ENERGIZED: [bool; 4] = [false; 4];

/// Output-shaft steps per revolution of the reference motor:
/// trunc(4075.7728395061727 / 8).
pub const STEPS_PER_ROTATION: u32 = 509;

const X: bool = true;
const O: bool = false;

/// 8-row half-step table: alternates one and two energized coils.
pub const HALF_STEP: [[bool; 4]; 8] = [
    [O, O, O, X],
    [O, O, X, X],
    [O, O, X, O],
    [O, X, X, O],
    [O, X, O, O],
    [X, X, O, O],
    [X, O, O, O],
    [X, O, O, X],
];

/// 4-row full-step table: two coils energized per row.
pub const FULL_STEP: [[bool; 4]; 4] = [[X, O, X, O], [O, X, X, O], [O, X, O, X], [X, O, O, X]];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    #[default]
    Half,
    Full,
}

impl StepMode {
    pub fn table(self) -> &'static [[bool; 4]] {
        match self {
            StepMode::Half => &HALF_STEP,
            StepMode::Full => &FULL_STEP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Forward,
    Backward,
}

impl Rotation {
    pub fn reversed(self) -> Self {
        match self {
            Rotation::Forward => Rotation::Backward,
            Rotation::Backward => Rotation::Forward,
        }
    }
}

/// Steps for a rotation of `degrees`, truncated toward zero. Negative angles
/// flip the rotation.
pub fn steps_for_angle(degrees: f64, steps_per_rotation: u32, rotation: Rotation) -> (u32, Rotation) {
    // `as` saturates and maps NaN to 0
    let steps = (f64::from(steps_per_rotation) * degrees / 360.0).trunc();
    if steps < 0.0 {
        ((-steps) as u32, rotation.reversed())
    } else {
        (steps as u32, rotation)
    }
}

pub struct StepSequencer {
    coils: Box<dyn CoilDriver>,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: StepperCfg,
}

impl StepSequencer {
    pub fn new(
        coils: Box<dyn CoilDriver>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: StepperCfg,
    ) -> Self {
        Self { coils, clock, cfg }
    }

    pub fn mode(&self) -> StepMode {
        self.cfg.mode
    }

    /// Rows written per step in the active mode.
    pub fn rows_per_step(&self) -> usize {
        self.cfg.mode.table().len()
    }

    /// Time `drive(steps, _)` will block for.
    pub fn duration_for(&self, steps: u32) -> Duration {
        let rows = u32::try_from(self.rows_per_step()).unwrap_or(u32::MAX);
        self.cfg.row_delay.saturating_mul(steps.saturating_mul(rows))
    }

    /// Run `steps` passes over the table, then release the coils.
    ///
    /// On a coil write failure the sequence stops, a release is still
    /// attempted, and the write error is returned.
    pub fn drive(&mut self, steps: u32, rotation: Rotation) -> Result<(), DispenserError> {
        debug!(
            steps,
            ?rotation,
            mode = ?self.cfg.mode,
            blocking_ms = self.duration_for(steps).as_millis() as u64,
            "drive"
        );
        let outcome = self.sequence(steps, rotation);
        let released = self.release();
        outcome.and(released)
    }

    fn sequence(&mut self, steps: u32, rotation: Rotation) -> Result<(), DispenserError> {
        let table = self.cfg.mode.table();
        for step in 0..steps {
            match rotation {
                Rotation::Forward => {
                    for row in table {
                        self.write_row(*row)?;
                    }
                }
                Rotation::Backward => {
                    for row in table.iter().rev() {
                        self.write_row(*row)?;
                    }
                }
            }
            if step % 512 == 511 {
                trace!(done = step + 1, total = steps, "drive progress");
            }
        }
        Ok(())
    }

    fn write_row(&mut self, row: [bool; 4]) -> Result<(), DispenserError> {
        self.coils
            .write(row)
            .map_err(|e| map_hw_error(Origin::Actuator, &*e))?;
        self.clock.sleep(self.cfg.row_delay);
        Ok(())
    }

    /// Rotate by an angle in degrees.
    pub fn angle(&mut self, degrees: f64, rotation: Rotation) -> Result<u32, DispenserError> {
        let (steps, rotation) = steps_for_angle(degrees, self.cfg.steps_per_rotation, rotation);
        self.drive(steps, rotation)?;
        Ok(steps)
    }

    /// De-energize all coils.
    pub fn release(&mut self) -> Result<(), DispenserError> {
        self.coils
            .write(DE_ENERGIZED)
            .map_err(|e| map_hw_error(Origin::Actuator, &*e))
    }
}
