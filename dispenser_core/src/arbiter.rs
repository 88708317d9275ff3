//! Single-flight ownership of the actuator.
//!
//! [`DispenseArbiter::dispense`] is the only path that moves liquid. It holds
//! an [`ActuatorPermit`] for the whole measure, drive, settle, measure
//! sequence; a second request arriving while the permit is held is rejected
//! without touching the coils.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dispenser_traits::Clock;
use tracing::{info, warn};

use crate::error::DispenserError;
use crate::sensors::SensorBank;
use crate::stepper::{Rotation, StepSequencer};
use crate::types::{DispenseRequest, DispenseResult};

/// Cloneable handle on the actuator's busy flag.
#[derive(Debug, Clone, Default)]
pub struct ActuatorPermit {
    busy: Arc<AtomicBool>,
}

/// Held while the actuator runs; clears the busy flag on drop.
#[must_use = "the actuator is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PermitGuard {
    busy: Arc<AtomicBool>,
}

impl ActuatorPermit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the actuator, or `None` if someone else holds it.
    pub fn try_acquire(&self) -> Option<PermitGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PermitGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Steps needed for `volume_ml`, truncated toward zero.
///
/// Saturates at `u32::MAX`; NaN maps to 0.
pub fn steps_for_volume(volume_ml: f64, steps_per_ml: f64) -> u32 {
    (volume_ml * steps_per_ml) as u32
}

pub struct DispenseArbiter {
    stepper: StepSequencer,
    permit: ActuatorPermit,
    steps_per_ml: f64,
    settle: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl DispenseArbiter {
    pub fn new(
        stepper: StepSequencer,
        steps_per_ml: f64,
        settle: Duration,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            stepper,
            permit: ActuatorPermit::new(),
            steps_per_ml,
            settle,
            clock,
        }
    }

    /// Shared busy flag, for other command sources.
    pub fn permit(&self) -> ActuatorPermit {
        self.permit.clone()
    }

    pub fn steps_per_ml(&self) -> f64 {
        self.steps_per_ml
    }

    /// Measure, drive, settle, measure.
    ///
    /// Returns `Busy` without moving if the permit is held. On any failure
    /// the coils are released (best effort) and the permit is returned
    /// before the error propagates.
    pub fn dispense(
        &mut self,
        request: &DispenseRequest,
        sensors: &mut SensorBank,
    ) -> Result<DispenseResult, DispenserError> {
        let Some(_guard) = self.permit.try_acquire() else {
            warn!(ml = request.volume_ml(), "dispense rejected: actuator busy");
            return Err(DispenserError::Busy);
        };
        let steps = steps_for_volume(request.volume_ml(), self.steps_per_ml);
        self.run(request, steps, sensors).inspect_err(|e| {
            warn!(ml = request.volume_ml(), steps, error = %e, "dispense failed");
            if let Err(release) = self.stepper.release() {
                warn!(error = %release, "coil release after failure also failed");
            }
        })
    }

    fn run(
        &mut self,
        request: &DispenseRequest,
        steps: u32,
        sensors: &mut SensorBank,
    ) -> Result<DispenseResult, DispenserError> {
        let direction = request.direction();
        let level_before = sensors.read_water_level()?;
        info!(
            ml = request.volume_ml(),
            steps,
            direction = direction.as_str(),
            level_before,
            "dispense start"
        );
        self.stepper.drive(steps, direction.rotation())?;
        self.clock.sleep(self.settle);
        let level_after = sensors.read_water_level()?;
        let result = DispenseResult {
            volume_ml: request.volume_ml(),
            steps,
            direction,
            level_before,
            level_after,
            displacement: i32::from(level_after) - i32::from(level_before),
            timestamp: Utc::now(),
        };
        info!(
            ml = result.volume_ml,
            steps,
            level_after,
            displacement = result.displacement,
            "dispense done"
        );
        Ok(result)
    }

    /// Rotate by an angle, under the same permit as a dispense.
    pub fn jog(&mut self, degrees: f64, rotation: Rotation) -> Result<u32, DispenserError> {
        let Some(_guard) = self.permit.try_acquire() else {
            return Err(DispenserError::Busy);
        };
        let steps = self.stepper.angle(degrees, rotation)?;
        info!(degrees, steps, "jog done");
        Ok(steps)
    }

    /// De-energize the coils.
    pub fn release(&mut self) -> Result<(), DispenserError> {
        self.stepper.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_truncate() {
        assert_eq!(steps_for_volume(10.0, 170.0), 1700);
        assert_eq!(steps_for_volume(0.01, 170.0), 1);
        assert_eq!(steps_for_volume(0.005, 170.0), 0);
        assert_eq!(steps_for_volume(1e12, 170.0), u32::MAX);
    }

    #[test]
    fn permit_is_exclusive_and_released_on_drop() {
        let p = ActuatorPermit::new();
        let other = p.clone();
        let g = p.try_acquire().unwrap();
        assert!(other.is_busy());
        assert!(other.try_acquire().is_none());
        drop(g);
        assert!(!p.is_busy());
        assert!(other.try_acquire().is_some());
    }

    #[test]
    fn permit_released_on_unwind() {
        let p = ActuatorPermit::new();
        let inner = p.clone();
        let r = std::panic::catch_unwind(move || {
            let _g = inner.try_acquire().unwrap();
            panic!("motion fault");
        });
        assert!(r.is_err());
        assert!(!p.is_busy());
    }
}
