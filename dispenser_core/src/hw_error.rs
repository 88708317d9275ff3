//! Maps `Box<dyn Error>` from trait boundaries to typed `DispenserError`.
//!
//! The traits in `dispenser_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed enum, with a feature-gated path that
//! downcasts `dispenser_hardware::HwError` to tell bus faults apart from
//! device-level read/write failures.

use crate::error::DispenserError;

/// Which device the failing call was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Actuator,
    Sensor,
    Emitter,
}

/// Map a trait-boundary error raised by a device of `origin`.
pub fn map_hw_error(origin: Origin, e: &(dyn std::error::Error + 'static)) -> DispenserError {
    #[cfg(feature = "hardware-errors")]
    {
        use dispenser_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            match hw {
                HwError::Gpio(_) | HwError::Spi(_) | HwError::Io(_) => {
                    return DispenserError::HardwareFault(hw.to_string());
                }
                _ => {}
            }
        }
    }

    let s = e.to_string();
    match origin {
        Origin::Actuator | Origin::Emitter => DispenserError::Actuator(s),
        Origin::Sensor => DispenserError::Sensor(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_errors_follow_origin() {
        let e = std::io::Error::other("stuck");
        assert_eq!(
            map_hw_error(Origin::Sensor, &e),
            DispenserError::Sensor("stuck".into())
        );
        assert_eq!(
            map_hw_error(Origin::Actuator, &e),
            DispenserError::Actuator("stuck".into())
        );
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn bus_faults_are_hardware_faults() {
        use dispenser_hardware::HwError;
        let e = HwError::Gpio("pin 16 busy".into());
        assert!(matches!(
            map_hw_error(Origin::Actuator, &e),
            DispenserError::HardwareFault(_)
        ));
        let e = HwError::Crc("28-a".into());
        assert!(matches!(
            map_hw_error(Origin::Sensor, &e),
            DispenserError::Sensor(_)
        ));
    }
}
