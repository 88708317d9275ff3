//! Raspberry Pi GPIO adapters (rppal): ULN2003 coil outputs and the laser.
use rppal::gpio::{Gpio, OutputPin};
use tracing::{debug, trace};

use dispenser_traits::{BoxError, CoilDriver, Emitter};

use crate::error::{HwError, Result};

fn output(gpio: &Gpio, pin: u8) -> Result<OutputPin> {
    let pin = gpio
        .get(pin)
        .map_err(|e| HwError::Gpio(format!("open pin {pin}: {e}")))?;
    Ok(pin.into_output_low())
}

/// Four coil lines IN1..IN4 of a unipolar stepper driver.
pub struct GpioCoils {
    pins: [OutputPin; 4],
}

impl GpioCoils {
    pub fn new(pins: [u8; 4]) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let [a, b, c, d] = pins;
        debug!(?pins, "coil outputs acquired");
        Ok(Self {
            pins: [
                output(&gpio, a)?,
                output(&gpio, b)?,
                output(&gpio, c)?,
                output(&gpio, d)?,
            ],
        })
    }
}

impl CoilDriver for GpioCoils {
    fn write(&mut self, pattern: [bool; 4]) -> std::result::Result<(), BoxError> {
        for (pin, on) in self.pins.iter_mut().zip(pattern) {
            if on {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        trace!(?pattern, "coils");
        Ok(())
    }
}

/// Laser module signal pin.
pub struct GpioLaser {
    pin: OutputPin,
}

impl GpioLaser {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(Self {
            pin: output(&gpio, pin)?,
        })
    }
}

impl Emitter for GpioLaser {
    fn set_on(&mut self, on: bool) -> std::result::Result<(), BoxError> {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}
