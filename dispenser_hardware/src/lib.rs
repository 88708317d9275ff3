//! Device adapters for the dispenser.
//!
//! - `sim`: in-memory rig used by tests and `--sim` runs (always built)
//! - `w1`: Linux sysfs one-wire thermometers (always built; plain file I/O)
//! - `gpio`, `mcp3208`: Raspberry Pi GPIO / SPI ADC via rppal
//!   (`hardware` feature, Linux only)
pub mod error;
pub mod sim;
pub mod w1;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod mcp3208;

pub use error::HwError;
pub use sim::{SimBeam, SimCoils, SimLaser, SimLevel, SimRig, SimTemperatureBus};
pub use w1::W1Bus;
