use thiserror::Error;

/// Runtime failures of the dispenser, grouped the way the control loop
/// recovers from them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispenserError {
    /// A hardware handle could not be acquired; fatal before RUNNING.
    #[error("initialization failed: {0}")]
    Init(String),
    /// Messaging channel connect/publish/receive failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// A dispense arrived while the actuator was busy.
    #[error("dispense already in progress")]
    Busy,
    #[error("actuator fault: {0}")]
    Actuator(String),
    #[error("sensor read failed: {0}")]
    Sensor(String),
    /// Bus-level failure (GPIO, SPI, file I/O) underneath a device.
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("invalid volume: {0} ml")]
    InvalidVolume(f64),
    #[error("invalid state: {0}")]
    State(String),
}

/// Why an inbound command was dropped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("command is not valid UTF-8")]
    Encoding,
    #[error("unrecognized command: {0}")]
    Malformed(String),
    #[error("invalid volume: {0} ml")]
    InvalidVolume(f64),
    #[error("volume {ml} ml exceeds the {max} ml limit")]
    TooLarge { ml: f64, max: f64 },
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing coil driver")]
    MissingCoils,
    #[error("missing temperature bus")]
    MissingTemperatureBus,
    #[error("missing level sensor")]
    MissingLevelSensor,
    #[error("missing beam sensor")]
    MissingBeamSensor,
    #[error("missing laser emitter")]
    MissingLaser,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
