use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("spi error: {0}")]
    Spi(String),
    #[error("adc channel {0} out of range (0..=7)")]
    AdcChannel(u8),
    #[error("one-wire sensor {0} not found")]
    SensorMissing(String),
    #[error("one-wire crc check failed for {0}")]
    Crc(String),
    #[error("one-wire read for {id} malformed: {detail}")]
    Malformed { id: String, detail: String },
    #[error("simulated fault: {0}")]
    Injected(&'static str),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
