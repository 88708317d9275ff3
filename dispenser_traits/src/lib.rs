//! Hardware, transport and timing seams for the dispenser.
//!
//! The core only ever talks to these traits. Real adapters live in
//! `dispenser_hardware` (devices) and `dispenser_cli` (MQTT); simulated ones
//! back the tests and `--sim` runs.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Error type used across every trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Four stepper coil outputs, written together as one pattern.
pub trait CoilDriver {
    fn write(&mut self, pattern: [bool; 4]) -> Result<(), BoxError>;
}

/// A single 12-bit analog channel (LDR behind an ADC).
pub trait AnalogInput {
    fn read(&mut self) -> Result<u16, BoxError>;
}

/// A switched emitter (the break-beam laser).
pub trait Emitter {
    fn set_on(&mut self, on: bool) -> Result<(), BoxError>;
}

/// A bus of addressable temperature probes (one-wire family).
pub trait TemperatureBus {
    /// Enumerate the probes present; called once at startup.
    fn scan(&mut self) -> Result<Vec<String>, BoxError>;
    /// Start a conversion on every probe.
    fn convert(&mut self) -> Result<(), BoxError>;
    /// Read the last conversion of one probe, in degrees Celsius.
    fn read(&mut self, id: &str) -> Result<f32, BoxError>;
}

impl<T: CoilDriver + ?Sized> CoilDriver for Box<T> {
    fn write(&mut self, pattern: [bool; 4]) -> Result<(), BoxError> {
        (**self).write(pattern)
    }
}

impl<T: AnalogInput + ?Sized> AnalogInput for Box<T> {
    fn read(&mut self) -> Result<u16, BoxError> {
        (**self).read()
    }
}

impl<T: Emitter + ?Sized> Emitter for Box<T> {
    fn set_on(&mut self, on: bool) -> Result<(), BoxError> {
        (**self).set_on(on)
    }
}

impl<T: TemperatureBus + ?Sized> TemperatureBus for Box<T> {
    fn scan(&mut self) -> Result<Vec<String>, BoxError> {
        (**self).scan()
    }

    fn convert(&mut self) -> Result<(), BoxError> {
        (**self).convert()
    }

    fn read(&mut self, id: &str) -> Result<f32, BoxError> {
        (**self).read(id)
    }
}

/// One message taken off the inbound queue of a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe messaging channel.
pub trait Channel {
    /// Non-blocking: return the next pending message, if any.
    fn poll(&mut self) -> Result<Option<InboundMessage>, BoxError>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BoxError>;
    fn close(&mut self) -> Result<(), BoxError>;
}

impl<T: Channel + ?Sized> Channel for Box<T> {
    fn poll(&mut self) -> Result<Option<InboundMessage>, BoxError> {
        (**self).poll()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BoxError> {
        (**self).publish(topic, payload)
    }

    fn close(&mut self) -> Result<(), BoxError> {
        (**self).close()
    }
}
