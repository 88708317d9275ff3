#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Dispenser control core (hardware-agnostic).
//!
//! Every device and the messaging channel are reached through the traits in
//! `dispenser_traits`; nothing here touches GPIO, SPI or sockets.
//!
//! ## Components
//!
//! - **Stepper** (`stepper`): coil-pattern sequencing, step and angle moves
//! - **Sensors** (`sensors`): temperature probes, level LDR, break-beam LDR
//! - **Arbiter** (`arbiter`): single-flight dispense with before/after level
//! - **Ingress** (`ingress`): command payload parsing
//! - **Telemetry** (`telemetry`): status and snapshot publishing
//! - **Control** (`control`): the cooperative loop tying them together
//!
//! ## Timing
//!
//! All waits (row delays, probe conversion, settle, tick) go through
//! [`dispenser_traits::Clock`]. Tests drive the whole loop on a
//! [`dispenser_traits::ManualClock`] without sleeping.

pub mod arbiter;
pub mod config;
pub mod control;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod ingress;
pub mod mocks;
pub mod schedule;
pub mod sensors;
pub mod stepper;
pub mod telemetry;
pub mod types;

pub use arbiter::{ActuatorPermit, DispenseArbiter, PermitGuard, steps_for_volume};
pub use control::{ControlLoop, ControlLoopBuilder, LoopState, TickReport};
pub use error::{BuildError, DispenserError, ParseError};
pub use ingress::CommandIngress;
pub use sensors::SensorBank;
pub use stepper::{Rotation, StepMode, StepSequencer};
pub use telemetry::{StatusMessage, TelemetryPublisher};
pub use types::{DispenseRequest, DispenseResult, Direction, SensorSnapshot};
