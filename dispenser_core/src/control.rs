//! The cooperative control loop.
//!
//! One thread runs everything: drain commands, dispense, sample, publish,
//! sleep out the rest of the tick. A dispense blocks the tick for its full
//! duration; the shutdown flag is only looked at between ticks.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dispenser_traits::{
    AnalogInput, Channel, Clock, CoilDriver, Emitter, InboundMessage, MonotonicClock,
    TemperatureBus,
};
use tracing::{debug, info, warn};

use crate::arbiter::{ActuatorPermit, DispenseArbiter};
use crate::config::{DispenseCfg, ScheduleCfg, SensorCfg, StepperCfg, Topics};
use crate::error::{BuildError, DispenserError, Result};
use crate::hw_error::{Origin, map_hw_error};
use crate::ingress::CommandIngress;
use crate::schedule::ScheduleTimers;
use crate::sensors::SensorBank;
use crate::stepper::{Rotation, StepSequencer};
use crate::telemetry::TelemetryPublisher;
use crate::types::{DispenseRequest, DispenseResult, SensorSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Running,
    ShuttingDown,
    Stopped,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Inbound messages taken off the channel.
    pub messages: usize,
    /// Dispenses that completed.
    pub dispensed: usize,
    /// Commands dropped: unparseable, busy, or failed during motion.
    pub rejected: usize,
    /// A periodic sample was taken.
    pub sampled: bool,
    /// Messages accepted by the channel, status and telemetry together.
    pub published: usize,
    /// The channel failed on receive and was dropped.
    pub channel_lost: bool,
}

pub struct ControlLoop {
    state: LoopState,
    sensors: SensorBank,
    arbiter: DispenseArbiter,
    laser: Box<dyn Emitter>,
    channel: Option<Box<dyn Channel>>,
    ingress: CommandIngress,
    telemetry: TelemetryPublisher,
    schedule: ScheduleCfg,
    timers: ScheduleTimers,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl core::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("state", &self.state)
            .field("channel", &self.channel.is_some())
            .field("probes", &self.sensors.probes())
            .field("schedule", &self.schedule)
            .finish()
    }
}

impl ControlLoop {
    pub fn builder() -> ControlLoopBuilder {
        ControlLoopBuilder::default()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn channel_connected(&self) -> bool {
        self.channel.is_some()
    }

    pub fn permit(&self) -> ActuatorPermit {
        self.arbiter.permit()
    }

    /// INIT → RUNNING. Turns the laser on.
    pub fn start(&mut self) -> std::result::Result<(), DispenserError> {
        if self.state != LoopState::Init {
            return Err(DispenserError::State(format!(
                "start from {:?}",
                self.state
            )));
        }
        self.laser
            .set_on(true)
            .map_err(|e| DispenserError::Init(format!("laser: {e}")))?;
        self.state = LoopState::Running;
        info!(
            channel = self.channel.is_some(),
            probes = self.sensors.probes().len(),
            "control loop running"
        );
        Ok(())
    }

    /// One pass: drain commands, then the periodic sample and publish.
    pub fn tick(&mut self) -> std::result::Result<TickReport, DispenserError> {
        if self.state != LoopState::Running {
            return Err(DispenserError::State(format!("tick in {:?}", self.state)));
        }
        let mut report = TickReport::default();
        self.drain(&mut report);

        let due = self.timers.advance(&self.schedule);
        let mut fresh: Option<SensorSnapshot> = None;
        if due.sample {
            match self.sensors.snapshot() {
                Ok(s) => {
                    log_snapshot(&s);
                    report.sampled = true;
                    fresh = Some(s);
                }
                Err(e) => warn!(error = %e, "sample skipped"),
            }
        }
        if due.publish && self.channel.is_some() {
            let snapshot = match fresh {
                Some(s) => Some(s),
                None => self
                    .sensors
                    .snapshot()
                    .inspect_err(|e| warn!(error = %e, "telemetry snapshot skipped"))
                    .ok(),
            };
            if let Some(s) = snapshot
                && let Some(ch) = self.channel.as_deref_mut()
            {
                report.published += self.telemetry.publish_snapshot(ch, &s);
            }
        }
        if report != TickReport::default() {
            debug!(?report, "tick");
        }
        Ok(report)
    }

    fn drain(&mut self, report: &mut TickReport) {
        loop {
            let polled = match self.channel.as_deref_mut() {
                Some(ch) => ch.poll(),
                None => return,
            };
            match polled {
                Ok(Some(msg)) => {
                    report.messages += 1;
                    self.handle(msg, report);
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "receive failed; continuing without channel");
                    self.drop_channel();
                    report.channel_lost = true;
                    return;
                }
            }
        }
    }

    fn handle(&mut self, msg: InboundMessage, report: &mut TickReport) {
        if msg.topic != self.telemetry.topics().command {
            debug!(topic = %msg.topic, "ignoring message on foreign topic");
            return;
        }
        let request = match self.ingress.parse(&msg.payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, payload = %String::from_utf8_lossy(&msg.payload), "command dropped");
                report.rejected += 1;
                return;
            }
        };
        match self.arbiter.dispense(&request, &mut self.sensors) {
            Ok(result) => {
                report.dispensed += 1;
                if let Some(ch) = self.channel.as_deref_mut()
                    && self.telemetry.publish_result(ch, &result)
                {
                    report.published += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, ml = request.volume_ml(), "command dropped");
                report.rejected += 1;
            }
        }
    }

    /// Dispense outside the command path, publishing the status if a
    /// channel is attached.
    pub fn dispense_local(
        &mut self,
        request: &DispenseRequest,
    ) -> std::result::Result<DispenseResult, DispenserError> {
        let result = self.arbiter.dispense(request, &mut self.sensors)?;
        if let Some(ch) = self.channel.as_deref_mut() {
            self.telemetry.publish_result(ch, &result);
        }
        Ok(result)
    }

    /// Parse and dispense one raw command payload.
    pub fn command(&mut self, raw: &[u8]) -> Result<DispenseResult> {
        let request = self.ingress.parse(raw)?;
        Ok(self.dispense_local(&request)?)
    }

    /// Rotate the actuator by an angle; negative turns backward.
    pub fn jog(&mut self, degrees: f64) -> std::result::Result<u32, DispenserError> {
        self.arbiter.jog(degrees, Rotation::Forward)
    }

    /// One full sensor reading, independent of the schedule.
    pub fn snapshot(&mut self) -> std::result::Result<SensorSnapshot, DispenserError> {
        self.sensors.snapshot()
    }

    /// Tick until `stop` is set, then shut down.
    pub fn run(&mut self, stop: &AtomicBool) -> std::result::Result<(), DispenserError> {
        if self.state == LoopState::Init {
            self.start()?;
        }
        while !stop.load(Ordering::Relaxed) {
            let started = self.clock.now();
            self.tick()?;
            let spent = self.clock.now().saturating_duration_since(started);
            self.clock.sleep(self.schedule.tick.saturating_sub(spent));
        }
        info!("shutdown requested");
        self.shutdown();
        Ok(())
    }

    /// Release the coils, turn the laser off and close the channel. Each
    /// step is attempted even if an earlier one fails. Safe to call twice.
    pub fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::ShuttingDown;
        if let Err(e) = self.arbiter.release() {
            warn!(error = %e, "coil release on shutdown failed");
        }
        if let Err(e) = self.laser.set_on(false) {
            warn!(error = %map_hw_error(Origin::Emitter, &*e), "laser off failed");
        }
        if let Some(mut ch) = self.channel.take()
            && let Err(e) = ch.close()
        {
            warn!(error = %e, "channel close failed");
        }
        self.state = LoopState::Stopped;
        info!("control loop stopped");
    }

    fn drop_channel(&mut self) {
        if let Some(mut ch) = self.channel.take()
            && let Err(e) = ch.close()
        {
            warn!(error = %e, "channel close failed");
        }
    }
}

fn log_snapshot(s: &SensorSnapshot) {
    info!(
        level = s.water_level,
        temperatures = ?s.temperatures,
        beam = if s.beam_broken { "BROKEN" } else { "OK" },
        "sample"
    );
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a [`ControlLoop`]. All four device groups are required; the
/// channel is optional (local-only operation).
#[derive(Default)]
pub struct ControlLoopBuilder {
    coils: Option<Box<dyn CoilDriver>>,
    temps: Option<Box<dyn TemperatureBus>>,
    level: Option<Box<dyn AnalogInput>>,
    beam: Option<Box<dyn AnalogInput>>,
    laser: Option<Box<dyn Emitter>>,
    channel: Option<Box<dyn Channel>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    stepper: StepperCfg,
    dispense: DispenseCfg,
    sensors: SensorCfg,
    schedule: ScheduleCfg,
    topics: Topics,
}

impl ControlLoopBuilder {
    pub fn with_coils(mut self, coils: impl CoilDriver + 'static) -> Self {
        self.coils = Some(Box::new(coils));
        self
    }

    pub fn with_temperature_bus(mut self, bus: impl TemperatureBus + 'static) -> Self {
        self.temps = Some(Box::new(bus));
        self
    }

    pub fn with_level_sensor(mut self, level: impl AnalogInput + 'static) -> Self {
        self.level = Some(Box::new(level));
        self
    }

    pub fn with_beam_sensor(mut self, beam: impl AnalogInput + 'static) -> Self {
        self.beam = Some(Box::new(beam));
        self
    }

    pub fn with_laser(mut self, laser: impl Emitter + 'static) -> Self {
        self.laser = Some(Box::new(laser));
        self
    }

    pub fn with_channel(mut self, channel: impl Channel + 'static) -> Self {
        self.channel = Some(Box::new(channel));
        self
    }

    /// Attach an optional channel; `None` runs local-only.
    pub fn with_channel_opt(mut self, channel: Option<Box<dyn Channel>>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_stepper(mut self, cfg: StepperCfg) -> Self {
        self.stepper = cfg;
        self
    }

    pub fn with_dispense(mut self, cfg: DispenseCfg) -> Self {
        self.dispense = cfg;
        self
    }

    pub fn with_sensors(mut self, cfg: SensorCfg) -> Self {
        self.sensors = cfg;
        self
    }

    pub fn with_schedule(mut self, cfg: ScheduleCfg) -> Self {
        self.schedule = cfg;
        self
    }

    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    pub fn build(self) -> Result<ControlLoop> {
        let coils = self.coils.ok_or(BuildError::MissingCoils)?;
        let temps = self.temps.ok_or(BuildError::MissingTemperatureBus)?;
        let level = self.level.ok_or(BuildError::MissingLevelSensor)?;
        let beam = self.beam.ok_or(BuildError::MissingBeamSensor)?;
        let laser = self.laser.ok_or(BuildError::MissingLaser)?;

        if !(self.dispense.steps_per_ml.is_finite() && self.dispense.steps_per_ml > 0.0) {
            return Err(BuildError::InvalidConfig("steps_per_ml must be > 0").into());
        }
        if self.schedule.tick.is_zero() {
            return Err(BuildError::InvalidConfig("tick must be > 0").into());
        }
        if self.stepper.steps_per_rotation == 0 {
            return Err(BuildError::InvalidConfig("steps_per_rotation must be > 0").into());
        }

        let clock: Arc<dyn Clock + Send + Sync> =
            self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let sensors = SensorBank::new(temps, level, beam, clock.clone(), self.sensors)?;
        let stepper = StepSequencer::new(coils, clock.clone(), self.stepper);
        let arbiter = DispenseArbiter::new(
            stepper,
            self.dispense.steps_per_ml,
            self.dispense.settle,
            clock.clone(),
        );
        info!(
            steps_per_ml = self.dispense.steps_per_ml,
            max_ml = ?self.dispense.max_ml,
            tick_ms = self.schedule.tick.as_millis() as u64,
            "control loop assembled"
        );
        Ok(ControlLoop {
            state: LoopState::Init,
            sensors,
            arbiter,
            laser,
            channel: self.channel,
            ingress: CommandIngress::new(self.dispense.max_ml),
            telemetry: TelemetryPublisher::new(self.topics),
            schedule: self.schedule,
            timers: ScheduleTimers::new(),
            clock,
        })
    }
}
