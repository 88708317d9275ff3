//! Subcommand execution: config mapping, loop assembly and output.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dispenser_config::{Calibration, Config};
use dispenser_core::config::{DispenseCfg, ScheduleCfg, SensorCfg, StepperCfg, Topics};
use dispenser_core::error::Result;
use dispenser_core::{
    ControlLoop, DispenseRequest, Direction, ParseError, SensorSnapshot, StatusMessage,
};
use dispenser_traits::Channel;
use serde_json::json;
use tracing::{info, warn};

use crate::mqtt::MqttChannel;
use crate::rig;

/// Build a control loop from the config, the chosen devices and an
/// optional channel. Calibration, when given, replaces `steps_per_ml`.
pub fn assemble(
    cfg: &Config,
    calib: Option<&Calibration>,
    sim: bool,
    channel: Option<Box<dyn Channel>>,
) -> Result<ControlLoop> {
    let devices = rig::select(cfg, sim)?;
    let mut dispense = DispenseCfg::from(&cfg.dispense);
    if let Some(c) = calib {
        info!(
            steps_per_ml = c.steps_per_ml,
            configured = cfg.dispense.steps_per_ml,
            "calibration overrides steps_per_ml"
        );
        dispense.steps_per_ml = c.steps_per_ml;
    }
    ControlLoop::builder()
        .with_coils(devices.coils)
        .with_temperature_bus(devices.temps)
        .with_level_sensor(devices.level)
        .with_beam_sensor(devices.beam)
        .with_laser(devices.laser)
        .with_channel_opt(channel)
        .with_stepper(StepperCfg::from(&cfg.stepper))
        .with_dispense(dispense)
        .with_sensors(SensorCfg::from(&cfg.sensors))
        .with_schedule(ScheduleCfg::from(&cfg.schedule))
        .with_topics(Topics::from(&cfg.topics))
        .build()
}

pub fn run(
    cfg: &Config,
    calib: Option<&Calibration>,
    sim: bool,
    offline: bool,
    stop: &AtomicBool,
) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        sim,
        offline,
        broker = %cfg.mqtt.broker,
        "initializing liquid dispensing system"
    );
    let channel: Option<Box<dyn Channel>> = if offline {
        info!("offline: no broker connection");
        None
    } else {
        match MqttChannel::connect(&cfg.mqtt, &cfg.topics.command) {
            Ok(ch) => Some(Box::new(ch)),
            Err(e) => {
                warn!(error = %e, "mqtt unavailable; running local-only");
                None
            }
        }
    };
    let mut control = assemble(cfg, calib, sim, channel)?;
    control.run(stop)?;
    Ok(())
}

/// One local dispense. Returns the status message as JSON.
pub fn dispense(
    cfg: &Config,
    calib: Option<&Calibration>,
    sim: bool,
    ml: f64,
    pull: bool,
) -> Result<String> {
    if let Some(max) = cfg.dispense.max_ml
        && ml > max
    {
        return Err(ParseError::TooLarge { ml, max }.into());
    }
    let direction = if pull { Direction::Pull } else { Direction::Push };
    let request = DispenseRequest::new(ml, direction)?;
    let mut control = assemble(cfg, calib, sim, None)?;
    let outcome = control.dispense_local(&request);
    control.shutdown();
    let result = outcome?;
    info!(
        ml = result.volume_ml,
        steps = result.steps,
        direction = result.direction.as_str(),
        displacement = result.displacement,
        "dispense complete"
    );
    Ok(serde_json::to_string(&StatusMessage::from(&result))?)
}

/// One sensor snapshot, rendered for humans or as JSON.
pub fn self_check(cfg: &Config, sim: bool, as_json: bool) -> Result<String> {
    let mut control = assemble(cfg, None, sim, None)?;
    let outcome = control.snapshot();
    control.shutdown();
    let snap = outcome?;
    Ok(if as_json {
        snapshot_json(&snap).to_string()
    } else {
        let temps = if snap.temperatures.is_empty() {
            "none".to_string()
        } else {
            snap.temperatures
                .iter()
                .map(|(id, c)| format!("{id}={c:.2}C"))
                .collect::<Vec<_>>()
                .join(" ")
        };
        format!(
            "OK level={} beam={} temperatures: {temps}",
            snap.water_level,
            if snap.beam_broken { "BROKEN" } else { "OK" }
        )
    })
}

fn snapshot_json(s: &SensorSnapshot) -> serde_json::Value {
    json!({
        "water_level": s.water_level,
        "beam_broken": s.beam_broken,
        "temperatures": s.temperatures,
    })
}

pub fn jog(cfg: &Config, sim: bool, degrees: f64) -> Result<u32> {
    let mut control = assemble(cfg, None, sim, None)?;
    let outcome = control.jog(degrees);
    control.shutdown();
    Ok(outcome?)
}

/// Ctrl-C sets the returned flag; the loop stops after its current tick.
pub fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(stop)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn unreachable_broker_falls_back_to_local_only() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut cfg = Config::default();
        cfg.mqtt.broker = "127.0.0.1".into();
        cfg.mqtt.port = port;
        cfg.mqtt.connect_timeout_ms = 500;
        cfg.sensors.temp_settle_ms = 0;

        run(&cfg, None, true, false, &AtomicBool::new(true)).unwrap();
    }
}
