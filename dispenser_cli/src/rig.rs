//! Device assembly: the simulated rig or the Raspberry Pi adapters.

use dispenser_config::Config;
use dispenser_hardware::SimRig;
use dispenser_traits::{AnalogInput, CoilDriver, Emitter, TemperatureBus};
use tracing::info;

pub struct Devices {
    pub coils: Box<dyn CoilDriver>,
    pub temps: Box<dyn TemperatureBus>,
    pub level: Box<dyn AnalogInput>,
    pub beam: Box<dyn AnalogInput>,
    pub laser: Box<dyn Emitter>,
}

/// Bench rig: half-full vessel, intact beam, one probe at room temperature.
/// The level creeps up as the plunger moves so dispenses show displacement.
pub fn simulated() -> Devices {
    let rig = SimRig::with_level_drift(40);
    rig.set_level(1500);
    rig.set_beam(1200);
    rig.add_probe("28-00000a1b2c3d", 21.5);
    info!("using simulated rig");
    Devices {
        coils: Box::new(rig.coils()),
        temps: Box::new(rig.temperature_bus()),
        level: Box::new(rig.level_sensor()),
        beam: Box::new(rig.beam_sensor()),
        laser: Box::new(rig.laser()),
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn hardware(cfg: &Config) -> dispenser_core::error::Result<Devices> {
    use dispenser_core::DispenserError;
    use dispenser_hardware::W1Bus;
    use dispenser_hardware::gpio::{GpioCoils, GpioLaser};
    use dispenser_hardware::mcp3208::{AdcChannel, Mcp3208};

    let init = |what: &str, e: dispenser_hardware::HwError| {
        DispenserError::Init(format!("{what}: {e}"))
    };

    let coils = GpioCoils::new(cfg.pins.coils).map_err(|e| init("open coil pins", e))?;
    info!(pins = ?cfg.pins.coils, "stepper initialized");

    let temps = W1Bus::new(&cfg.pins.w1_root);
    info!(root = %cfg.pins.w1_root, "temperature bus initialized");

    let adc = Mcp3208::open(cfg.pins.adc_chip_select).map_err(|e| init("open ADC", e))?;
    let level = AdcChannel::new(adc.clone(), cfg.pins.level_channel)
        .map_err(|e| init("level channel", e))?;
    info!(channel = cfg.pins.level_channel, "level sensor initialized");

    let beam =
        AdcChannel::new(adc, cfg.pins.beam_channel).map_err(|e| init("beam channel", e))?;
    let laser = GpioLaser::new(cfg.pins.laser).map_err(|e| init("open laser pin", e))?;
    info!(
        channel = cfg.pins.beam_channel,
        laser = cfg.pins.laser,
        "break-beam initialized"
    );

    Ok(Devices {
        coils: Box::new(coils),
        temps: Box::new(temps),
        level: Box::new(level),
        beam: Box::new(beam),
        laser: Box::new(laser),
    })
}

/// Pick the device backend. Builds without the `hardware` feature always
/// get the simulated rig.
pub fn select(cfg: &Config, sim: bool) -> dispenser_core::error::Result<Devices> {
    if sim {
        return Ok(simulated());
    }
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    {
        hardware(cfg)
    }
    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    {
        let _ = cfg;
        tracing::warn!("built without hardware support; falling back to the simulated rig");
        Ok(simulated())
    }
}
