//! On-demand sampling of the temperature probes, the level LDR and the
//! break-beam LDR.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dispenser_traits::{AnalogInput, Clock, TemperatureBus};
use tracing::{debug, warn};

use crate::config::SensorCfg;
use crate::error::DispenserError;
use crate::hw_error::{Origin, map_hw_error};
use crate::types::SensorSnapshot;

/// Largest reading of the 12-bit converter.
pub const ADC_FULL_SCALE: u16 = 4095;

pub struct SensorBank {
    temps: Box<dyn TemperatureBus>,
    probes: Vec<String>,
    level: Box<dyn AnalogInput>,
    beam: Box<dyn AnalogInput>,
    beam_threshold: u16,
    beam_hysteresis: u16,
    beam_latched: bool,
    temp_settle: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SensorBank {
    /// Scans the temperature bus once; probes appearing later are ignored.
    pub fn new(
        mut temps: Box<dyn TemperatureBus>,
        level: Box<dyn AnalogInput>,
        beam: Box<dyn AnalogInput>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: SensorCfg,
    ) -> Result<Self, DispenserError> {
        let probes = temps
            .scan()
            .map_err(|e| DispenserError::Init(format!("temperature bus scan: {e}")))?;
        debug!(count = probes.len(), ?probes, "temperature probes");
        Ok(Self {
            temps,
            probes,
            level,
            beam,
            beam_threshold: cfg.beam_threshold,
            beam_hysteresis: cfg.beam_hysteresis,
            beam_latched: false,
            temp_settle: cfg.temp_settle,
            clock,
        })
    }

    /// Ids found at startup.
    pub fn probes(&self) -> &[String] {
        &self.probes
    }

    /// Convert, wait, then read every probe. A probe that fails to read is
    /// left out of the map.
    pub fn read_temperatures(&mut self) -> BTreeMap<String, f32> {
        let mut out = BTreeMap::new();
        if self.probes.is_empty() {
            return out;
        }
        if let Err(e) = self.temps.convert() {
            warn!(error = %e, "temperature conversion failed");
            return out;
        }
        self.clock.sleep(self.temp_settle);
        for id in &self.probes {
            match self.temps.read(id) {
                Ok(c) => {
                    out.insert(id.clone(), c);
                }
                Err(e) => warn!(probe = %id, error = %e, "temperature read failed"),
            }
        }
        out
    }

    /// Raw level reading; higher is darker.
    pub fn read_water_level(&mut self) -> Result<u16, DispenserError> {
        let raw = self
            .level
            .read()
            .map_err(|e| map_hw_error(Origin::Sensor, &*e))?;
        Ok(raw.min(ADC_FULL_SCALE))
    }

    /// Beam state. Breaks above the threshold; with a hysteresis band it
    /// stays broken until the reading drops to `threshold - hysteresis`.
    pub fn is_beam_broken(&mut self) -> Result<bool, DispenserError> {
        let raw = self
            .beam
            .read()
            .map_err(|e| map_hw_error(Origin::Sensor, &*e))?
            .min(ADC_FULL_SCALE);
        let release_at = self.beam_threshold.saturating_sub(self.beam_hysteresis);
        self.beam_latched = if self.beam_latched {
            raw > release_at
        } else {
            raw > self.beam_threshold
        };
        Ok(self.beam_latched)
    }

    /// Read everything. A failed level or beam read fails the snapshot.
    pub fn snapshot(&mut self) -> Result<SensorSnapshot, DispenserError> {
        let temperatures = self.read_temperatures();
        let water_level = self.read_water_level()?;
        let beam_broken = self.is_beam_broken()?;
        Ok(SensorSnapshot {
            temperatures,
            water_level,
            beam_broken,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispenser_hardware::SimRig;
    use dispenser_traits::ManualClock;
    use rstest::rstest;

    fn bank(rig: &SimRig, hysteresis: u16) -> (SensorBank, ManualClock) {
        let clock = ManualClock::new();
        let cfg = SensorCfg {
            beam_hysteresis: hysteresis,
            ..SensorCfg::default()
        };
        let bank = SensorBank::new(
            Box::new(rig.temperature_bus()),
            Box::new(rig.level_sensor()),
            Box::new(rig.beam_sensor()),
            Arc::new(clock.clone()),
            cfg,
        )
        .unwrap();
        (bank, clock)
    }

    #[test]
    fn no_probes_means_no_conversion() {
        let rig = SimRig::new();
        let (mut b, clock) = bank(&rig, 0);
        assert!(b.read_temperatures().is_empty());
        assert_eq!(rig.conversions(), 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn conversion_waits_and_failing_probe_is_omitted() {
        let rig = SimRig::new();
        rig.add_probe("28-a", 21.5);
        rig.add_probe("28-b", 19.0);
        let (mut b, clock) = bank(&rig, 0);
        rig.fail_probe("28-b");
        let t = b.read_temperatures();
        assert_eq!(t.len(), 1);
        assert_eq!(t["28-a"], 21.5);
        assert_eq!(rig.conversions(), 1);
        assert_eq!(clock.elapsed(), Duration::from_millis(750));
    }

    #[test]
    fn probes_added_after_scan_are_ignored() {
        let rig = SimRig::new();
        let (mut b, _) = bank(&rig, 0);
        rig.add_probe("28-late", 30.0);
        assert!(b.read_temperatures().is_empty());
    }

    #[rstest]
    #[case(4000, false)]
    #[case(4001, true)]
    #[case(0, false)]
    #[case(4095, true)]
    fn beam_threshold_without_hysteresis(#[case] raw: u16, #[case] broken: bool) {
        let rig = SimRig::new();
        let (mut b, _) = bank(&rig, 0);
        rig.set_beam(raw);
        assert_eq!(b.is_beam_broken().unwrap(), broken);
    }

    #[test]
    fn hysteresis_holds_until_release_level() {
        let rig = SimRig::new();
        let (mut b, _) = bank(&rig, 100);
        rig.set_beam(4050);
        assert!(b.is_beam_broken().unwrap());
        rig.set_beam(3950);
        assert!(b.is_beam_broken().unwrap());
        rig.set_beam(3900);
        assert!(!b.is_beam_broken().unwrap());
        rig.set_beam(3990);
        assert!(!b.is_beam_broken().unwrap());
    }

    #[test]
    fn snapshot_fails_on_level_error() {
        let rig = SimRig::new();
        let (mut b, _) = bank(&rig, 0);
        rig.set_level(1234);
        let s = b.snapshot().unwrap();
        assert_eq!(s.water_level, 1234);
        assert!(!s.beam_broken);
        rig.fail_level(true);
        assert!(matches!(b.snapshot(), Err(DispenserError::Sensor(_))));
    }
}
