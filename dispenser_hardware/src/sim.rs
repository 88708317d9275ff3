//! Simulated rig: coils, two LDR channels, laser and a temperature bus that
//! share one in-memory state.
//!
//! A [`SimRig`] hands out device handles that implement the
//! `dispenser_traits` device traits, and keeps a handle of its own so tests
//! (and `--sim` runs) can script readings, inject faults and inspect what the
//! controller wrote.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use dispenser_traits::{AnalogInput, BoxError, CoilDriver, Emitter, TemperatureBus};
use tracing::trace;

use crate::error::HwError;

/// Upper bound of a 12-bit ADC code.
pub const ADC_MAX: u16 = 4095;

#[derive(Debug, Default)]
struct RigState {
    coils: [bool; 4],
    coil_log: Vec<[bool; 4]>,
    coil_fail_after: Option<usize>,
    level: u16,
    level_fail: bool,
    /// Energized rows per level count of drift; 0 disables drift.
    level_drift_rows: u32,
    drift_rows_seen: u32,
    beam: u16,
    beam_fail: bool,
    laser_on: bool,
    laser_writes: usize,
    temps: BTreeMap<String, f32>,
    temp_fail: Vec<String>,
    conversions: usize,
}

/// Shared simulated hardware.
#[derive(Debug, Clone, Default)]
pub struct SimRig {
    state: Rc<RefCell<RigState>>,
}

impl SimRig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rig whose level reading rises by one count every `rows` energized rows.
    pub fn with_level_drift(rows: u32) -> Self {
        let rig = Self::new();
        rig.state.borrow_mut().level_drift_rows = rows;
        rig
    }

    pub fn coils(&self) -> SimCoils {
        SimCoils {
            state: self.state.clone(),
        }
    }

    pub fn level_sensor(&self) -> SimLevel {
        SimLevel {
            state: self.state.clone(),
        }
    }

    pub fn beam_sensor(&self) -> SimBeam {
        SimBeam {
            state: self.state.clone(),
        }
    }

    pub fn laser(&self) -> SimLaser {
        SimLaser {
            state: self.state.clone(),
        }
    }

    pub fn temperature_bus(&self) -> SimTemperatureBus {
        SimTemperatureBus {
            state: self.state.clone(),
        }
    }

    // ── scripting ────────────────────────────────────────────────────────

    pub fn set_level(&self, raw: u16) {
        self.state.borrow_mut().level = raw.min(ADC_MAX);
    }

    pub fn set_beam(&self, raw: u16) {
        self.state.borrow_mut().beam = raw.min(ADC_MAX);
    }

    pub fn add_probe(&self, id: &str, celsius: f32) {
        self.state.borrow_mut().temps.insert(id.to_string(), celsius);
    }

    /// Fail every coil write after `n` successful ones (None clears).
    pub fn fail_coils_after(&self, n: Option<usize>) {
        self.state.borrow_mut().coil_fail_after = n;
    }

    pub fn fail_level(&self, fail: bool) {
        self.state.borrow_mut().level_fail = fail;
    }

    pub fn fail_beam(&self, fail: bool) {
        self.state.borrow_mut().beam_fail = fail;
    }

    pub fn fail_probe(&self, id: &str) {
        self.state.borrow_mut().temp_fail.push(id.to_string());
    }

    // ── inspection ───────────────────────────────────────────────────────

    /// Every pattern written to the coils, oldest first.
    pub fn coil_log(&self) -> Vec<[bool; 4]> {
        self.state.borrow().coil_log.clone()
    }

    pub fn clear_coil_log(&self) {
        self.state.borrow_mut().coil_log.clear();
    }

    /// Current coil outputs.
    pub fn coils_state(&self) -> [bool; 4] {
        self.state.borrow().coils
    }

    pub fn level(&self) -> u16 {
        self.state.borrow().level
    }

    pub fn laser_is_on(&self) -> bool {
        self.state.borrow().laser_on
    }

    pub fn laser_writes(&self) -> usize {
        self.state.borrow().laser_writes
    }

    pub fn conversions(&self) -> usize {
        self.state.borrow().conversions
    }
}

pub struct SimCoils {
    state: Rc<RefCell<RigState>>,
}

impl CoilDriver for SimCoils {
    fn write(&mut self, pattern: [bool; 4]) -> Result<(), BoxError> {
        let mut s = self.state.borrow_mut();
        if let Some(n) = s.coil_fail_after
            && s.coil_log.len() >= n
        {
            return Err(Box::new(HwError::Injected("coil write")));
        }
        s.coils = pattern;
        s.coil_log.push(pattern);
        if s.level_drift_rows > 0 && pattern.iter().any(|b| *b) {
            s.drift_rows_seen += 1;
            if s.drift_rows_seen >= s.level_drift_rows {
                s.drift_rows_seen = 0;
                s.level = s.level.saturating_add(1).min(ADC_MAX);
            }
        }
        trace!(?pattern, "sim coils");
        Ok(())
    }
}

pub struct SimLevel {
    state: Rc<RefCell<RigState>>,
}

impl AnalogInput for SimLevel {
    fn read(&mut self) -> Result<u16, BoxError> {
        let s = self.state.borrow();
        if s.level_fail {
            return Err(Box::new(HwError::Injected("level read")));
        }
        Ok(s.level)
    }
}

pub struct SimBeam {
    state: Rc<RefCell<RigState>>,
}

impl AnalogInput for SimBeam {
    fn read(&mut self) -> Result<u16, BoxError> {
        let s = self.state.borrow();
        if s.beam_fail {
            return Err(Box::new(HwError::Injected("beam read")));
        }
        Ok(s.beam)
    }
}

pub struct SimLaser {
    state: Rc<RefCell<RigState>>,
}

impl Emitter for SimLaser {
    fn set_on(&mut self, on: bool) -> Result<(), BoxError> {
        let mut s = self.state.borrow_mut();
        s.laser_on = on;
        s.laser_writes += 1;
        Ok(())
    }
}

pub struct SimTemperatureBus {
    state: Rc<RefCell<RigState>>,
}

impl TemperatureBus for SimTemperatureBus {
    fn scan(&mut self) -> Result<Vec<String>, BoxError> {
        Ok(self.state.borrow().temps.keys().cloned().collect())
    }

    fn convert(&mut self) -> Result<(), BoxError> {
        self.state.borrow_mut().conversions += 1;
        Ok(())
    }

    fn read(&mut self, id: &str) -> Result<f32, BoxError> {
        let s = self.state.borrow();
        if s.temp_fail.iter().any(|f| f == id) {
            return Err(Box::new(HwError::Crc(id.to_string())));
        }
        s.temps
            .get(id)
            .copied()
            .ok_or_else(|| Box::new(HwError::SensorMissing(id.to_string())) as BoxError)
    }
}
