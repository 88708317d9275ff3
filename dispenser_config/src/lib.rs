#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and steps-per-ml calibration parsing for the dispenser.
//!
//! - `Config` and its sections are deserialized from TOML; every section has
//!   defaults matching the reference rig, and `validate()` rejects
//!   out-of-range values with field-named messages.
//! - The calibration CSV loader enforces headers and refits after dropping
//!   outliers before deriving steps per millilitre.
use serde::Deserialize;

/// Default sysfs root of the one-wire bus.
pub const DEFAULT_W1_ROOT: &str = "/sys/bus/w1/devices";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttCfg {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    /// 0 disables keep-alive. Dispenses block the loop that services pings,
    /// so a non-zero value must outlast the longest dispense.
    pub keep_alive_s: u64,
    /// How long to wait for the broker's CONNACK before going local-only.
    pub connect_timeout_ms: u64,
}

impl Default for MqttCfg {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "rasp_liquid_system".to_string(),
            keep_alive_s: 0,
            connect_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Topics {
    pub command: String,
    pub status: String,
    pub level: String,
    pub temperature: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            command: "liquid_system/command".to_string(),
            status: "liquid_system/status".to_string(),
            level: "liquid_system/level".to_string(),
            temperature: "liquid_system/temperature".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Pins {
    /// Coil outputs IN1..IN4 (BCM numbering).
    pub coils: [u8; 4],
    pub laser: u8,
    /// SPI chip select of the ADC carrying both LDRs.
    pub adc_chip_select: u8,
    pub level_channel: u8,
    pub beam_channel: u8,
    /// sysfs root of the one-wire bus.
    pub w1_root: String,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            coils: [16, 17, 5, 18],
            laser: 15,
            adc_chip_select: 0,
            level_channel: 0,
            beam_channel: 1,
            w1_root: DEFAULT_W1_ROOT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    /// 8-row table, smaller increments, tolerates 1 ms rows
    #[default]
    Half,
    /// 4-row table, wants >= 10 ms rows
    Full,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StepperCfg {
    pub mode: StepMode,
    /// Delay after each written row (ms).
    pub delay_ms: u64,
    /// Table cycles per output-shaft revolution.
    pub steps_per_rotation: u32,
}

impl Default for StepperCfg {
    fn default() -> Self {
        Self {
            mode: StepMode::Half,
            delay_ms: 1,
            steps_per_rotation: 509,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DispenseCfg {
    pub steps_per_ml: f64,
    /// Wait after motion before the second level read (ms).
    pub settle_ms: u64,
    /// Optional upper bound on a single request.
    pub max_ml: Option<f64>,
}

impl Default for DispenseCfg {
    fn default() -> Self {
        Self {
            steps_per_ml: 170.0,
            settle_ms: 1000,
            max_ml: Some(50.0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorsCfg {
    /// Raw beam reading above which the beam counts as broken.
    pub beam_threshold: u16,
    /// Width of the band below the threshold a broken beam must fall under
    /// before it reads as restored. 0 = plain threshold.
    pub beam_hysteresis: u16,
    /// Conversion wait of the temperature probes (ms).
    pub temp_settle_ms: u64,
}

impl Default for SensorsCfg {
    fn default() -> Self {
        Self {
            beam_threshold: 4000,
            beam_hysteresis: 0,
            temp_settle_ms: 750,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleCfg {
    pub tick_ms: u64,
    pub sample_ms: u64,
    pub publish_ms: u64,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            sample_ms: 1000,
            publish_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttCfg,
    pub topics: Topics,
    pub pins: Pins,
    pub stepper: StepperCfg,
    pub dispense: DispenseCfg,
    pub sensors: SensorsCfg,
    pub schedule: ScheduleCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Wall time of a `max_ml` dispense including the settle pause, if capped.
    pub fn longest_dispense_ms(&self) -> Option<f64> {
        let rows = match self.stepper.mode {
            StepMode::Half => 8.0,
            StepMode::Full => 4.0,
        };
        self.dispense.max_ml.map(|max| {
            (max * self.dispense.steps_per_ml).trunc() * rows * self.stepper.delay_ms as f64
                + self.dispense.settle_ms as f64
        })
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // MQTT
        if self.mqtt.broker.trim().is_empty() {
            eyre::bail!("mqtt.broker must not be empty");
        }
        if self.mqtt.port == 0 {
            eyre::bail!("mqtt.port must be > 0");
        }
        if self.mqtt.client_id.trim().is_empty() {
            eyre::bail!("mqtt.client_id must not be empty");
        }
        if self.mqtt.keep_alive_s != 0 && self.mqtt.keep_alive_s < 5 {
            eyre::bail!("mqtt.keep_alive_s must be 0 or >= 5");
        }
        if self.mqtt.connect_timeout_ms == 0 {
            eyre::bail!("mqtt.connect_timeout_ms must be >= 1");
        }

        // Topics
        for (name, topic) in [
            ("command", &self.topics.command),
            ("status", &self.topics.status),
            ("level", &self.topics.level),
            ("temperature", &self.topics.temperature),
        ] {
            if topic.trim().is_empty() {
                eyre::bail!("topics.{name} must not be empty");
            }
            if name != "command" && (topic.contains('#') || topic.contains('+')) {
                eyre::bail!("topics.{name} must not contain wildcards");
            }
        }

        // Pins
        let mut coils = self.pins.coils.to_vec();
        coils.sort_unstable();
        coils.dedup();
        if coils.len() != 4 {
            eyre::bail!("pins.coils must name four distinct pins");
        }
        if self.pins.coils.iter().any(|p| *p > 27) || self.pins.laser > 27 {
            eyre::bail!("pins must be BCM GPIO numbers in 0..=27");
        }
        if self.pins.coils.contains(&self.pins.laser) {
            eyre::bail!("pins.laser must not share a coil pin");
        }
        if self.pins.adc_chip_select > 1 {
            eyre::bail!("pins.adc_chip_select must be 0 or 1");
        }
        if self.pins.level_channel > 7 || self.pins.beam_channel > 7 {
            eyre::bail!("pins.level_channel and pins.beam_channel must be in 0..=7");
        }
        if self.pins.level_channel == self.pins.beam_channel {
            eyre::bail!("pins.level_channel and pins.beam_channel must differ");
        }

        // Stepper
        if self.stepper.delay_ms == 0 {
            eyre::bail!("stepper.delay_ms must be >= 1");
        }
        if self.stepper.delay_ms > 1000 {
            eyre::bail!("stepper.delay_ms is unreasonably large (>1s per row)");
        }
        if self.stepper.steps_per_rotation == 0 {
            eyre::bail!("stepper.steps_per_rotation must be > 0");
        }

        // Dispense
        if !(self.dispense.steps_per_ml.is_finite() && self.dispense.steps_per_ml > 0.0) {
            eyre::bail!("dispense.steps_per_ml must be a finite value > 0");
        }
        if self.dispense.settle_ms > 60 * 1000 {
            eyre::bail!("dispense.settle_ms is unreasonably large (>1min)");
        }
        if let Some(max) = self.dispense.max_ml
            && !(max.is_finite() && max > 0.0)
        {
            eyre::bail!("dispense.max_ml must be a finite value > 0");
        }
        if self.mqtt.keep_alive_s != 0 {
            // brokers drop a client after 1.5x keep-alive without traffic
            let grace_ms = self.mqtt.keep_alive_s as f64 * 1500.0;
            match self.longest_dispense_ms() {
                None => {
                    eyre::bail!("mqtt.keep_alive_s must be 0 when dispense.max_ml is unset")
                }
                Some(worst) if worst >= grace_ms => eyre::bail!(
                    "mqtt.keep_alive_s must be 0 or outlast the longest dispense (~{} s)",
                    (worst / 1000.0).ceil()
                ),
                Some(_) => {}
            }
        }

        // Sensors
        if self.sensors.beam_threshold > 4095 {
            eyre::bail!("sensors.beam_threshold must be in 0..=4095");
        }
        if self.sensors.beam_hysteresis > self.sensors.beam_threshold {
            eyre::bail!("sensors.beam_hysteresis must be <= sensors.beam_threshold");
        }
        if self.sensors.temp_settle_ms > 10 * 1000 {
            eyre::bail!("sensors.temp_settle_ms is unreasonably large (>10s)");
        }

        // Schedule
        if self.schedule.tick_ms == 0 {
            eyre::bail!("schedule.tick_ms must be >= 1");
        }
        if self.schedule.sample_ms < self.schedule.tick_ms {
            eyre::bail!("schedule.sample_ms must be >= schedule.tick_ms");
        }
        if self.schedule.publish_ms < self.schedule.tick_ms {
            eyre::bail!("schedule.publish_ms must be >= schedule.tick_ms");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

/// Calibration CSV schema.
///
/// Expected headers:
/// steps,ml
///
/// Each row is one measured run: the step count issued and the volume that
/// actually moved.
///
/// Example:
/// steps,ml
/// 509,3.0
/// 1018,6.1
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub steps: i64,
    pub ml: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub steps_per_ml: f64,
}

impl Calibration {
    /// Fit steps = a*ml + b by least squares and keep the slope `a` as steps
    /// per millilitre. The intercept absorbs plunger backlash and is dropped.
    pub fn from_rows(rows: Vec<CalibrationRow>) -> eyre::Result<Self> {
        if rows.len() < 2 {
            eyre::bail!("calibration requires at least two rows, got {}", rows.len());
        }

        for i in 1..rows.len() {
            let Some(d) = rows[i].steps.checked_sub(rows[i - 1].steps) else {
                eyre::bail!(
                    "calibration step counts overflow between rows {} and {}",
                    i - 1,
                    i
                );
            };
            if d == 0 {
                eyre::bail!(
                    "calibration rows have duplicate step counts at index {} and {}",
                    i - 1,
                    i
                );
            }
            if d < 0 {
                eyre::bail!("calibration step counts must be strictly increasing");
            }
        }
        if rows.iter().any(|r| !r.ml.is_finite() || r.ml < 0.0) {
            eyre::bail!("calibration ml values must be finite and >= 0");
        }

        // x = ml, y = steps
        let pts: Vec<(f64, f64)> = rows.iter().map(|r| (r.ml, r.steps as f64)).collect();
        let (a0, b0) = fit(&pts)?;

        let sumsq: f64 = pts
            .iter()
            .map(|(x, y)| {
                let r = y - (a0 * x + b0);
                r * r
            })
            .sum();
        let rms = (sumsq / pts.len() as f64).sqrt();

        // Drop rows with |residual| > 2 sigma and refit when at least two remain.
        let (a, _b) = robust_refit(&pts, a0, b0, rms, 2.0).unwrap_or((a0, b0));
        if a <= 0.0 {
            eyre::bail!("calibration produced a non-positive steps-per-ml slope");
        }
        Ok(Calibration { steps_per_ml: a })
    }
}

fn fit(pts: &[(f64, f64)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (x, y) in pts {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("calibration cannot determine slope (all ml values equal)");
    }
    let a = sxy / sxx;
    if !a.is_finite() {
        eyre::bail!("calibration produced non-finite slope");
    }
    Ok((a, mean_y - a * mean_x))
}

/// Single-pass outlier rejection around y = a0*x + b0 followed by a refit on
/// the inliers. Returns None when nothing was rejected, fewer than two rows
/// survive, or the refit is degenerate; the caller keeps (a0, b0) then.
fn robust_refit(pts: &[(f64, f64)], a0: f64, b0: f64, rms: f64, k: f64) -> Option<(f64, f64)> {
    if !(rms.is_finite() && rms > 0.0) {
        return None;
    }
    let thr = k * rms;
    let inliers: Vec<(f64, f64)> = pts
        .iter()
        .copied()
        .filter(|(x, y)| (y - (a0 * x + b0)).abs() <= thr)
        .collect();
    if inliers.len() < 2 || inliers.len() == pts.len() {
        return None;
    }
    fit(&inliers).ok()
}

impl TryFrom<Vec<CalibrationRow>> for Calibration {
    type Error = eyre::Report;
    fn try_from(rows: Vec<CalibrationRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<Calibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["steps", "ml"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'steps,ml', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    Calibration::try_from(rows)
}
