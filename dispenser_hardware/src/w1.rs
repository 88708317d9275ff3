//! Linux sysfs one-wire bus (kernel `w1_therm` driver).
//!
//! Probes appear as `<root>/<family>-<serial>/w1_slave`. Reading that file
//! makes the kernel run a conversion and returns two lines:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! `convert()` issues a bulk conversion through the bus master's
//! `therm_bulk_read` attribute when the kernel exposes it; otherwise it is a
//! no-op and each read converts on its own.
use std::fs;
use std::path::{Path, PathBuf};

use dispenser_traits::{BoxError, TemperatureBus};
use tracing::{debug, trace};

use crate::error::{HwError, Result};

/// Default sysfs mount point of the one-wire device tree.
pub const DEFAULT_W1_ROOT: &str = "/sys/bus/w1/devices";

/// Family codes of the DS18x20 thermometers.
const THERM_FAMILIES: [&str; 5] = ["10", "22", "28", "3b", "42"];

#[derive(Debug, Clone)]
pub struct W1Bus {
    root: PathBuf,
}

impl Default for W1Bus {
    fn default() -> Self {
        Self::new(DEFAULT_W1_ROOT)
    }
}

impl W1Bus {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn scan_probes(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let Some((family, _serial)) = name.split_once('-') else {
                continue;
            };
            if THERM_FAMILIES.contains(&family.to_ascii_lowercase().as_str()) {
                ids.push(name);
            }
        }
        ids.sort();
        debug!(count = ids.len(), root = %self.root.display(), "w1 scan");
        Ok(ids)
    }

    fn bulk_convert(&self) -> Result<()> {
        let trigger = self.root.join("w1_bus_master1").join("therm_bulk_read");
        if trigger.exists() {
            fs::write(&trigger, "trigger\n")?;
            trace!("w1 bulk conversion triggered");
        }
        Ok(())
    }

    fn read_probe(&self, id: &str) -> Result<f32> {
        let path = self.root.join(id).join("w1_slave");
        if !path.exists() {
            return Err(HwError::SensorMissing(id.to_string()));
        }
        let text = fs::read_to_string(&path)?;
        parse_w1_slave(id, &text)
    }
}

/// Parse the two-line `w1_slave` format into degrees Celsius.
pub fn parse_w1_slave(id: &str, text: &str) -> Result<f32> {
    let mut lines = text.lines();
    let crc_line = lines.next().unwrap_or_default();
    if !crc_line.trim_end().ends_with("YES") {
        return Err(HwError::Crc(id.to_string()));
    }
    let data_line = lines.next().unwrap_or_default();
    let Some((_, milli)) = data_line.rsplit_once("t=") else {
        return Err(HwError::Malformed {
            id: id.to_string(),
            detail: "missing t= field".to_string(),
        });
    };
    let milli: i32 = milli.trim().parse().map_err(|e| HwError::Malformed {
        id: id.to_string(),
        detail: format!("{e}"),
    })?;
    Ok(milli as f32 / 1000.0)
}

impl TemperatureBus for W1Bus {
    fn scan(&mut self) -> std::result::Result<Vec<String>, BoxError> {
        Ok(self.scan_probes()?)
    }

    fn convert(&mut self) -> std::result::Result<(), BoxError> {
        Ok(self.bulk_convert()?)
    }

    fn read(&mut self, id: &str) -> std::result::Result<f32, BoxError> {
        Ok(self.read_probe(id)?)
    }
}
