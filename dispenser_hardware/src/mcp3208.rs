//! MCP3208 12-bit SPI ADC. The Pi has no analog inputs, so both LDRs sit on
//! channels of one converter; each channel is handed out as its own
//! `AnalogInput`.
use std::cell::RefCell;
use std::rc::Rc;

use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::trace;

use dispenser_traits::{AnalogInput, BoxError};

use crate::error::{HwError, Result};

const SPI_CLOCK_HZ: u32 = 1_000_000;

pub struct Mcp3208 {
    spi: Spi,
}

impl Mcp3208 {
    pub fn open(chip_select: u8) -> Result<Rc<RefCell<Self>>> {
        let ss = match chip_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            other => return Err(HwError::Spi(format!("unsupported chip select {other}"))),
        };
        let spi = Spi::new(Bus::Spi0, ss, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        Ok(Rc::new(RefCell::new(Self { spi })))
    }

    /// Single-ended conversion on `channel` (0..=7).
    pub fn read_channel(&mut self, channel: u8) -> Result<u16> {
        if channel > 7 {
            return Err(HwError::AdcChannel(channel));
        }
        // start bit + single-ended, then D2..D0 straddling the first two bytes
        let tx = [0x06 | (channel >> 2), (channel & 0x03) << 6, 0x00];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        let value = (u16::from(rx[1] & 0x0F) << 8) | u16::from(rx[2]);
        trace!(channel, value, "mcp3208 read");
        Ok(value)
    }
}

/// One channel of a shared converter.
pub struct AdcChannel {
    adc: Rc<RefCell<Mcp3208>>,
    channel: u8,
}

impl AdcChannel {
    pub fn new(adc: Rc<RefCell<Mcp3208>>, channel: u8) -> Result<Self> {
        if channel > 7 {
            return Err(HwError::AdcChannel(channel));
        }
        Ok(Self { adc, channel })
    }
}

impl AnalogInput for AdcChannel {
    fn read(&mut self) -> std::result::Result<u16, BoxError> {
        Ok(self.adc.borrow_mut().read_channel(self.channel)?)
    }
}
