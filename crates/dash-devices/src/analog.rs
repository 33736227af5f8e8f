//! Analog input through an 8-channel, 12-bit SPI ADC.
//!
//! The SPI transfer and the chip's command framing live behind
//! [`AdcDevice`]; this module validates channels and converts raw codes to
//! volts against the reference voltage.

use dash_common::{DashError, DashResult, ANALOG_CHANNELS};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Full-scale count of a 12-bit converter.
pub const ADC_FULL_SCALE: u16 = 4096;

/// Mask selecting the 12 data bits of a conversion result.
const CODE_MASK: u16 = 0x0FFF;

/// Raw ADC access.
pub trait AdcDevice: Send {
    /// Perform one single-ended conversion and return the raw code.
    ///
    /// `channel` has already been validated to be in `0..8`.
    fn read_code(&mut self, channel: u8) -> DashResult<u16>;

    /// Release the SPI handle.
    fn close(&mut self) -> DashResult<()> {
        Ok(())
    }
}

/// One converted sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalogReading {
    /// ADC input channel.
    pub channel: u8,
    /// Raw 12-bit code.
    pub code: u16,
    /// Code converted to volts.
    pub volts: f64,
}

/// Voltage reader over an [`AdcDevice`].
#[derive(Debug)]
pub struct AnalogInput<D> {
    device: D,
    ref_volt: f64,
}

impl<D: AdcDevice> AnalogInput<D> {
    /// Wrap a device with the given reference voltage.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Config`] if `ref_volt` is not a finite positive number.
    pub fn new(device: D, ref_volt: f64) -> DashResult<Self> {
        if !(ref_volt.is_finite() && ref_volt > 0.0) {
            return Err(DashError::Config(format!(
                "ADC reference voltage must be positive, got {ref_volt}"
            )));
        }
        info!(ref_volt, "Analog input opened");
        Ok(Self { device, ref_volt })
    }

    /// Convert a raw code to volts.
    #[must_use]
    pub fn code_to_volts(&self, code: u16) -> f64 {
        f64::from(code & CODE_MASK) * self.ref_volt / f64::from(ADC_FULL_SCALE)
    }

    /// Read one channel.
    ///
    /// # Errors
    ///
    /// - [`DashError::BadAnalogChannel`] if `channel` is not in `0..8`
    /// - any error reported by the device
    pub fn read(&mut self, channel: u8) -> DashResult<AnalogReading> {
        if channel >= ANALOG_CHANNELS {
            return Err(DashError::BadAnalogChannel(channel));
        }
        let code = self.device.read_code(channel)? & CODE_MASK;
        let volts = self.code_to_volts(code);
        debug!(channel, code, volts, "Analog sample");
        Ok(AnalogReading {
            channel,
            code,
            volts,
        })
    }

    /// Read one channel and return only the voltage.
    ///
    /// # Errors
    ///
    /// Same as [`AnalogInput::read`].
    pub fn read_voltage(&mut self, channel: u8) -> DashResult<f64> {
        self.read(channel).map(|r| r.volts)
    }

    /// Read several channels in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Same as [`AnalogInput::read`].
    pub fn read_many(&mut self, channels: &[u8]) -> DashResult<Vec<AnalogReading>> {
        channels.iter().map(|&ch| self.read(ch)).collect()
    }

    /// Reference voltage.
    #[must_use]
    pub fn ref_volt(&self) -> f64 {
        self.ref_volt
    }

    /// Close the underlying device.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the device.
    pub fn close(&mut self) -> DashResult<()> {
        info!("Analog input closed");
        self.device.close()
    }
}

/// Simulated ADC returning configurable codes.
#[derive(Debug, Clone)]
pub struct SimulatedAdc {
    codes: [u16; ANALOG_CHANNELS as usize],
    closed: bool,
}

impl Default for SimulatedAdc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAdc {
    /// Create an ADC reading mid-scale on every channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            codes: [ADC_FULL_SCALE / 2; ANALOG_CHANNELS as usize],
            closed: false,
        }
    }

    /// Set the code returned for a channel (for testing).
    pub fn set_code(&mut self, channel: u8, code: u16) {
        if let Some(slot) = self.codes.get_mut(usize::from(channel)) {
            *slot = code;
        }
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AdcDevice for SimulatedAdc {
    fn read_code(&mut self, channel: u8) -> DashResult<u16> {
        if self.closed {
            return Err(DashError::Device("ADC is closed".into()));
        }
        self.codes
            .get(usize::from(channel))
            .copied()
            .ok_or(DashError::BadAnalogChannel(channel))
    }

    fn close(&mut self) -> DashResult<()> {
        self.closed = true;
        Ok(())
    }
}
