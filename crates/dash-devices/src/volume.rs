//! Eight-channel digital volume chip.
//!
//! The chip is written over a two-wire, bit-banged interface whose timing
//! is fixed by the datasheet; that lives behind [`VolumeChip`]. This module
//! keeps the per-channel levels, validates requests and avoids redundant
//! writes.

use dash_common::{DashError, DashResult, VolumeConfig, VOLUME_CHANNELS};
use tracing::{debug, info};

/// Attenuation steps supported by the chip (0 = no attenuation).
pub const MAX_LEVEL: u8 = 0x7F;

/// Register-level access to the chip.
pub trait VolumeChip: Send {
    /// Write `data` into the register selected by `register`.
    fn write(&mut self, register: u8, data: u8) -> DashResult<()>;
}

/// Per-channel volume state over a [`VolumeChip`].
#[derive(Debug)]
pub struct VolumeControl<C> {
    chip: C,
    /// Last value written per channel; `None` until first written.
    levels: [Option<u8>; VOLUME_CHANNELS],
}

impl<C: VolumeChip> VolumeControl<C> {
    /// Wrap a chip. Nothing is written until a level is set.
    #[must_use]
    pub fn new(chip: C) -> Self {
        Self {
            chip,
            levels: [None; VOLUME_CHANNELS],
        }
    }

    fn register_for(channel: usize) -> DashResult<u8> {
        if channel >= VOLUME_CHANNELS {
            return Err(DashError::Device(format!(
                "volume channel {channel} out of range (must be 0-{})",
                VOLUME_CHANNELS - 1
            )));
        }
        // Bounded by VOLUME_CHANNELS above
        u8::try_from(channel).map_err(|_| DashError::Device("volume channel overflow".into()))
    }

    /// Set one channel's attenuation, clamped to [`MAX_LEVEL`].
    ///
    /// Returns `true` if the chip was written, `false` if the channel
    /// already had this level.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Device`] for an out-of-range channel or a failed write.
    pub fn set_level(&mut self, channel: usize, level: u8) -> DashResult<bool> {
        let register = Self::register_for(channel)?;
        let level = level.min(MAX_LEVEL);
        if self.levels[channel] == Some(level) {
            return Ok(false);
        }

        self.chip.write(register, level)?;
        self.levels[channel] = Some(level);
        debug!(channel, level, "Volume level written");
        Ok(true)
    }

    /// Apply a list of levels starting at channel 0.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn apply(&mut self, levels: &[u8]) -> DashResult<usize> {
        let mut written = 0;
        for (channel, &level) in levels.iter().enumerate() {
            if self.set_level(channel, level)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Apply the startup levels from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn apply_config(&mut self, config: &VolumeConfig) -> DashResult<usize> {
        let written = self.apply(&config.levels)?;
        info!(
            chip_address = config.chip_address,
            written, "Volume levels applied"
        );
        Ok(written)
    }

    /// Attenuate every channel fully.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn mute_all(&mut self) -> DashResult<()> {
        for channel in 0..VOLUME_CHANNELS {
            self.set_level(channel, MAX_LEVEL)?;
        }
        info!("All volume channels muted");
        Ok(())
    }

    /// Last level written to a channel.
    #[must_use]
    pub fn level(&self, channel: usize) -> Option<u8> {
        self.levels.get(channel).copied().flatten()
    }

    /// Access the chip (for testing).
    pub fn chip(&self) -> &C {
        &self.chip
    }
}

/// Simulated chip recording every write.
#[derive(Debug, Clone, Default)]
pub struct SimulatedVolumeChip {
    chip_address: u8,
    writes: Vec<(u8, u8)>,
}

impl SimulatedVolumeChip {
    /// Create a chip answering at `chip_address`.
    #[must_use]
    pub fn new(chip_address: u8) -> Self {
        Self {
            chip_address,
            writes: Vec::new(),
        }
    }

    /// Chip address this instance answers at.
    #[must_use]
    pub fn chip_address(&self) -> u8 {
        self.chip_address
    }

    /// `(register, data)` pairs written so far.
    #[must_use]
    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }
}

impl VolumeChip for SimulatedVolumeChip {
    fn write(&mut self, register: u8, data: u8) -> DashResult<()> {
        self.writes.push((register, data));
        Ok(())
    }
}
