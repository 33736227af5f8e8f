//! Configuration structures for the dashboard daemon.
//!
//! Supports TOML deserialization with sensible defaults for bench
//! testing and explicit values for the installed vehicle.

use crate::channel::{ChannelId, RateKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Number of analog inputs on the ADC.
pub const ANALOG_CHANNELS: u8 = 8;

/// Number of attenuation channels on the volume chip.
pub const VOLUME_CHANNELS: usize = 8;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    /// How often the daemon reports rates and polls slow devices.
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// A channel with no accepted edge for this long reads as zero.
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,

    /// Monitored pulse channels.
    pub channels: Vec<ChannelConfig>,

    /// Edge source selection.
    pub edge_source: EdgeSourceConfig,

    /// Analog input configuration.
    pub analog: AnalogConfig,

    /// Volume chip configuration.
    pub volume: VolumeConfig,

    /// GPS time synchronization.
    pub gps: GpsConfig,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(3),
            channels: vec![
                ChannelConfig {
                    name: "speed".into(),
                    line: 6,
                    kind: RateKind::Speed,
                    scale_factor: 1.841,
                    sim_period: Duration::from_millis(100),
                },
                ChannelConfig {
                    name: "tacho".into(),
                    line: 5,
                    kind: RateKind::Frequency,
                    scale_factor: 1.0,
                    sim_period: Duration::from_millis(20),
                },
            ],
            edge_source: EdgeSourceConfig::default(),
            analog: AnalogConfig::default(),
            volume: VolumeConfig::default(),
            gps: GpsConfig::default(),
        }
    }
}

/// One monitored pulse line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Human-readable name ("speed", "tacho").
    pub name: String,

    /// Line number reported by the edge source.
    pub line: u32,

    /// Conversion applied to the pulse interval.
    pub kind: RateKind,

    /// Physical constant: metres per pulse for speed, events per pulse for frequency.
    pub scale_factor: f64,

    /// Pulse period used by the simulated edge source.
    #[serde(with = "humantime_serde")]
    pub sim_period: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            line: 0,
            kind: RateKind::Speed,
            scale_factor: 1.0,
            sim_period: Duration::from_millis(100),
        }
    }
}

impl ChannelConfig {
    /// Identifier the edge source reports for this channel.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        ChannelId(self.line)
    }
}

/// Supported edge sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDriver {
    /// Synthetic pulse trains at each channel's `sim_period`.
    #[default]
    Simulated,
    /// Edges replayed from a JSON-lines capture file.
    Replay,
}

/// Edge source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeSourceConfig {
    /// Which edge source to run.
    pub driver: EdgeDriver,

    /// Capture file for the replay driver.
    pub replay_file: Option<PathBuf>,

    /// Sleep between replayed edges according to their tick spacing.
    pub replay_pacing: bool,

    /// Initial value of the simulated tick counter.
    /// Values near `u32::MAX` exercise counter wraparound early.
    pub tick_offset: u32,
}

impl Default for EdgeSourceConfig {
    fn default() -> Self {
        Self {
            driver: EdgeDriver::Simulated,
            replay_file: None,
            replay_pacing: true,
            tick_offset: 0,
        }
    }
}

/// Analog input (SPI ADC) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogConfig {
    /// ADC reference voltage in volts.
    pub ref_volt: f64,

    /// Channels read on every report.
    pub channels: Vec<u8>,
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self {
            ref_volt: 3.3,
            channels: vec![0],
        }
    }
}

/// Digital volume chip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Chip address sent with every write.
    pub chip_address: u8,

    /// Attenuation level applied to each channel at startup.
    pub levels: Vec<u8>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            chip_address: 0x80,
            levels: vec![0; VOLUME_CHANNELS],
        }
    }
}

/// GPS time synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Poll the GPS receiver for time fixes.
    pub enabled: bool,

    /// Adjust the clock only when drift exceeds this.
    #[serde(with = "humantime_serde")]
    pub sync_threshold: Duration,

    /// Minimum time between two clock adjustments.
    #[serde(with = "humantime_serde")]
    pub min_interval: Duration,

    /// Actually set the system clock (requires CAP_SYS_TIME).
    /// When false, adjustments are only logged.
    pub set_clock: bool,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_threshold: Duration::from_secs(2),
            min_interval: Duration::from_secs(600),
            set_clock: false,
        }
    }
}

impl DashConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::Invalid("at least one channel is required".into()));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::Invalid("report_interval must be non-zero".into()));
        }
        if self.stale_after.is_zero() {
            return Err(ConfigError::Invalid("stale_after must be non-zero".into()));
        }

        let mut names = HashSet::new();
        let mut lines = HashSet::new();
        for channel in &self.channels {
            if channel.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "channel on line {} has no name",
                    channel.line
                )));
            }
            if !names.insert(channel.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel name '{}'",
                    channel.name
                )));
            }
            if !lines.insert(channel.line) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel line {}",
                    channel.line
                )));
            }
            if !(channel.scale_factor.is_finite() && channel.scale_factor > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "channel '{}' scale_factor must be positive, got {}",
                    channel.name, channel.scale_factor
                )));
            }
        }

        if let Some(bad) = self
            .analog
            .channels
            .iter()
            .find(|&&ch| ch >= ANALOG_CHANNELS)
        {
            return Err(ConfigError::Invalid(format!(
                "analog channel {bad} out of range (must be 0-7)"
            )));
        }
        if !(self.analog.ref_volt.is_finite() && self.analog.ref_volt > 0.0) {
            return Err(ConfigError::Invalid("analog.ref_volt must be positive".into()));
        }

        if self.volume.levels.len() > VOLUME_CHANNELS {
            return Err(ConfigError::Invalid(format!(
                "volume.levels has {} entries, chip has {VOLUME_CHANNELS} channels",
                self.volume.levels.len()
            )));
        }

        if self.edge_source.driver == EdgeDriver::Replay && self.edge_source.replay_file.is_none()
        {
            return Err(ConfigError::Invalid(
                "edge_source.driver = \"replay\" requires replay_file".into(),
            ));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
