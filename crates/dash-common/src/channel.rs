//! Channel identity and rate conversion kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a monitored digital line.
///
/// This is the line number the edge source reports with every edge
/// (the GPIO number on the board header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(value: u32) -> Self {
        ChannelId(value)
    }
}

/// How a pulse interval is turned into a physical rate.
///
/// Every kind computes `scale_factor * unit_factor / seconds`; only the
/// unit factor differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateKind {
    /// Road speed in km/h. The scale factor is the distance travelled per
    /// pulse in metres (the tyre circumference for one pulse per turn).
    #[default]
    Speed,
    /// Events per minute, e.g. engine RPM. The scale factor is events per
    /// pulse, usually `1.0`.
    Frequency,
}

impl RateKind {
    /// Factor applied on top of `scale_factor / seconds`.
    #[must_use]
    pub fn unit_factor(self) -> f64 {
        match self {
            // m/s -> km/h
            RateKind::Speed => 3.6,
            // per second -> per minute
            RateKind::Frequency => 60.0,
        }
    }

    /// Display unit of the resulting rate.
    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            RateKind::Speed => "km/h",
            RateKind::Frequency => "1/min",
        }
    }
}

impl fmt::Display for RateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateKind::Speed => write!(f, "speed"),
            RateKind::Frequency => write!(f, "frequency"),
        }
    }
}
