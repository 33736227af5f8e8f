//! Single-channel pulse interval estimator.
//!
//! A [`PulseChannel`] turns consecutive rising-edge timestamps from one
//! digital line into a rate:
//!
//! ```text
//! edge n-1          edge n
//!    |<--- elapsed --->|
//!    +-----+           +-----+
//! ---+     +-----------+     +---
//!
//! rate = scale_factor * unit_factor / (elapsed / 1_000_000)
//! ```
//!
//! The channel is a plain value type and not synchronized; the
//! [`ChannelRegistry`](crate::registry::ChannelRegistry) wraps each one in
//! its own lock for concurrent delivery.

use dash_common::{elapsed_ticks, ticks_to_secs, ChannelId, DashError, DashResult, RateKind, Tick};
use serde::{Deserialize, Serialize};

/// Result of feeding one edge into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EdgeOutcome {
    /// First edge on the channel; there is no interval yet.
    Primed,
    /// A new rate was computed from the interval since the previous edge.
    Rate {
        /// Interval since the previous edge in microseconds.
        elapsed_us: u32,
        /// Newly stored rate.
        rate: f64,
    },
}

impl EdgeOutcome {
    /// The computed rate, if this edge produced one.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        match self {
            EdgeOutcome::Primed => None,
            EdgeOutcome::Rate { rate, .. } => Some(*rate),
        }
    }
}

/// Pulse interval state for one monitored line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseChannel {
    id: ChannelId,
    kind: RateKind,
    scale_factor: f64,
    /// Tick of the most recent accepted edge; `None` before the first edge.
    last_timestamp: Option<Tick>,
    latest_rate: f64,
}

impl PulseChannel {
    /// Create a channel with no edges observed.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::InvalidChannelConfig`] if `scale_factor` is not
    /// a finite positive number.
    pub fn new(id: ChannelId, kind: RateKind, scale_factor: f64) -> DashResult<Self> {
        if !(scale_factor.is_finite() && scale_factor > 0.0) {
            return Err(DashError::InvalidChannelConfig(format!(
                "{id}: scale_factor must be positive, got {scale_factor}"
            )));
        }
        Ok(Self {
            id,
            kind,
            scale_factor,
            last_timestamp: None,
            latest_rate: 0.0,
        })
    }

    /// Feed one rising edge.
    ///
    /// The first edge only records its tick. Later edges compute the
    /// wraparound-safe interval since the previous edge and store a new
    /// rate.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::DegenerateInterval`] when the edge lands on the
    /// same tick as the previous one. The sample is discarded: neither the
    /// stored tick nor the rate change.
    pub fn on_edge(&mut self, timestamp: Tick) -> DashResult<EdgeOutcome> {
        let Some(last) = self.last_timestamp else {
            self.last_timestamp = Some(timestamp);
            return Ok(EdgeOutcome::Primed);
        };

        let elapsed_us = elapsed_ticks(last, timestamp);
        if elapsed_us == 0 {
            return Err(DashError::DegenerateInterval {
                channel: self.id,
                tick: timestamp,
            });
        }

        let rate = self.rate_for_interval(elapsed_us);
        self.latest_rate = rate;
        self.last_timestamp = Some(timestamp);
        Ok(EdgeOutcome::Rate { elapsed_us, rate })
    }

    /// Rate corresponding to a non-zero interval in microseconds.
    #[must_use]
    pub fn rate_for_interval(&self, elapsed_us: u32) -> f64 {
        self.scale_factor * self.kind.unit_factor() / ticks_to_secs(elapsed_us)
    }

    /// Forget both timestamps and the rate.
    pub fn reset(&mut self) {
        self.last_timestamp = None;
        self.latest_rate = 0.0;
    }

    /// Channel identifier.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Conversion kind.
    #[must_use]
    pub fn kind(&self) -> RateKind {
        self.kind
    }

    /// Physical scale factor.
    #[must_use]
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Tick of the most recent accepted edge.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<Tick> {
        self.last_timestamp
    }

    /// Last computed rate, `0.0` until two edges have been seen.
    #[must_use]
    pub fn latest_rate(&self) -> f64 {
        self.latest_rate
    }
}
