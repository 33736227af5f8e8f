use crate::channel::ChannelId;
use crate::time::Tick;
use thiserror::Error;

/// Error types covering channel lookups, interval anomalies, devices, and configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DashError {
    /// No channel is registered under this identifier.
    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// Two edges arrived on the same tick; the sample was discarded.
    #[error("degenerate interval on {channel} at tick {tick}")]
    DegenerateInterval {
        /// Channel that received the edge.
        channel: ChannelId,
        /// Tick of the discarded edge.
        tick: Tick,
    },

    /// Analog input channel outside the ADC's range.
    #[error("analog channel {0} out of range (must be 0-7)")]
    BadAnalogChannel(u8),

    /// Invalid channel definition.
    #[error("invalid channel config: {0}")]
    InvalidChannelConfig(String),

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Device access failed.
    #[error("device error: {0}")]
    Device(String),

    /// Setting or reading the system clock failed.
    #[error("time sync error: {0}")]
    TimeSync(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Convenience type alias for car-dash operations.
pub type DashResult<T> = Result<T, DashError>;
