//! Pulse interval estimation for dashboard signals.
//!
//! This crate turns timestamped rising edges from speed and tachometer
//! sensors into physical rates:
//!
//! - **Channel** ([`channel`]): single-line estimator with wraparound-safe timing
//! - **Registry** ([`registry`]): the fixed set of channels, per-channel locking,
//!   lock-free rate reads
//! - **Watchdog** ([`watchdog`]): optional staleness layer for consumers
//!
//! # Example
//!
//! ```
//! use dash_common::{ChannelId, RateKind, Tick};
//! use dash_pulse::ChannelRegistry;
//!
//! let speed = ChannelId(6);
//! let registry = ChannelRegistry::builder()
//!     .channel("speed", speed, RateKind::Speed, 1.841)
//!     .build()
//!     .unwrap();
//!
//! // First edge only primes the channel
//! registry.on_edge(speed, Tick(0)).unwrap();
//! assert_eq!(registry.get_rate(speed).unwrap(), 0.0);
//!
//! // One tyre turn per second: 1.841 m/s = 6.6276 km/h
//! registry.on_edge(speed, Tick(1_000_000)).unwrap();
//! assert!((registry.get_rate(speed).unwrap() - 6.6276).abs() < 1e-9);
//! ```

pub mod channel;
pub mod registry;
pub mod watchdog;

// Re-export main types for convenience
pub use channel::{EdgeOutcome, PulseChannel};
pub use registry::{ChannelRegistry, ChannelRegistryBuilder, ChannelSnapshot};
pub use watchdog::{RateReading, RateWatchdog};
