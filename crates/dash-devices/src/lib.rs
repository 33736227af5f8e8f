//! Device seams for dashboard instrumentation.
//!
//! This crate provides:
//! - [`EdgeSource`] trait for anything that timestamps rising edges
//! - [`simulated`] module with a synthetic pulse generator
//! - [`replay`] module replaying recorded edge captures
//! - [`analog`] module with SPI ADC voltage conversion
//! - [`volume`] module driving the 8-channel volume chip
//! - [`gps_time`] module keeping the system clock in step with GPS
//!
//! The OS GPIO/SPI driver layer and the chips' wire encodings stay behind
//! the traits defined here.

pub mod analog;
pub mod gps_time;
pub mod replay;
pub mod simulated;
pub mod volume;

pub use analog::*;
pub use gps_time::*;
pub use replay::*;
pub use simulated::*;
pub use volume::*;

use dash_common::{ChannelId, DashResult, Tick};
use std::sync::Arc;

/// Callback receiving one `(line, tick)` pair per rising edge.
///
/// Sources may invoke it from several threads at once.
pub type EdgeSink = Arc<dyn Fn(ChannelId, Tick) + Send + Sync>;

/// Edge source abstraction.
///
/// An edge source watches one or more digital lines and reports every
/// rising edge with a tick from a 32-bit free-running microsecond counter.
/// Hardware interrupts, poller threads and file replays all fit behind
/// this trait.
pub trait EdgeSource: Send {
    /// Begin delivering edges to `sink`.
    ///
    /// Returns once delivery is set up; edges arrive on the source's own
    /// threads.
    fn start(&mut self, sink: EdgeSink) -> DashResult<()>;

    /// Stop delivering edges and release resources.
    ///
    /// No edge is delivered after this returns.
    fn stop(&mut self) -> DashResult<()>;

    /// Check if the source is currently delivering edges.
    fn is_running(&self) -> bool;

    /// Which kind of source this is.
    fn kind(&self) -> SourceKind;

    /// True once a finite source has delivered everything it has.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Supported edge source types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Synthetic pulse trains.
    Simulated,
    /// Recorded capture file.
    Replay,
}
