//! Synthetic pulse trains for bench testing without a car.
//!
//! One thread per channel sleeps for the channel's period and then fires
//! an edge stamped from a shared [`TickClock`]. The clock can start at any
//! offset, so a value just below `u32::MAX` exercises counter wraparound
//! within the first seconds of a run.

use crate::{EdgeSink, EdgeSource, SourceKind};
use dash_common::{ChannelId, DashConfig, DashError, DashResult, Tick, TICK_MODULUS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A 32-bit microsecond counter derived from the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    start: Instant,
    offset: u32,
}

impl TickClock {
    /// Start a counter reading `offset` now.
    #[must_use]
    pub fn new(offset: u32) -> Self {
        Self {
            start: Instant::now(),
            offset,
        }
    }

    /// Current counter value.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.at(self.start.elapsed())
    }

    /// Counter value `elapsed` after the start.
    #[must_use]
    pub fn at(&self, elapsed: Duration) -> Tick {
        let micros = elapsed.as_micros() % u128::from(TICK_MODULUS);
        // Reduced modulo 2^32 above
        let micros = u32::try_from(micros).unwrap_or(u32::MAX);
        Tick(self.offset).advance(micros)
    }
}

/// Simulated pulse source.
#[derive(Debug)]
pub struct SimulatedPulseSource {
    channels: Vec<(ChannelId, Duration)>,
    tick_offset: u32,
    stop_requested: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl SimulatedPulseSource {
    /// Create a source firing each channel at its own period.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Config`] if a period is zero.
    pub fn new(channels: Vec<(ChannelId, Duration)>, tick_offset: u32) -> DashResult<Self> {
        if let Some((id, _)) = channels.iter().find(|(_, period)| period.is_zero()) {
            return Err(DashError::Config(format!(
                "simulated period for {id} must be non-zero"
            )));
        }
        Ok(Self {
            channels,
            tick_offset,
            stop_requested: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        })
    }

    /// Create a source from the configured channels' `sim_period`s.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Config`] if a period is zero.
    pub fn from_config(config: &DashConfig) -> DashResult<Self> {
        let channels = config
            .channels
            .iter()
            .map(|ch| (ch.id(), ch.sim_period))
            .collect();
        Self::new(channels, config.edge_source.tick_offset)
    }
}

impl EdgeSource for SimulatedPulseSource {
    fn start(&mut self, sink: EdgeSink) -> DashResult<()> {
        if self.is_running() {
            return Err(DashError::Device("simulated source already running".into()));
        }

        self.stop_requested.store(false, Ordering::Release);
        let clock = TickClock::new(self.tick_offset);
        info!(
            channels = self.channels.len(),
            tick_offset = self.tick_offset,
            "Starting simulated pulse source"
        );

        let channels = self.channels.clone();
        for (id, period) in channels {
            let sink = Arc::clone(&sink);
            let stop = Arc::clone(&self.stop_requested);
            let spawned = thread::Builder::new()
                .name(format!("sim-pulse-{}", id.0))
                .spawn(move || {
                    debug!(channel = %id, period_us = period.as_micros(), "Pulse thread started");
                    while !stop.load(Ordering::Acquire) {
                        thread::sleep(period);
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        sink(id, clock.now());
                    }
                    debug!(channel = %id, "Pulse thread stopped");
                });

            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    // Tear down the threads that did start
                    self.stop()?;
                    return Err(DashError::Device(format!(
                        "failed to spawn pulse thread for {id}: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> DashResult<()> {
        self.stop_requested.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                warn!("Pulse thread panicked: {:?}", e);
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        !self.handles.is_empty() && !self.stop_requested.load(Ordering::Acquire)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Simulated
    }
}

impl Drop for SimulatedPulseSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
