//! Staleness watchdog layered over the channel registry.
//!
//! The estimator keeps reporting the last computed rate forever: when the
//! car stops, no more edges arrive and the speed would freeze at its last
//! value. Consumers that want "no pulses for a while means zero" read
//! through a [`RateWatchdog`] instead.
//!
//! The edge sink kicks the watchdog for every accepted edge. A channel with
//! no kick for `stale_after` reads as `0.0`. The watchdog never writes
//! into the registry.

use crate::registry::{ChannelRegistry, ChannelSnapshot};
use crossbeam_utils::CachePadded;
use dash_common::{ChannelId, DashError, DashResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-channel liveness.
#[derive(Debug, Default)]
struct ChannelWatch {
    /// Nanoseconds since watchdog start of the last kick, plus one.
    /// Zero means the channel was never kicked.
    last_kick_ns: AtomicU64,
    /// Set by the monitor thread once the channel has been reported stale.
    reported_stale: AtomicBool,
}

/// Shared state between the edge sink, readers, and the monitor thread.
#[derive(Debug)]
struct WatchdogState {
    /// Monotonic start time for relative timestamps.
    start_time: Instant,
    channels: HashMap<ChannelId, CachePadded<ChannelWatch>>,
    /// Flag to signal monitor thread to stop.
    stop_requested: AtomicBool,
}

impl WatchdogState {
    fn elapsed_ns(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn watch(&self, id: ChannelId) -> DashResult<&ChannelWatch> {
        self.channels
            .get(&id)
            .map(|w| &**w)
            .ok_or(DashError::UnknownChannel(id))
    }

    fn since_kick(&self, watch: &ChannelWatch) -> Option<Duration> {
        match watch.last_kick_ns.load(Ordering::Acquire) {
            0 => None,
            stamp => Some(Duration::from_nanos(
                self.elapsed_ns().saturating_sub(stamp - 1),
            )),
        }
    }

    fn is_stale(&self, watch: &ChannelWatch, stale_after: Duration) -> bool {
        self.since_kick(watch).map_or(true, |since| since > stale_after)
    }
}

/// A rate as seen through the watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateReading {
    /// Raw registry view of the channel.
    #[serde(flatten)]
    pub channel: ChannelSnapshot,
    /// No edge within `stale_after`.
    pub stale: bool,
    /// Rate to show: the registry rate, or `0.0` when stale.
    pub display_rate: f64,
}

/// Staleness watchdog over a [`ChannelRegistry`].
#[derive(Debug)]
pub struct RateWatchdog {
    registry: Arc<ChannelRegistry>,
    state: Arc<WatchdogState>,
    stale_after: Duration,
    /// Handle to the monitor thread.
    monitor_handle: Option<JoinHandle<()>>,
    /// Whether the monitor thread is running.
    running: Arc<AtomicBool>,
}

impl RateWatchdog {
    /// Create a watchdog covering every channel of `registry`.
    ///
    /// The monitor thread is not started; reads work without it.
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>, stale_after: Duration) -> Self {
        let channels = registry
            .ids()
            .map(|id| (id, CachePadded::new(ChannelWatch::default())))
            .collect();
        Self {
            registry,
            state: Arc::new(WatchdogState {
                start_time: Instant::now(),
                channels,
                stop_requested: AtomicBool::new(false),
            }),
            stale_after,
            monitor_handle: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record an accepted edge on a channel.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not watched.
    #[inline]
    pub fn kick(&self, id: ChannelId) -> DashResult<()> {
        let watch = self.state.watch(id)?;
        watch
            .last_kick_ns
            .store(self.state.elapsed_ns().saturating_add(1), Ordering::Release);
        watch.reported_stale.store(false, Ordering::Release);
        Ok(())
    }

    /// True if the channel has never been kicked or not within `stale_after`.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not watched.
    pub fn is_stale(&self, id: ChannelId) -> DashResult<bool> {
        let watch = self.state.watch(id)?;
        Ok(self.state.is_stale(watch, self.stale_after))
    }

    /// Time since the last kick, `None` if never kicked.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not watched.
    pub fn time_since_edge(&self, id: ChannelId) -> DashResult<Option<Duration>> {
        let watch = self.state.watch(id)?;
        Ok(self.state.since_kick(watch))
    }

    /// The registry rate, or `0.0` if the channel is stale.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not registered.
    pub fn rate_or_zero(&self, id: ChannelId) -> DashResult<f64> {
        let rate = self.registry.get_rate(id)?;
        if self.is_stale(id)? {
            Ok(0.0)
        } else {
            Ok(rate)
        }
    }

    /// Readings for every channel, in registration order.
    #[must_use]
    pub fn readings(&self) -> Vec<RateReading> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|channel| {
                let stale = self.is_stale(channel.id).unwrap_or(true);
                let display_rate = if stale { 0.0 } else { channel.rate };
                RateReading {
                    channel,
                    stale,
                    display_rate,
                }
            })
            .collect()
    }

    /// Configured staleness threshold.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Start the monitor thread.
    ///
    /// `on_stale` is invoked once each time a channel that has seen edges
    /// goes quiet for longer than `stale_after`. A later kick re-arms it.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Config`] if the monitor is already running or
    /// the thread cannot be spawned.
    pub fn start<F>(&mut self, on_stale: F) -> DashResult<()>
    where
        F: Fn(ChannelId) + Send + 'static,
    {
        if self.running.load(Ordering::Acquire) {
            return Err(DashError::Config("Rate watchdog already running".into()));
        }

        info!(
            stale_after_ms = self.stale_after.as_millis(),
            "Starting rate watchdog"
        );

        self.state.stop_requested.store(false, Ordering::Release);

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let stale_after = self.stale_after;
        // Check 4x per staleness period, at least every millisecond
        let check_interval = (stale_after / 4).max(Duration::from_millis(1));

        self.running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("rate-watchdog".into())
            .spawn(move || {
                debug!("Rate watchdog monitor thread started");

                while !state.stop_requested.load(Ordering::Acquire) {
                    thread::sleep(check_interval);

                    for (&id, watch) in &state.channels {
                        // Channels that never saw an edge are stale but not news.
                        if state.since_kick(watch).is_none() {
                            continue;
                        }
                        if state.is_stale(watch, stale_after)
                            && !watch.reported_stale.swap(true, Ordering::AcqRel)
                        {
                            warn!(channel = %id, "No pulses within stale_after, reading as zero");
                            on_stale(id);
                        }
                    }
                }

                running.store(false, Ordering::Release);
                debug!("Rate watchdog monitor thread stopped");
            });

        match handle {
            Ok(h) => {
                self.monitor_handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(DashError::Config(format!(
                    "Failed to spawn rate watchdog thread: {e}"
                )))
            }
        }
    }

    /// Stop the monitor thread.
    pub fn stop(&mut self) {
        self.state.stop_requested.store(true, Ordering::Release);

        if let Some(handle) = self.monitor_handle.take() {
            info!("Stopping rate watchdog");
            if let Err(e) = handle.join() {
                warn!("Rate watchdog thread panicked: {:?}", e);
            }
        }
    }

    /// Check if the monitor thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RateWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
