//! Diagnostics for the dashboard daemon.
//!
//! Counters updated by the edge sink and the report loop, plus a
//! serializable status snapshot emitted as one JSON object per report.

use dash_common::ChannelId;
use dash_devices::{AnalogReading, SyncOutcome};
use dash_pulse::RateReading;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Health status of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Running, but devices are failing or edges arrive on unknown lines.
    Degraded,
    /// No report produced yet.
    Starting,
    /// Shutting down.
    ShuttingDown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Shared diagnostics state updated by the sink and the main loop.
#[derive(Debug)]
pub struct DiagnosticsState {
    /// Edges on registered lines that were accepted.
    accepted_edges: AtomicU64,
    /// Edges on lines with no registered channel.
    unknown_edges: AtomicU64,
    /// Unregistered lines seen so far.
    unknown_lines: Mutex<HashSet<ChannelId>>,
    /// Zero-interval samples discarded.
    degenerate_edges: AtomicU64,
    /// Channels that went quiet for longer than `stale_after`.
    stale_events: AtomicU64,
    /// Failed analog or GPS operations.
    device_errors: AtomicU64,
    /// Device errors at the previous report, for per-report health.
    device_errors_seen: AtomicU64,
    reports: AtomicU64,
    shutting_down: AtomicBool,
    /// Daemon start time.
    start_time: Instant,
}

impl Default for DiagnosticsState {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsState {
    /// Create new diagnostics state.
    pub fn new() -> Self {
        Self {
            accepted_edges: AtomicU64::new(0),
            unknown_edges: AtomicU64::new(0),
            unknown_lines: Mutex::new(HashSet::new()),
            degenerate_edges: AtomicU64::new(0),
            stale_events: AtomicU64::new(0),
            device_errors: AtomicU64::new(0),
            device_errors_seen: AtomicU64::new(0),
            reports: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    /// Record an accepted edge.
    #[inline]
    pub fn record_accepted(&self) {
        self.accepted_edges.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an edge on an unregistered line.
    ///
    /// Returns `true` the first time `line` is seen.
    pub fn record_unknown(&self, line: ChannelId) -> bool {
        self.unknown_edges.fetch_add(1, Ordering::Relaxed);
        self.unknown_lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(line)
    }

    /// Record a discarded zero-interval edge.
    #[inline]
    pub fn record_degenerate(&self) {
        self.degenerate_edges.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a channel going stale.
    pub fn record_stale(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed device operation.
    pub fn record_device_error(&self) {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the daemon as shutting down.
    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    /// Accepted edge count.
    pub fn accepted_edges(&self) -> u64 {
        self.accepted_edges.load(Ordering::Relaxed)
    }

    /// Distinct unregistered lines that delivered edges.
    pub fn unknown_lines(&self) -> usize {
        self.unknown_lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Unknown-line edge count.
    pub fn unknown_edges(&self) -> u64 {
        self.unknown_edges.load(Ordering::Relaxed)
    }

    /// Discarded zero-interval edge count.
    pub fn degenerate_edges(&self) -> u64 {
        self.degenerate_edges.load(Ordering::Relaxed)
    }

    /// Stale transitions seen by the watchdog.
    pub fn stale_events(&self) -> u64 {
        self.stale_events.load(Ordering::Relaxed)
    }

    /// Device error count.
    pub fn device_errors(&self) -> u64 {
        self.device_errors.load(Ordering::Relaxed)
    }

    /// Reports produced so far.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Get uptime since daemon start.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// One status report.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Current health.
    pub health: HealthStatus,
    /// Uptime in seconds.
    pub uptime_secs: f64,
    /// Accepted edges since start.
    pub accepted_edges: u64,
    /// Edges on unregistered lines since start.
    pub unknown_edges: u64,
    /// Discarded zero-interval edges since start.
    pub degenerate_edges: u64,
    /// Stale transitions since start.
    pub stale_events: u64,
    /// Failed device operations since start.
    pub device_errors: u64,
    /// Rates through the staleness watchdog.
    pub rates: Vec<RateReading>,
    /// Analog samples taken for this report.
    pub analog: Vec<AnalogReading>,
    /// GPS sync result for this report, if enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<SyncOutcome>,
}

impl StatusSnapshot {
    /// Serialize as a single JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Diagnostics collector producing [`StatusSnapshot`]s.
#[derive(Debug)]
pub struct DiagnosticsCollector {
    state: Arc<DiagnosticsState>,
}

impl DiagnosticsCollector {
    /// Create a new diagnostics collector.
    pub fn new(state: Arc<DiagnosticsState>) -> Self {
        Self { state }
    }

    /// Health as of now. Degraded if device errors occurred since the
    /// previous report or unknown-line edges have been seen.
    pub fn health(&self) -> HealthStatus {
        if self.state.shutting_down.load(Ordering::Relaxed) {
            return HealthStatus::ShuttingDown;
        }
        if self.state.reports() == 0 {
            return HealthStatus::Starting;
        }
        let new_errors =
            self.state.device_errors() > self.state.device_errors_seen.load(Ordering::Relaxed);
        if new_errors || self.state.unknown_edges() > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Produce a report and advance the report counter.
    pub fn report(
        &self,
        rates: Vec<RateReading>,
        analog: Vec<AnalogReading>,
        gps: Option<SyncOutcome>,
    ) -> StatusSnapshot {
        self.state.reports.fetch_add(1, Ordering::Relaxed);
        let snapshot = StatusSnapshot {
            health: self.health(),
            uptime_secs: self.state.uptime().as_secs_f64(),
            accepted_edges: self.state.accepted_edges(),
            unknown_edges: self.state.unknown_edges(),
            degenerate_edges: self.state.degenerate_edges(),
            stale_events: self.state.stale_events(),
            device_errors: self.state.device_errors(),
            rates,
            analog,
            gps,
        };
        self.state
            .device_errors_seen
            .store(snapshot.device_errors, Ordering::Relaxed);
        snapshot
    }

    /// Get the underlying state for updates.
    pub fn state(&self) -> &Arc<DiagnosticsState> {
        &self.state
    }
}
