//! System clock synchronization from a GPS receiver.
//!
//! The receiver's sentences are parsed elsewhere; a [`GpsFixSource`] only
//! hands over the decoded UTC time and whether the fix is valid.
//! [`TimeSync`] compares it against a [`SystemClock`] and steps the clock
//! when the drift is large enough, at most once per `min_interval`.

use dash_common::{DashError, DashResult, GpsConfig};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// A decoded GPS time fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsFix {
    /// UTC time reported by the receiver.
    pub utc: SystemTime,
    /// Receiver reports an active (not void) fix.
    pub valid: bool,
    /// Satellites used in the fix.
    pub satellites: u8,
}

/// Supplier of GPS time fixes.
pub trait GpsFixSource: Send {
    /// Most recent fix, or `None` if nothing has been received yet.
    fn latest_fix(&mut self) -> DashResult<Option<GpsFix>>;
}

/// The clock being disciplined.
pub trait SystemClock: Send {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;

    /// Step the clock to `time`.
    fn set(&mut self, time: SystemTime) -> DashResult<()>;
}

impl<C: SystemClock + ?Sized> SystemClock for Box<C> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }

    fn set(&mut self, time: SystemTime) -> DashResult<()> {
        (**self).set(time)
    }
}

/// Result of one synchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No fix received yet.
    NoFix,
    /// Receiver has no valid fix.
    InvalidFix,
    /// Drift within threshold.
    InSync {
        /// Clock minus GPS, in milliseconds.
        drift_ms: i64,
    },
    /// Clock stepped to GPS time.
    Adjusted {
        /// Clock minus GPS before the step, in milliseconds.
        drift_ms: i64,
    },
    /// Drift exceeds threshold but the last step was too recent.
    RateLimited {
        /// Clock minus GPS, in milliseconds.
        drift_ms: i64,
    },
}

/// Signed `a - b` in milliseconds, saturating.
fn signed_drift_ms(a: SystemTime, b: SystemTime) -> i64 {
    match a.duration_since(b) {
        Ok(ahead) => i64::try_from(ahead.as_millis()).unwrap_or(i64::MAX),
        Err(behind) => i64::try_from(behind.duration().as_millis()).map_or(i64::MIN, |ms| -ms),
    }
}

/// GPS-to-system-clock synchronizer.
#[derive(Debug)]
pub struct TimeSync<S, C> {
    source: S,
    clock: C,
    threshold: Duration,
    min_interval: Duration,
    last_adjust: Option<Instant>,
}

impl<S: GpsFixSource, C: SystemClock> TimeSync<S, C> {
    /// Create a synchronizer.
    #[must_use]
    pub fn new(source: S, clock: C, threshold: Duration, min_interval: Duration) -> Self {
        Self {
            source,
            clock,
            threshold,
            min_interval,
            last_adjust: None,
        }
    }

    /// Create a synchronizer from configuration.
    #[must_use]
    pub fn from_config(source: S, clock: C, config: &GpsConfig) -> Self {
        Self::new(source, clock, config.sync_threshold, config.min_interval)
    }

    /// Check the latest fix and step the clock if needed.
    ///
    /// # Errors
    ///
    /// Returns errors from the fix source, or [`DashError::TimeSync`] if
    /// the clock cannot be set.
    pub fn poll(&mut self) -> DashResult<SyncOutcome> {
        self.poll_at(Instant::now())
    }

    /// [`TimeSync::poll`] with an explicit monotonic "now" for rate limiting.
    ///
    /// # Errors
    ///
    /// Same as [`TimeSync::poll`].
    pub fn poll_at(&mut self, now: Instant) -> DashResult<SyncOutcome> {
        let Some(fix) = self.source.latest_fix()? else {
            return Ok(SyncOutcome::NoFix);
        };
        if !fix.valid {
            debug!(satellites = fix.satellites, "GPS fix not valid");
            return Ok(SyncOutcome::InvalidFix);
        }

        let drift_ms = signed_drift_ms(self.clock.now(), fix.utc);
        if u128::from(drift_ms.unsigned_abs()) <= self.threshold.as_millis() {
            return Ok(SyncOutcome::InSync { drift_ms });
        }

        if let Some(last) = self.last_adjust {
            if now.saturating_duration_since(last) < self.min_interval {
                return Ok(SyncOutcome::RateLimited { drift_ms });
            }
        }

        self.clock.set(fix.utc)?;
        self.last_adjust = Some(now);
        info!(drift_ms, satellites = fix.satellites, "System clock stepped to GPS time");
        Ok(SyncOutcome::Adjusted { drift_ms })
    }

    /// Access the clock (for testing).
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

/// Clock that only logs the step it would make.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunClock;

impl SystemClock for DryRunClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn set(&mut self, time: SystemTime) -> DashResult<()> {
        let target = humantime::format_rfc3339_seconds(time);
        warn!(%target, "Dry run: system clock not set (enable gps.set_clock)");
        Ok(())
    }
}

/// Realtime clock stepped with `clock_settime(CLOCK_REALTIME)`.
///
/// Requires `CAP_SYS_TIME`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NixClock;

#[cfg(target_os = "linux")]
impl SystemClock for NixClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn set(&mut self, time: SystemTime) -> DashResult<()> {
        use nix::sys::time::TimeSpec;
        use nix::time::{clock_settime, ClockId};

        let since_epoch = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|e| DashError::TimeSync(format!("time before epoch: {e}")))?;
        clock_settime(ClockId::CLOCK_REALTIME, TimeSpec::from(since_epoch))
            .map_err(|e| DashError::TimeSync(format!("clock_settime failed: {e}")))
    }
}

/// Placeholder for non-Linux systems.
#[cfg(not(target_os = "linux"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct NixClock;

#[cfg(not(target_os = "linux"))]
impl SystemClock for NixClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn set(&mut self, _time: SystemTime) -> DashResult<()> {
        Err(DashError::TimeSync(
            "setting the clock is not supported on this platform".into(),
        ))
    }
}

/// Simulated receiver reporting system time shifted by a fixed offset.
#[derive(Debug, Clone)]
pub struct SimulatedGps {
    /// GPS time minus system time, in milliseconds.
    offset_ms: i64,
    valid: bool,
    satellites: u8,
}

impl Default for SimulatedGps {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedGps {
    /// Receiver with a valid fix `offset_ms` ahead of the system clock.
    #[must_use]
    pub fn new(offset_ms: i64) -> Self {
        Self {
            offset_ms,
            valid: true,
            satellites: 8,
        }
    }

    /// Mark the fix valid or void (for testing).
    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl GpsFixSource for SimulatedGps {
    fn latest_fix(&mut self) -> DashResult<Option<GpsFix>> {
        let now = SystemTime::now();
        let offset = Duration::from_millis(self.offset_ms.unsigned_abs());
        let utc = if self.offset_ms >= 0 {
            now.checked_add(offset)
        } else {
            now.checked_sub(offset)
        }
        .ok_or_else(|| DashError::TimeSync("simulated offset out of range".into()))?;
        Ok(Some(GpsFix {
            utc,
            valid: self.valid,
            satellites: self.satellites,
        }))
    }
}
