//! Free-running microsecond tick arithmetic.
//!
//! Edge sources timestamp every rising edge with a 32-bit microsecond
//! counter that wraps at `2^32` (roughly 71.6 minutes). All interval math
//! in the workspace goes through [`elapsed_ticks`] so the wrap convention
//! is applied in exactly one place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Modulus of the tick counter (`2^32`).
pub const TICK_MODULUS: u64 = 1 << 32;

/// Counter resolution: one tick is one microsecond.
pub const TICKS_PER_SECOND: u64 = 1_000_000;

/// A raw value of the 32-bit microsecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(pub u32);

impl Tick {
    /// Largest representable tick, one before the wrap.
    pub const MAX: Tick = Tick(u32::MAX);

    /// Forward distance from `earlier` to `self` on the circular counter.
    #[inline]
    #[must_use]
    pub fn since(self, earlier: Tick) -> u32 {
        elapsed_ticks(earlier, self)
    }

    /// Advance the counter by `delta` ticks, wrapping at the modulus.
    #[inline]
    #[must_use]
    pub fn advance(self, delta: u32) -> Tick {
        Tick(self.0.wrapping_add(delta))
    }
}

impl From<u32> for Tick {
    fn from(value: u32) -> Self {
        Tick(value)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Forward distance from `last` to `now` on a counter of modulus [`TICK_MODULUS`].
///
/// `now >= last` is a plain difference (equal ticks give zero, never a
/// full wrap). Otherwise the counter rolled over between the two samples.
#[inline]
#[must_use]
pub fn elapsed_ticks(last: Tick, now: Tick) -> u32 {
    if now.0 >= last.0 {
        now.0 - last.0
    } else {
        // now + (M - last), computed in u64 so the intermediate cannot overflow
        let wrapped = u64::from(now.0) + (TICK_MODULUS - u64::from(last.0));
        // last > now guarantees wrapped < M
        u32::try_from(wrapped).unwrap_or(u32::MAX)
    }
}

/// Convert an elapsed tick count to seconds.
#[inline]
#[must_use]
pub fn ticks_to_secs(ticks: u32) -> f64 {
    f64::from(ticks) / TICKS_PER_SECOND as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_without_wrap() {
        assert_eq!(elapsed_ticks(Tick(100), Tick(350)), 250);
        assert_eq!(elapsed_ticks(Tick(0), Tick(u32::MAX)), u32::MAX);
    }

    #[test]
    fn test_elapsed_equal_ticks_is_zero() {
        assert_eq!(elapsed_ticks(Tick(42), Tick(42)), 0);
        assert_eq!(elapsed_ticks(Tick::MAX, Tick::MAX), 0);
    }

    #[test]
    fn test_elapsed_across_wrap() {
        let last = Tick((TICK_MODULUS - 10) as u32);
        assert_eq!(elapsed_ticks(last, Tick(5)), 15);
        assert_eq!(elapsed_ticks(Tick::MAX, Tick(0)), 1);
        assert_eq!(elapsed_ticks(Tick(1), Tick(0)), u32::MAX);
    }

    #[test]
    fn test_elapsed_matches_wrapping_sub() {
        // Sweep a spread of pairs, including both sides of the wrap.
        let samples = [
            0u32,
            1,
            2,
            999_999,
            1_000_000,
            0x7FFF_FFFF,
            0x8000_0000,
            u32::MAX - 1_000_000,
            u32::MAX - 1,
            u32::MAX,
        ];
        for &last in &samples {
            for &now in &samples {
                assert_eq!(
                    elapsed_ticks(Tick(last), Tick(now)),
                    now.wrapping_sub(last),
                    "last={last} now={now}"
                );
            }
        }
    }

    #[test]
    fn test_advance_wraps() {
        assert_eq!(Tick(u32::MAX - 1).advance(3), Tick(1));
        assert_eq!(Tick(1).since(Tick(u32::MAX - 1)), 3);
    }

    #[test]
    fn test_ticks_to_secs() {
        assert!((ticks_to_secs(500_000) - 0.5).abs() < f64::EPSILON);
        assert!((ticks_to_secs(u32::MAX) - 4_294.967_295).abs() < 1e-9);
    }
}
