//! Estimator acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - First edge primes a channel without producing a rate
//! - 1.841 m in 1 s reads 6.6276 km/h; 0.5 s between tacho pulses reads 120 /min
//! - Intervals across the 32-bit counter wrap are measured correctly
//! - A zero interval is discarded without touching channel state
//! - Channels never influence each other

use super::common::{assert_rate, car_registry, SPEED, TACHO};
use dash_common::{elapsed_ticks, ChannelId, DashError, Tick, TICK_MODULUS};
use dash_pulse::EdgeOutcome;
use std::sync::Arc;
use std::thread;

#[test]
fn test_first_edge_only_primes() {
    let registry = car_registry();
    assert_eq!(registry.on_edge(SPEED, Tick(1_234)).unwrap(), EdgeOutcome::Primed);
    assert_eq!(registry.get_rate(SPEED).unwrap(), 0.0);
    assert_eq!(registry.last_timestamp(SPEED).unwrap(), Some(Tick(1_234)));
}

#[test]
fn test_known_speed_and_engine_rates() {
    let registry = car_registry();

    registry.on_edge(SPEED, Tick(0)).unwrap();
    let outcome = registry.on_edge(SPEED, Tick(1_000_000)).unwrap();
    assert_eq!(outcome.rate().map(|r| (r * 1e4).round() / 1e4), Some(6.6276));
    assert_rate(registry.get_rate(SPEED).unwrap(), 6.6276);

    registry.on_edge(TACHO, Tick(0)).unwrap();
    registry.on_edge(TACHO, Tick(500_000)).unwrap();
    assert_rate(registry.get_rate(TACHO).unwrap(), 120.0);

    // 3000 rpm idle-ish: 20 ms between pulses
    registry.on_edge(TACHO, Tick(520_000)).unwrap();
    assert_rate(registry.get_rate(TACHO).unwrap(), 3000.0);
}

#[test]
fn test_interval_across_counter_wrap() {
    let registry = car_registry();
    registry.on_edge(SPEED, Tick(u32::MAX - 9)).unwrap();
    match registry.on_edge(SPEED, Tick(5)).unwrap() {
        EdgeOutcome::Rate { elapsed_us, rate } => {
            assert_eq!(elapsed_us, 15);
            assert_rate(rate, 1.841 / 15e-6 * 3.6);
        }
        other => panic!("expected a rate, got {other:?}"),
    }
}

#[test]
fn test_wrap_arithmetic_matches_modulus() {
    let samples = [0u32, 1, 999, 1 << 31, u32::MAX - 1, u32::MAX];
    for &last in &samples {
        for &now in &samples {
            let expected = if now >= last {
                u64::from(now - last)
            } else {
                u64::from(now) + (TICK_MODULUS - u64::from(last))
            };
            assert_eq!(u64::from(elapsed_ticks(Tick(last), Tick(now))), expected);
        }
    }
}

#[test]
fn test_zero_interval_is_discarded() {
    let registry = car_registry();
    registry.on_edge(TACHO, Tick(0)).unwrap();
    registry.on_edge(TACHO, Tick(500_000)).unwrap();

    let err = registry.on_edge(TACHO, Tick(500_000)).unwrap_err();
    assert!(matches!(err, DashError::DegenerateInterval { .. }));
    assert_rate(registry.get_rate(TACHO).unwrap(), 120.0);
    assert_eq!(registry.last_timestamp(TACHO).unwrap(), Some(Tick(500_000)));

    // The next real edge measures from the last accepted one
    registry.on_edge(TACHO, Tick(1_000_000)).unwrap();
    assert_rate(registry.get_rate(TACHO).unwrap(), 120.0);

    let snapshot = registry.channel_snapshot(TACHO).unwrap();
    assert_eq!(snapshot.degenerate, 1);
    assert_eq!(snapshot.rates, 2);
}

#[test]
fn test_unknown_channel() {
    let registry = car_registry();
    assert_eq!(
        registry.on_edge(ChannelId(17), Tick(1)),
        Err(DashError::UnknownChannel(ChannelId(17)))
    );
    assert_eq!(
        registry.get_rate(ChannelId(17)),
        Err(DashError::UnknownChannel(ChannelId(17)))
    );
}

#[test]
fn test_channels_are_isolated() {
    let registry = car_registry();
    registry.on_edge(SPEED, Tick(0)).unwrap();
    registry.on_edge(SPEED, Tick(1_000_000)).unwrap();

    // Tacho edges interleaved with nothing on speed
    for n in 0..100u32 {
        registry.on_edge(TACHO, Tick(n * 20_000)).unwrap();
    }
    assert_rate(registry.get_rate(SPEED).unwrap(), 6.6276);
    assert_eq!(registry.last_timestamp(SPEED).unwrap(), Some(Tick(1_000_000)));
    assert_rate(registry.get_rate(TACHO).unwrap(), 3000.0);
}

#[test]
fn test_concurrent_channels_stay_independent() {
    let registry = car_registry();
    let handles: Vec<_> = [(SPEED, 100_000u32), (TACHO, 20_000u32)]
        .into_iter()
        .map(|(id, period)| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                // Start just below the wrap so every thread crosses it
                let mut tick = Tick(u32::MAX - 250_000);
                for _ in 0..2_000 {
                    registry.on_edge(id, tick).unwrap();
                    tick = tick.advance(period);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_rate(registry.get_rate(SPEED).unwrap(), 1.841 / 0.1 * 3.6);
    assert_rate(registry.get_rate(TACHO).unwrap(), 3000.0);
    let snapshot = registry.snapshot();
    assert!(snapshot.iter().all(|ch| ch.edges == 2_000 && ch.rates == 1_999));
}
