//! Edge source to registry pipeline tests.
//!
//! # Acceptance Criteria
//!
//! - A replayed capture yields the same rates as direct delivery
//! - Malformed capture lines are skipped without losing the rest
//! - The simulated source crosses the counter wrap without a bogus rate
//! - The watchdog zeroes a channel that stops pulsing, without touching the registry

use super::common::{
    assert_rate, car_registry, registry_sink, wait_until_finished, write_capture, SPEED, TACHO,
};
use dash_common::{ChannelId, Tick};
use dash_devices::{EdgeSource, ReplaySource, SimulatedPulseSource};
use dash_pulse::RateWatchdog;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_replayed_capture_matches_direct_delivery() {
    let mut edges = Vec::new();
    let mut tick = Tick(u32::MAX - 1_500_000);
    for _ in 0..5 {
        edges.push((SPEED, tick));
        tick = tick.advance(1_000_000);
    }
    let mut tacho_tick = Tick(0);
    for _ in 0..10 {
        edges.push((TACHO, tacho_tick));
        tacho_tick = tacho_tick.advance(500_000);
    }
    let capture = write_capture(&edges);

    let registry = car_registry();
    let mut source = ReplaySource::open(capture.path(), false).unwrap();
    assert_eq!(source.edges().len(), edges.len());
    source.start(registry_sink(&registry)).unwrap();
    assert!(wait_until_finished(&source, Duration::from_secs(5)));
    source.stop().unwrap();

    let direct = car_registry();
    for &(id, tick) in &edges {
        let _ = direct.on_edge(id, tick);
    }

    for id in [SPEED, TACHO] {
        assert_eq!(registry.get_rate(id).unwrap(), direct.get_rate(id).unwrap());
    }
    assert_rate(registry.get_rate(SPEED).unwrap(), 6.6276);
    assert_rate(registry.get_rate(TACHO).unwrap(), 120.0);
}

#[test]
fn test_malformed_capture_lines_are_skipped() {
    let mut capture = tempfile::NamedTempFile::new().unwrap();
    writeln!(capture, r#"{{"line": 5, "tick": 0}}"#).unwrap();
    writeln!(capture, "garbage").unwrap();
    writeln!(capture, r#"{{"line": 5}}"#).unwrap();
    writeln!(capture, r#"{{"channel": 5, "tick": 500000, "time_us": 500000, "rate": 120.0}}"#)
        .unwrap();
    capture.flush().unwrap();

    let registry = car_registry();
    let mut source = ReplaySource::open(capture.path(), false).unwrap();
    assert_eq!(source.edges().len(), 2);
    source.start(registry_sink(&registry)).unwrap();
    assert!(wait_until_finished(&source, Duration::from_secs(5)));

    assert_rate(registry.get_rate(TACHO).unwrap(), 120.0);
}

#[test]
fn test_edges_on_unregistered_lines_are_rejected() {
    let capture = write_capture(&[(ChannelId(2), Tick(0)), (ChannelId(2), Tick(100))]);
    let registry = car_registry();
    let mut source = ReplaySource::open(capture.path(), false).unwrap();
    source.start(registry_sink(&registry)).unwrap();
    assert!(wait_until_finished(&source, Duration::from_secs(5)));

    assert!(registry
        .snapshot()
        .iter()
        .all(|ch| ch.edges == 0 && ch.rate == 0.0));
}

#[test]
fn test_simulated_source_across_wrap() {
    let registry = car_registry();
    // 100 ms before the counter wraps
    let mut source =
        SimulatedPulseSource::new(vec![(TACHO, Duration::from_millis(20))], u32::MAX - 100_000)
            .unwrap();
    source.start(registry_sink(&registry)).unwrap();
    thread::sleep(Duration::from_millis(400));
    source.stop().unwrap();

    let snapshot = registry.channel_snapshot(TACHO).unwrap();
    assert!(snapshot.rates >= 5, "only {} rates", snapshot.rates);
    // Sleep overshoot lowers the rate a little; a wrap bug would read orders of magnitude off
    let rate = registry.get_rate(TACHO).unwrap();
    assert!((1_000.0..=3_100.0).contains(&rate), "rate = {rate}");
    assert!(!source.is_running());
}

#[test]
fn test_watchdog_zeroes_quiet_channel() {
    let registry = car_registry();
    let watchdog = Arc::new(RateWatchdog::new(
        Arc::clone(&registry),
        Duration::from_millis(100),
    ));

    let sink_registry = Arc::clone(&registry);
    let sink_watchdog = Arc::clone(&watchdog);
    let capture = write_capture(&[(TACHO, Tick(0)), (TACHO, Tick(500_000))]);
    let mut source = ReplaySource::open(capture.path(), false).unwrap();
    source
        .start(Arc::new(move |id, tick| {
            if sink_registry.on_edge(id, tick).is_ok() {
                sink_watchdog.kick(id).unwrap();
            }
        }))
        .unwrap();
    assert!(wait_until_finished(&source, Duration::from_secs(5)));

    assert_rate(watchdog.rate_or_zero(TACHO).unwrap(), 120.0);
    // Never pulsed
    assert_eq!(watchdog.rate_or_zero(SPEED).unwrap(), 0.0);

    thread::sleep(Duration::from_millis(250));
    assert!(watchdog.is_stale(TACHO).unwrap());
    assert_eq!(watchdog.rate_or_zero(TACHO).unwrap(), 0.0);
    // The registry still holds the last computed rate
    assert_rate(registry.get_rate(TACHO).unwrap(), 120.0);

    // Report view: flattened registry fields next to the watchdog verdict
    let json = serde_json::to_value(watchdog.readings()).unwrap();
    let tacho = &json[1];
    assert_eq!(tacho["id"], 5);
    assert_eq!(tacho["name"], "tacho");
    assert_eq!(tacho["kind"], "frequency");
    assert_eq!(tacho["rate"], 120.0);
    assert_eq!(tacho["edges"], 2);
    assert_eq!(tacho["stale"], true);
    assert_eq!(tacho["display_rate"], 0.0);
    assert_eq!(json[0]["name"], "speed");
}
