//! Common utilities for acceptance tests.

#![allow(dead_code)] // Not every helper is used by every test module

use dash_common::{ChannelId, RateKind, Tick};
use dash_devices::{EdgeSink, EdgeSource};
use dash_pulse::ChannelRegistry;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// GPIO line of the wheel sensor.
pub const SPEED: ChannelId = ChannelId(6);

/// GPIO line of the tachometer pickup.
pub const TACHO: ChannelId = ChannelId(5);

/// Circumference of the installed tyre in metres.
pub const TYRE_CIRCUMFERENCE: f64 = 1.841;

/// Registry with the car's speed and tachometer channels.
pub fn car_registry() -> Arc<ChannelRegistry> {
    Arc::new(
        ChannelRegistry::builder()
            .channel("speed", SPEED, RateKind::Speed, TYRE_CIRCUMFERENCE)
            .channel("tacho", TACHO, RateKind::Frequency, 1.0)
            .build()
            .expect("car registry"),
    )
}

/// Assert two rates agree to within `1e-9` relative error.
pub fn assert_rate(actual: f64, expected: f64) {
    let tolerance = 1e-9 * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "rate {actual} != expected {expected}"
    );
}

/// Sink feeding every edge straight into `registry`, ignoring errors.
pub fn registry_sink(registry: &Arc<ChannelRegistry>) -> EdgeSink {
    let registry = Arc::clone(registry);
    Arc::new(move |id, tick| {
        let _ = registry.on_edge(id, tick);
    })
}

/// Write a JSON-lines capture to a temp file.
pub fn write_capture(edges: &[(ChannelId, Tick)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp capture");
    writeln!(file, "# acceptance capture").expect("write");
    for (line, tick) in edges {
        writeln!(file, r#"{{"line": {}, "tick": {}}}"#, line.0, tick.0).expect("write");
    }
    file.flush().expect("flush");
    file
}

/// Poll until a finite source reports it is done.
pub fn wait_until_finished(source: &dyn EdgeSource, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if source.is_finished() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    source.is_finished()
}
