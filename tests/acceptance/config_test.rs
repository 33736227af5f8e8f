//! Configuration-driven acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - The shipped development configuration parses and validates
//! - A configuration file fully determines the registry and the simulated source
//! - Invalid channel tables are rejected before anything starts

use super::common::{assert_rate, registry_sink};
use dash_common::{ChannelId, DashConfig, EdgeDriver, RateKind};
use dash_devices::{EdgeSource, SimulatedPulseSource};
use dash_pulse::ChannelRegistry;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_shipped_default_config() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = DashConfig::from_file(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.edge_source.driver, EdgeDriver::Simulated);
    assert_eq!(config.channels.len(), 2);
    assert_eq!(config.gps.min_interval, Duration::from_secs(600));
    assert_eq!(config.volume.chip_address, 0x80);

    let registry = ChannelRegistry::from_config(&config.channels).unwrap();
    assert_eq!(registry.id_of("speed"), Some(ChannelId(6)));
    assert_eq!(registry.id_of("tacho"), Some(ChannelId(5)));
}

#[test]
fn test_config_file_drives_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("car.toml");
    std::fs::write(
        &path,
        r#"
report_interval = "250ms"

[[channels]]
name = "rear_wheel"
line = 13
kind = "speed"
scale_factor = 2.0
sim_period = "25ms"

[edge_source]
driver = "simulated"
tick_offset = 4294960000
"#,
    )
    .unwrap();

    let config = DashConfig::from_file(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.report_interval, Duration::from_millis(250));

    let registry = Arc::new(ChannelRegistry::from_config(&config.channels).unwrap());
    let wheel = registry.id_of("rear_wheel").unwrap();
    assert_eq!(registry.channel_snapshot(wheel).unwrap().kind, RateKind::Speed);

    let mut source = SimulatedPulseSource::from_config(&config).unwrap();
    source.start(registry_sink(&registry)).unwrap();
    thread::sleep(Duration::from_millis(300));
    source.stop().unwrap();

    // 2 m every 25 ms is 288 km/h; sleep overshoot can only lower it
    let rate = registry.get_rate(wheel).unwrap();
    assert!(rate > 100.0 && rate <= 288.0 + 1e-9, "rate = {rate}");
}

#[test]
fn test_round_trip_preserves_channels() {
    let config = DashConfig::default();
    let reparsed = DashConfig::from_toml(&config.to_toml().unwrap()).unwrap();
    assert_eq!(reparsed.channels.len(), config.channels.len());
    assert_rate(reparsed.channels[0].scale_factor, 1.841);
    assert_eq!(reparsed.stale_after, config.stale_after);
}

#[test]
fn test_duplicate_lines_rejected() {
    let config = DashConfig::from_toml(
        r#"
[[channels]]
name = "a"
line = 6

[[channels]]
name = "b"
line = 6
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
    assert!(ChannelRegistry::from_config(&config.channels).is_err());
}
