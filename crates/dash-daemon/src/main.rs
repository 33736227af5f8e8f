//! Dashboard daemon entry point.
//!
//! Wires an edge source into the pulse estimator, reports rates through
//! the staleness watchdog, and services the slow devices (ADC, volume
//! chip, GPS clock) from the report loop.

mod diagnostics;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use dash_common::{ChannelId, DashConfig, DashError, EdgeDriver, Tick};
use dash_devices::{
    AnalogInput, AnalogReading, DryRunClock, EdgeSink, EdgeSource, NixClock, ReplaySource,
    SimulatedAdc, SimulatedGps, SimulatedPulseSource, SimulatedVolumeChip, SyncOutcome,
    SystemClock, TimeSync, VolumeControl,
};
use dash_pulse::{ChannelRegistry, EdgeOutcome, RateWatchdog};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::diagnostics::{DiagnosticsCollector, DiagnosticsState};
use crate::signals::{wait_for_shutdown, SignalHandler};

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "CAR_DASH_CONFIG";

/// System-wide configuration path.
const SYSTEM_CONFIG: &str = "/etc/car-dash/config.toml";

/// Configuration path used during development.
const LOCAL_CONFIG: &str = "config/default.toml";

/// Dashboard daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "dash-daemon",
    about = "Vehicle dashboard daemon - speed and engine-speed instrumentation",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replay a recorded edge capture instead of the configured source.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Stop after this long, e.g. "30s" or "5m" (0 = run until signaled).
    #[arg(long, default_value = "0s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Print one JSON line per computed rate on stdout.
    #[arg(long)]
    trace_edges: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dashboard daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        channels = config.channels.len(),
        driver = ?config.edge_source.driver,
        report_interval = %humantime::format_duration(config.report_interval),
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let diag_state = Arc::new(DiagnosticsState::new());
    let diagnostics = DiagnosticsCollector::new(Arc::clone(&diag_state));

    run_daemon(&config, &args, &signal_handler, &diagnostics)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "dash_daemon={level},dash_pulse={level},dash_devices={level},dash_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `CAR_DASH_CONFIG` environment variable
/// 3. `/etc/car-dash/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<DashConfig> {
    let env_path = std::env::var(CONFIG_ENV).ok();
    load_config_from(
        args.config.as_deref(),
        env_path.as_deref(),
        &[Path::new(SYSTEM_CONFIG), Path::new(LOCAL_CONFIG)],
    )
}

fn load_config_from(
    cli_path: Option<&Path>,
    env_path: Option<&str>,
    fallbacks: &[&Path],
) -> Result<DashConfig> {
    // 1. Command-line argument (highest priority)
    if let Some(config_path) = cli_path {
        info!(?config_path, "Loading config from command-line argument");
        return DashConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    // 2. Environment variable
    if let Some(env_path) = env_path {
        let config_path = Path::new(env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return DashConfig::from_file(config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path}"));
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    // 3-4. System path, then local development path
    for config_path in fallbacks {
        if config_path.exists() {
            info!(?config_path, "Loading config from file");
            return DashConfig::from_file(config_path)
                .with_context(|| format!("Failed to load config from {}", config_path.display()));
        }
    }

    // 5. Built-in defaults
    info!("No config file found, using built-in defaults");
    Ok(DashConfig::default())
}

/// Apply command-line overrides to the loaded configuration.
fn apply_overrides(config: &mut DashConfig, args: &Args) {
    if let Some(replay) = &args.replay {
        config.edge_source.driver = EdgeDriver::Replay;
        config.edge_source.replay_file = Some(replay.clone());
    }
}

/// Create the configured edge source.
fn create_edge_source(config: &DashConfig) -> Result<Box<dyn EdgeSource>> {
    match config.edge_source.driver {
        EdgeDriver::Simulated => {
            info!("Using simulated pulse source");
            Ok(Box::new(SimulatedPulseSource::from_config(config)?))
        }
        EdgeDriver::Replay => {
            let path = config
                .edge_source
                .replay_file
                .as_deref()
                .context("Replay source selected but no replay_file configured")?;
            let source = ReplaySource::open(path, config.edge_source.replay_pacing)
                .with_context(|| format!("Failed to load capture {}", path.display()))?;
            Ok(Box::new(source))
        }
    }
}

/// One `--trace-edges` line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct EdgeTrace {
    channel: ChannelId,
    tick: Tick,
    time_us: u32,
    rate: f64,
}

/// Feed one edge into the registry and account for the result.
///
/// A channel that has been quiet for longer than the watchdog threshold is
/// reset first, so the edge only primes it: the tick counter may have
/// lapped while the line was idle.
///
/// Returns a trace record when a rate was computed.
fn handle_edge(
    registry: &ChannelRegistry,
    watchdog: &RateWatchdog,
    diagnostics: &DiagnosticsState,
    id: ChannelId,
    tick: Tick,
) -> Option<EdgeTrace> {
    if let Ok(Some(idle)) = watchdog.time_since_edge(id) {
        if idle > watchdog.stale_after() {
            debug!(channel = %id, idle = ?idle, "Channel was idle, restarting interval");
            if let Err(e) = registry.reset(id) {
                warn!(channel = %id, error = %e, "Channel reset failed");
            }
        }
    }

    match registry.on_edge(id, tick) {
        Ok(outcome) => {
            diagnostics.record_accepted();
            if let Err(e) = watchdog.kick(id) {
                warn!(channel = %id, error = %e, "Watchdog kick failed");
            }
            match outcome {
                EdgeOutcome::Primed => {
                    debug!(channel = %id, %tick, "Channel primed");
                    None
                }
                EdgeOutcome::Rate { elapsed_us, rate } => Some(EdgeTrace {
                    channel: id,
                    tick,
                    time_us: elapsed_us,
                    rate,
                }),
            }
        }
        Err(DashError::UnknownChannel(_)) => {
            if diagnostics.record_unknown(id) {
                warn!(line = %id, "Edges on unregistered line are ignored");
            }
            debug!(line = %id, %tick, "Edge on unregistered line");
            None
        }
        Err(DashError::DegenerateInterval { .. }) => {
            diagnostics.record_degenerate();
            debug!(channel = %id, %tick, "Zero interval, sample discarded");
            None
        }
        Err(e) => {
            warn!(channel = %id, error = %e, "Edge rejected");
            None
        }
    }
}

/// Build the sink handed to the edge source.
fn make_sink(
    registry: Arc<ChannelRegistry>,
    watchdog: Arc<RateWatchdog>,
    diagnostics: Arc<DiagnosticsState>,
    trace_edges: bool,
) -> EdgeSink {
    Arc::new(move |id, tick| {
        let Some(trace) = handle_edge(&registry, &watchdog, &diagnostics, id, tick) else {
            return;
        };
        if trace_edges {
            match serde_json::to_string(&trace) {
                Ok(line) => {
                    let mut stdout = std::io::stdout().lock();
                    if let Err(e) = writeln!(stdout, "{line}") {
                        debug!(error = %e, "Failed to write trace line");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize trace line"),
            }
        }
    })
}

/// Devices serviced from the report loop.
struct SlowDevices {
    analog: AnalogInput<SimulatedAdc>,
    analog_channels: Vec<u8>,
    volume: VolumeControl<SimulatedVolumeChip>,
    time_sync: Option<TimeSync<SimulatedGps, Box<dyn SystemClock>>>,
}

impl SlowDevices {
    fn open(config: &DashConfig) -> Result<Self> {
        let analog = AnalogInput::new(SimulatedAdc::new(), config.analog.ref_volt)
            .context("Failed to open analog input")?;

        let mut volume = VolumeControl::new(SimulatedVolumeChip::new(config.volume.chip_address));
        volume
            .apply_config(&config.volume)
            .context("Failed to apply volume levels")?;

        let time_sync = config.gps.enabled.then(|| {
            let clock: Box<dyn SystemClock> = if config.gps.set_clock {
                Box::new(NixClock)
            } else {
                Box::new(DryRunClock)
            };
            TimeSync::from_config(SimulatedGps::default(), clock, &config.gps)
        });

        Ok(Self {
            analog,
            analog_channels: config.analog.channels.clone(),
            volume,
            time_sync,
        })
    }

    fn read_analog(&mut self, diagnostics: &DiagnosticsState) -> Vec<AnalogReading> {
        let mut readings = Vec::with_capacity(self.analog_channels.len());
        for &channel in &self.analog_channels {
            match self.analog.read(channel) {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    diagnostics.record_device_error();
                    warn!(channel, error = %e, "Analog read failed");
                }
            }
        }
        readings
    }

    fn poll_gps(&mut self, diagnostics: &DiagnosticsState) -> Option<SyncOutcome> {
        let sync = self.time_sync.as_mut()?;
        match sync.poll() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                diagnostics.record_device_error();
                warn!(error = %e, "GPS time sync failed");
                None
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.volume.mute_all() {
            warn!(error = %e, "Failed to mute volume chip");
        }
        if let Err(e) = self.analog.close() {
            warn!(error = %e, "Failed to close analog input");
        }
    }
}

/// Main daemon run loop.
fn run_daemon(
    config: &DashConfig,
    args: &Args,
    signal_handler: &SignalHandler,
    diagnostics: &DiagnosticsCollector,
) -> Result<()> {
    let registry = Arc::new(
        ChannelRegistry::from_config(&config.channels).context("Failed to build channel registry")?,
    );

    let mut watchdog = RateWatchdog::new(Arc::clone(&registry), config.stale_after);
    let stale_diag = Arc::clone(diagnostics.state());
    watchdog
        .start(move |_| stale_diag.record_stale())
        .context("Failed to start rate watchdog")?;
    info!(
        stale_after = %humantime::format_duration(watchdog.stale_after()),
        "Rate watchdog started"
    );
    let watchdog = Arc::new(watchdog);

    let mut devices = SlowDevices::open(config)?;

    let mut source = create_edge_source(config)?;
    let sink = make_sink(
        Arc::clone(&registry),
        Arc::clone(&watchdog),
        Arc::clone(diagnostics.state()),
        args.trace_edges,
    );
    source.start(sink).context("Failed to start edge source")?;
    info!(kind = ?source.kind(), "Edge source started, entering main loop");

    let deadline = (!args.duration.is_zero()).then(|| Instant::now() + args.duration);

    loop {
        let wait = deadline.map_or(config.report_interval, |d| {
            config
                .report_interval
                .min(d.saturating_duration_since(Instant::now()))
        });
        if wait_for_shutdown(signal_handler, wait) {
            info!("Shutdown signal received, stopping");
            break;
        }

        if signal_handler.take_hangup() {
            info!("SIGHUP received; configuration is only read at startup");
        }

        let rates = watchdog.readings();
        for reading in &rates {
            info!(
                channel = %reading.channel.name,
                rate = reading.display_rate,
                unit = reading.channel.kind.unit(),
                stale = reading.stale,
                "Rate"
            );
        }
        let analog = devices.read_analog(diagnostics.state());
        let gps = devices.poll_gps(diagnostics.state());

        let status = diagnostics.report(rates, analog, gps);
        match status.to_json() {
            Ok(json) => debug!(status = %json, "Status report"),
            Err(e) => warn!(error = %e, "Failed to serialize status"),
        }

        if source.is_finished() {
            info!("Edge source finished");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!(duration = %humantime::format_duration(args.duration), "Run duration reached");
            break;
        }
    }

    // Graceful shutdown
    info!("Shutting down...");
    diagnostics.state().set_shutting_down();

    if let Err(e) = source.stop() {
        warn!("Edge source stop failed: {}", e);
    }
    devices.close();

    let state = diagnostics.state();
    info!(
        accepted_edges = state.accepted_edges(),
        unknown_edges = state.unknown_edges(),
        unknown_lines = state.unknown_lines(),
        degenerate_edges = state.degenerate_edges(),
        stale_events = state.stale_events(),
        device_errors = state.device_errors(),
        reports = state.reports(),
        signals = signal_handler.state().signal_count(),
        uptime_secs = state.uptime().as_secs(),
        health = %diagnostics.health(),
        "Daemon shutdown complete"
    );

    Ok(())
}
