//! Replay of recorded edge captures.
//!
//! A capture is a JSON-lines file with one edge per line:
//!
//! ```text
//! {"line": 6, "tick": 4294967290}
//! {"line": 6, "tick": 1841}
//! ```
//!
//! The daemon's `--trace-edges` output uses `channel` instead of `line`
//! and carries extra fields; both forms are accepted, so a trace can be
//! replayed directly. Blank lines and `#` comments are ignored, malformed
//! lines are logged and skipped.

use crate::{EdgeSink, EdgeSource, SourceKind};
use dash_common::{elapsed_ticks, ChannelId, DashError, DashResult, Tick};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest pause inserted between two paced edges.
const MAX_PACED_GAP: Duration = Duration::from_secs(5);

/// Granularity at which a paced replay notices a stop request.
const STOP_POLL: Duration = Duration::from_millis(50);

/// One recorded edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEdge {
    /// Line the edge arrived on.
    #[serde(alias = "channel")]
    pub line: ChannelId,
    /// Counter value at the edge.
    pub tick: Tick,
}

/// Edge source replaying a capture.
#[derive(Debug)]
pub struct ReplaySource {
    edges: Arc<Vec<RecordedEdge>>,
    pacing: bool,
    stop_requested: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReplaySource {
    /// Create a source from already-parsed edges.
    #[must_use]
    pub fn new(edges: Vec<RecordedEdge>, pacing: bool) -> Self {
        Self {
            edges: Arc::new(edges),
            pacing,
            stop_requested: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Load a capture file.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Io`] if the file cannot be opened or read.
    pub fn open(path: &Path, pacing: bool) -> DashResult<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| DashError::Io(format!("failed to open capture {}: {e}", path.display())))?;
        let edges = parse_capture(std::io::BufReader::new(file))?;
        info!(path = %path.display(), edges = edges.len(), "Capture loaded");
        Ok(Self::new(edges, pacing))
    }

    /// Recorded edges, in replay order.
    #[must_use]
    pub fn edges(&self) -> &[RecordedEdge] {
        &self.edges
    }
}

/// Parse a JSON-lines capture, skipping lines that do not parse.
///
/// # Errors
///
/// Returns [`DashError::Io`] if reading fails.
pub fn parse_capture<R: BufRead>(reader: R) -> DashResult<Vec<RecordedEdge>> {
    let mut edges = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| DashError::Io(format!("failed to read capture: {e}")))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<RecordedEdge>(trimmed) {
            Ok(edge) => edges.push(edge),
            Err(e) => warn!(line = lineno + 1, error = %e, "Skipping malformed capture line"),
        }
    }
    Ok(edges)
}

/// Sleep for `total`, waking early if `stop` is set.
fn paced_sleep(total: Duration, stop: &AtomicBool) {
    let mut remaining = total.min(MAX_PACED_GAP);
    while !remaining.is_zero() && !stop.load(Ordering::Acquire) {
        let step = remaining.min(STOP_POLL);
        thread::sleep(step);
        remaining -= step;
    }
}

impl EdgeSource for ReplaySource {
    fn start(&mut self, sink: EdgeSink) -> DashResult<()> {
        if self.is_running() {
            return Err(DashError::Device("replay already running".into()));
        }

        self.stop_requested.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);

        let edges = Arc::clone(&self.edges);
        let stop = Arc::clone(&self.stop_requested);
        let finished = Arc::clone(&self.finished);
        let pacing = self.pacing;

        info!(edges = edges.len(), pacing, "Starting capture replay");

        let handle = thread::Builder::new()
            .name("edge-replay".into())
            .spawn(move || {
                let mut previous: Option<Tick> = None;
                for edge in edges.iter() {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    if pacing {
                        if let Some(prev) = previous {
                            let gap = elapsed_ticks(prev, edge.tick);
                            paced_sleep(Duration::from_micros(u64::from(gap)), &stop);
                            if stop.load(Ordering::Acquire) {
                                break;
                            }
                        }
                    }
                    sink(edge.line, edge.tick);
                    previous = Some(edge.tick);
                }
                finished.store(true, Ordering::Release);
                debug!("Capture replay finished");
            })
            .map_err(|e| DashError::Device(format!("failed to spawn replay thread: {e}")))?;

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> DashResult<()> {
        self.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("Replay thread panicked: {:?}", e);
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.is_some() && !self.finished.load(Ordering::Acquire)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Replay
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::Mutex;
    use std::time::Instant;

    fn collect_sink() -> (EdgeSink, Arc<Mutex<Vec<(ChannelId, Tick)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink: EdgeSink = Arc::new(move |id, tick| seen_clone.lock().unwrap().push((id, tick)));
        (sink, seen)
    }

    fn edge(line: u32, tick: u32) -> RecordedEdge {
        RecordedEdge {
            line: ChannelId(line),
            tick: Tick(tick),
        }
    }

    fn wait_finished(source: &ReplaySource) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !source.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(source.is_finished());
    }

    #[test]
    fn test_parse_capture() {
        let input = r#"
# recorded on the bench
{"line": 6, "tick": 4294967290}
{"line": 6, "tick": 1841}

{"channel": 5, "tick": 20000, "time_us": 20000, "rate": 3000.0}
not json
{"line": 5}
"#;
        let edges = parse_capture(Cursor::new(input)).unwrap();
        assert_eq!(
            edges,
            vec![
                edge(6, 4_294_967_290),
                edge(6, 1841),
                edge(5, 20_000),
            ]
        );
    }

    #[test]
    fn test_replay_delivers_in_order() {
        let edges: Vec<_> = (0..50u32)
            .map(|n| RecordedEdge {
                line: ChannelId(if n % 2 == 0 { 6 } else { 5 }),
                tick: Tick(n * 1_000),
            })
            .collect();
        let mut source = ReplaySource::new(edges.clone(), false);
        let (sink, seen) = collect_sink();

        source.start(sink).unwrap();
        wait_finished(&source);
        assert!(!source.is_running());
        source.stop().unwrap();

        let delivered: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|&(line, tick)| RecordedEdge { line, tick })
            .collect();
        assert_eq!(delivered, edges);
    }

    #[test]
    fn test_paced_replay_follows_tick_spacing() {
        // 3 edges, 20 ms apart, across the counter wrap
        let edges = vec![
            edge(5, u32::MAX - 9_999),
            edge(5, 10_000),
            edge(5, 30_000),
        ];
        let mut source = ReplaySource::new(edges, true);
        let (sink, seen) = collect_sink();

        let started = Instant::now();
        source.start(sink).unwrap();
        wait_finished(&source);
        let took = started.elapsed();

        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(took >= Duration::from_millis(40), "replay took {took:?}");
    }

    #[test]
    fn test_stop_interrupts_paced_replay() {
        let edges = vec![
            edge(5, 0),
            // 4 s later
            edge(5, 4_000_000),
        ];
        let mut source = ReplaySource::new(edges, true);
        let (sink, seen) = collect_sink();

        source.start(sink).unwrap();
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        source.stop().unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"line": 6, "tick": 1}}"#).unwrap();
        writeln!(file, r#"{{"line": 6, "tick": 1000001}}"#).unwrap();

        let source = ReplaySource::open(file.path(), false).unwrap();
        assert_eq!(source.edges().len(), 2);
        assert_eq!(source.kind(), SourceKind::Replay);
    }

    #[test]
    fn test_open_missing_file() {
        let err = ReplaySource::open(Path::new("/nonexistent/capture.jsonl"), false).unwrap_err();
        assert!(matches!(err, DashError::Io(_)));
    }
}
