//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT request shutdown; SIGHUP is only recorded and logged
//! by the main loop. The handlers themselves only touch atomics, and a
//! small poller thread forwards them into [`SignalState`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
    /// SIGHUP - Hangup.
    Hangup,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Shared state between the signal poller and the main loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    hangup_pending: AtomicBool,
    /// Count of signals received (for diagnostics).
    signal_count: AtomicU32,
}

impl SignalState {
    /// Create a new signal state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Check if a SIGHUP arrived since the last call (and clear the flag).
    #[inline]
    pub fn take_hangup(&self) -> bool {
        self.hangup_pending.swap(false, Ordering::Relaxed)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Record a delivered signal.
    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        match kind {
            SignalKind::Terminate | SignalKind::Interrupt => self.request_shutdown(),
            SignalKind::Hangup => self.hangup_pending.store(true, Ordering::Relaxed),
        }
    }

    /// Get the total number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Handle for signal management.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a signal handler and register the process signal handlers.
    ///
    /// On non-Unix platforms only manual shutdown is available.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self::unregistered();

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    /// Create a handler without touching process signal dispositions.
    pub fn unregistered() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        static TERM_FLAG: AtomicBool = AtomicBool::new(false);
        static INT_FLAG: AtomicBool = AtomicBool::new(false);
        static HUP_FLAG: AtomicBool = AtomicBool::new(false);

        extern "C" fn sigterm_handler(_: c_int) {
            TERM_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sigint_handler(_: c_int) {
            INT_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sighup_handler(_: c_int) {
            HUP_FLAG.store(true, Ordering::Relaxed);
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("signal-poll".into())
            .spawn(move || loop {
                for (flag, kind) in [
                    (&TERM_FLAG, SignalKind::Terminate),
                    (&INT_FLAG, SignalKind::Interrupt),
                    (&HUP_FLAG, SignalKind::Hangup),
                ] {
                    if flag.swap(false, Ordering::Relaxed) {
                        info!(signal = %kind, "Signal received");
                        state.record_signal(kind);
                    }
                }
                if state.shutdown_requested() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            })?;

        let handlers: [(c_int, extern "C" fn(c_int)); 3] = [
            (libc::SIGTERM, sigterm_handler),
            (libc::SIGINT, sigint_handler),
            (libc::SIGHUP, sighup_handler),
        ];
        for (signum, handler) in handlers {
            // SAFETY: the handlers only store to static atomics, which is
            // async-signal-safe.
            let previous = unsafe { libc::signal(signum, handler as libc::sighandler_t) };
            if previous == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error());
            }
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Check if a SIGHUP arrived (clears the flag).
    #[inline]
    pub fn take_hangup(&self) -> bool {
        self.state.take_hangup()
    }

    /// Get the signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

/// Sleep until shutdown is requested or `timeout` expires.
///
/// Returns `true` if shutdown was signaled.
pub fn wait_for_shutdown(handler: &SignalHandler, timeout: Duration) -> bool {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);

    loop {
        if handler.shutdown_requested() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        std::thread::sleep(poll_interval.min(timeout - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_state_default() {
        let state = SignalState::new();
        assert!(!state.shutdown_requested());
        assert!(!state.take_hangup());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_terminate_and_interrupt_request_shutdown() {
        let state = SignalState::new();
        state.record_signal(SignalKind::Interrupt);
        assert!(state.shutdown_requested());

        let state = SignalState::new();
        state.record_signal(SignalKind::Terminate);
        assert!(state.shutdown_requested());
        assert_eq!(state.signal_count(), 1);
    }

    #[test]
    fn test_hangup_does_not_stop() {
        let state = SignalState::new();
        state.record_signal(SignalKind::Hangup);
        assert!(!state.shutdown_requested());
        assert!(state.take_hangup());
        // Flag should be cleared after take
        assert!(!state.take_hangup());
    }

    #[test]
    fn test_manual_shutdown() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.shutdown_requested());

        handler.state().request_shutdown();
        assert!(handler.shutdown_requested());
        assert!(wait_for_shutdown(&handler, Duration::from_secs(5)));
    }

    #[test]
    fn test_wait_times_out() {
        let handler = SignalHandler::unregistered();
        let start = Instant::now();
        assert!(!wait_for_shutdown(&handler, Duration::from_millis(60)));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_signal_kind_display() {
        assert_eq!(SignalKind::Hangup.to_string(), "SIGHUP");
        assert_eq!(SignalKind::Interrupt.to_string(), "SIGINT");
    }
}
