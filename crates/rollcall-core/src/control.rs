use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop request shared between a signal watcher and the runner.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The two stop requests the runner honours.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    /// Ends the current session early; cleared when the next window opens.
    pub session_stop: StopFlag,
    /// Ends the current session and the rest of the schedule.
    pub shutdown: StopFlag,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_requested(&self) -> bool {
        self.session_stop.is_raised() || self.shutdown.is_raised()
    }
}
