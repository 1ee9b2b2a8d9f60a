//! Progress reporting and cooperative cancellation.
//!
//! The orchestrator reports progress and polls for cancellation at step
//! boundaries only (between hooks, between changesets), never mid-statement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Feedback interface exposed to the caller.
pub trait Feedback {
    /// Called at each step boundary with a description of the step about to
    /// run. `current` is 1-based; `total` may be zero when unknown.
    fn report_progress(&self, message: &str, current: usize, total: usize);

    /// Polled at step boundaries; returning true aborts the run and rolls
    /// back uncommitted work.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Feedback that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFeedback;

impl Feedback for SilentFeedback {
    fn report_progress(&self, _message: &str, _current: usize, _total: usize) {}
}

/// Feedback that logs progress messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl Feedback for LogFeedback {
    #[allow(unused_variables)]
    fn report_progress(&self, message: &str, current: usize, total: usize) {
        #[cfg(feature = "tracing")]
        if total > 0 {
            tracing::info!("[{current}/{total}] {message}");
        } else {
            tracing::info!("{message}");
        }
    }
}

/// Shareable cancellation flag.
///
/// Clone it, hand one copy to the orchestrator and keep the other; calling
/// [CancelFlag::cancel] from anywhere (a signal handler, another thread)
/// stops the run at the next step boundary.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

impl Feedback for CancelFlag {
    #[allow(unused_variables)]
    fn report_progress(&self, message: &str, current: usize, total: usize) {
        #[cfg(feature = "tracing")]
        tracing::info!("[{current}/{total}] {message}");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
