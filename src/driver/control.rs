//! Run-state transitions and the final run result.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::info;

use crate::error::ValidationError;
use crate::types::RunState;

/// Exit status of a run terminated by an internal hard failure (a supplier
/// or subscriber error rather than a configured fail condition).
pub const HARD_FAILURE_STATUS: i64 = -1;

struct ControlInner {
    state: watch::Sender<RunState>,
    hard_failure: AtomicBool,
}

/// Shared handle over the driver's run state.
///
/// Transitions go through compare-and-set updates on a watch channel, so
/// concurrent stop and fail signals resolve deterministically: fail wins,
/// and a terminal state never moves again.
#[derive(Clone)]
pub struct DriverControl {
    inner: Arc<ControlInner>,
}

impl Default for DriverControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverControl {
    #[must_use]
    pub fn new() -> Self {
        let (state, _rx) = watch::channel(RunState::Running);
        Self {
            inner: Arc::new(ControlInner {
                state,
                hard_failure: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    /// Watch receiver for state transitions; subscribe before entering any
    /// blocking wait that must observe them.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    /// RUNNING -> STOPPING. A no-op from any other state; the return says
    /// whether this call won the transition.
    #[must_use]
    pub fn request_stop(&self) -> bool {
        let moved = self.inner.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Stopping;
                true
            } else {
                false
            }
        });
        if moved {
            info!("Run is stopping.");
        }
        moved
    }

    /// RUNNING or STOPPING -> FAILING. Fail takes precedence over a stop
    /// already in progress; terminal states never move.
    #[must_use]
    pub fn request_fail(&self, hard: bool) -> bool {
        let moved = self.inner.state.send_if_modified(|state| {
            if matches!(*state, RunState::Running | RunState::Stopping) {
                *state = RunState::Failing;
                true
            } else {
                false
            }
        });
        if hard && !self.state().is_terminal() {
            self.inner.hard_failure.store(true, Ordering::Release);
        }
        if moved {
            info!(hard, "Run is failing.");
        }
        moved
    }

    /// STOPPING -> STOPPED, FAILING -> FAILED.
    #[must_use]
    pub fn finish(&self) -> RunState {
        drop(self.inner.state.send_if_modified(|state| match *state {
            RunState::Stopping => {
                *state = RunState::Stopped;
                true
            }
            RunState::Failing => {
                *state = RunState::Failed;
                true
            }
            RunState::Running | RunState::Stopped | RunState::Failed => false,
        }));
        self.state()
    }

    #[must_use]
    pub fn hard_failure(&self) -> bool {
        self.inner.hard_failure.load(Ordering::Acquire)
    }
}

/// Outcome of one load-test run: an exit status plus epoch-millisecond
/// start and finish timestamps.
///
/// Status 0 is a clean stop, a positive status counts the fail conditions
/// that fired, and [`HARD_FAILURE_STATUS`] marks an internal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTestResult {
    status: i64,
    start_millis: i64,
    finish_millis: i64,
}

impl LoadTestResult {
    /// # Errors
    ///
    /// Returns [`ValidationError::NegativeStartTimestamp`] for a negative
    /// start and [`ValidationError::FinishBeforeStart`] when the finish
    /// timestamp precedes the start. A zero-duration run is valid.
    pub fn new(status: i64, start_millis: i64, finish_millis: i64) -> Result<Self, ValidationError> {
        if start_millis < 0 {
            return Err(ValidationError::NegativeStartTimestamp {
                start: start_millis,
            });
        }
        if finish_millis < start_millis {
            return Err(ValidationError::FinishBeforeStart {
                start: start_millis,
                finish: finish_millis,
            });
        }
        Ok(Self {
            status,
            start_millis,
            finish_millis,
        })
    }

    /// Builds a result from timestamps the driver measured itself.
    pub(crate) fn from_parts(status: i64, start_millis: i64, finish_millis: i64) -> Self {
        Self {
            status,
            start_millis: start_millis.max(0),
            finish_millis: finish_millis.max(start_millis.max(0)),
        }
    }

    #[must_use]
    pub const fn status(&self) -> i64 {
        self.status
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == 0
    }

    #[must_use]
    pub const fn start_millis(&self) -> i64 {
        self.start_millis
    }

    #[must_use]
    pub const fn finish_millis(&self) -> i64 {
        self.finish_millis
    }

    #[must_use]
    pub const fn duration_millis(&self) -> i64 {
        self.finish_millis - self.start_millis
    }
}
