//! Benchmark coordinator.
//!
//! Runs one benchmark routine under a fixed pre-delay, a hard deadline and
//! an external cancel signal, and folds whatever happens into a single
//! [`BenchmarkOutcome`].
//!
//! ```text
//! Pending ──► Delaying ──► Running ──► Succeeded | Failed
//!    │           │            │
//!    └───────────┴────────────┴──────► TimedOut | Cancelled
//! ```

use std::time::Duration;

use tokio::{
    sync::watch,
    time::{Instant, sleep, sleep_until},
};
use tracing::{debug, info, warn};

use crate::{
    config::BenchmarkConfig,
    hashrate::format_hash_rate,
    traits::BenchmarkRoutine,
    types::{BenchmarkOutcome, BenchmarkState},
};

/// Message reported when the deadline elapses.
pub const TIMEOUT_MESSAGE: &str = "Operation timed out.";
/// Message reported when the user cancels.
pub const CANCEL_MESSAGE: &str = "Cancelling per user request.";

/// Owner side of a cancel signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a handle that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Signal observers can wait on.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal { rx: self.tx.subscribe() }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancel signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Which half of a [`JointCancellation`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The deadline elapsed.
    TimedOut,
    /// The external signal fired.
    Cancelled,
}

impl CancelReason {
    /// Terminal benchmark state for this reason.
    #[must_use]
    pub fn state(&self) -> BenchmarkState {
        match self {
            Self::TimedOut => BenchmarkState::TimedOut,
            Self::Cancelled => BenchmarkState::Cancelled,
        }
    }

    /// Fixed diagnostic message for this reason.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::TimedOut => TIMEOUT_MESSAGE,
            Self::Cancelled => CANCEL_MESSAGE,
        }
    }
}

/// A deadline and an external cancel signal observed as one condition.
///
/// When both have fired the deadline is reported.
#[derive(Debug, Clone)]
pub struct JointCancellation {
    deadline: Instant,
    signal:   CancelSignal,
}

impl JointCancellation {
    /// Combine `deadline` and `signal`.
    #[must_use]
    pub fn new(deadline: Instant, signal: CancelSignal) -> Self {
        Self { deadline, signal }
    }

    /// Absolute deadline.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Which condition has fired, if any.
    #[must_use]
    pub fn fired(&self) -> Option<CancelReason> {
        if Instant::now() >= self.deadline {
            Some(CancelReason::TimedOut)
        } else if self.signal.is_cancelled() {
            Some(CancelReason::Cancelled)
        } else {
            None
        }
    }

    /// Whether either condition has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired().is_some()
    }

    /// Resolves when either condition fires.
    pub async fn triggered(&self) -> CancelReason {
        tokio::select! {
            biased;
            () = sleep_until(self.deadline) => CancelReason::TimedOut,
            () = self.signal.cancelled() => self.fired().unwrap_or(CancelReason::Cancelled),
        }
    }
}

/// Supervises benchmark attempts with a fixed timing configuration.
#[derive(Debug)]
pub struct BenchmarkCoordinator {
    config: BenchmarkConfig,
    state:  watch::Sender<BenchmarkState>,
}

impl BenchmarkCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(config: BenchmarkConfig) -> Self {
        let (state, _) = watch::channel(BenchmarkState::Pending);
        Self { config, state }
    }

    /// Timing configuration.
    #[must_use]
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// State of the current or last attempt.
    #[must_use]
    pub fn state(&self) -> BenchmarkState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<BenchmarkState> {
        self.state.subscribe()
    }

    /// Run `routine` once.
    ///
    /// The deadline is `pre_delay + timeout` from now. The routine is never
    /// started once the deadline or `cancel` has fired, and it is dropped if
    /// either fires while it runs. Routine errors become a
    /// [`BenchmarkState::Failed`] outcome.
    pub async fn run<R>(&self, routine: R, cancel: &CancelSignal) -> BenchmarkOutcome
    where
        R: BenchmarkRoutine,
    {
        let timeout = self.config.timeout;
        let pre_delay = self.config.pre_delay;
        let joint = JointCancellation::new(deadline_after(pre_delay, timeout), cancel.clone());
        self.transition(BenchmarkState::Pending);

        if let Some(reason) = joint.fired() {
            return self.interrupted(reason);
        }

        self.transition(BenchmarkState::Delaying);
        tokio::select! {
            biased;
            reason = joint.triggered() => return self.interrupted(reason),
            () = sleep(pre_delay) => {}
        }
        if let Some(reason) = joint.fired() {
            return self.interrupted(reason);
        }

        self.transition(BenchmarkState::Running);
        let result = tokio::select! {
            biased;
            reason = joint.triggered() => return self.interrupted(reason),
            result = routine.execute(joint.clone()) => result,
        };
        // The routine may have returned early because it saw the condition.
        if let Some(reason) = joint.fired() {
            return self.interrupted(reason);
        }

        match result {
            Ok((speed, success)) => {
                self.transition(BenchmarkState::Succeeded);
                info!(speed = %format_hash_rate(speed), success, "benchmark finished");
                BenchmarkOutcome::completed(speed, success)
            }
            Err(err) => {
                self.transition(BenchmarkState::Failed);
                warn!(error = %err, "benchmark failed");
                BenchmarkOutcome::failure(BenchmarkState::Failed, err.to_string())
            }
        }
    }

    fn transition(&self, state: BenchmarkState) {
        debug!(?state, "benchmark state");
        self.state.send_replace(state);
    }

    fn interrupted(&self, reason: CancelReason) -> BenchmarkOutcome {
        let state = reason.state();
        self.transition(state);
        match reason {
            CancelReason::TimedOut => warn!("{}", reason.message()),
            CancelReason::Cancelled => info!("{}", reason.message()),
        }
        BenchmarkOutcome::failure(state, reason.message())
    }
}

/// Run `routine` once under `pre_delay`, `timeout` and `cancel`.
pub async fn run_benchmark<R>(
    routine: R, timeout: Duration, pre_delay: Duration, cancel: &CancelSignal,
) -> BenchmarkOutcome
where
    R: BenchmarkRoutine,
{
    let config = BenchmarkConfig::new().with_timeout(timeout).with_pre_delay(pre_delay);
    BenchmarkCoordinator::new(config).run(routine, cancel).await
}

/// Upper bound for deadlines that would overflow `Instant`, about 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `pre_delay + timeout` from now, clamped to [`FAR_FUTURE`].
fn deadline_after(pre_delay: Duration, timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(pre_delay.saturating_add(timeout)).unwrap_or(now + FAR_FUTURE)
}
