use std::fmt;
use std::path::PathBuf;

use coffer_archive::{ArchiveEvent, CancelToken, EventSink};
use coffer_params::OperationMode;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::runner::{Backend, Runner};
use crate::state::{JobOutcome, JobState, SharedState};
use crate::step::{Plan, Step};

/// One cancellable archive operation.
///
/// A job does nothing until [`Job::start`] or [`Job::wait`]. Its events,
/// including the questions it needs answered, arrive on the receiver returned
/// by [`Job::events`]; a job whose events are never taken gets every question
/// answered with the cancelling choice.
///
/// Dropping a running job cancels it.
pub struct Job {
    mode: OperationMode,
    pending: Option<(Runner, Plan)>,
    events: Option<mpsc::UnboundedReceiver<ArchiveEvent>>,
    progress: watch::Receiver<f64>,
    state: watch::Receiver<JobState>,
    step: watch::Receiver<Option<Step>>,
    cancel: CancelToken,
    task: Option<JoinHandle<JobOutcome>>,
}

impl Job {
    pub(crate) fn new(plan: Plan, archive: PathBuf, backend: Backend, state: SharedState, stem: String) -> Self {
        let (sink, events) = EventSink::channel();
        let cancel = CancelToken::new();
        let (runner, watchers) = Runner::new(archive, backend, state, stem, sink, cancel.clone());
        Self {
            mode: plan.mode(),
            pending: Some((runner, plan)),
            events: Some(events),
            progress: watchers.progress,
            state: watchers.state,
            step: watchers.step,
            cancel,
            task: None,
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    /// The job's event stream. Available once.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<ArchiveEvent>> {
        self.events.take()
    }

    /// Overall progress in `[0, 1]`, across every step.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Step a composite job is in, `None` outside of steps.
    pub fn step(&self) -> Option<Step> {
        *self.step.borrow()
    }

    /// Request cancellation. The job finishes with
    /// [`ArchiveEvent::Cancelled`] and removes its temporary directories.
    pub fn cancel(&self) {
        debug!(mode = %self.mode, "job cancellation requested");
        self.cancel.cancel();
    }

    /// Token that cancels this job, for use after the job was moved.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the job on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Outside of a tokio runtime.
    pub fn start(&mut self) {
        if let Some((runner, plan)) = self.pending.take() {
            self.task = Some(tokio::spawn(runner.run(plan)));
        }
    }

    /// Start the job if needed and wait for its outcome.
    pub async fn wait(mut self) -> JobOutcome {
        self.start();
        // Nobody can answer questions on a stream that was never taken.
        drop(self.events.take());
        let Some(task) = self.task.take() else {
            return JobOutcome::Cancelled;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(mode = %self.mode, error = %e, "job task ended abnormally");
                JobOutcome::Failed(e.to_string())
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("step", &self.step())
            .field("started", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.task.is_some() && !self.state().is_terminal() {
            self.cancel.cancel();
        }
    }
}
