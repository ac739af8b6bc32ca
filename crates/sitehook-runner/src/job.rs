//! Jobs submitted to a runner's queue.

use parking_lot::Mutex;
use sitehook_core::JobId;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::{BuildOutcome, RunnerError};

/// What a job returns to a waiting caller. Cleanups yield `None`.
pub(crate) type JobResult = Result<Option<BuildOutcome>, RunnerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Pipeline { ignore_pull_error: bool },
    Clean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Queued,
    Running,
    Finished,
    Cancelled,
}

/// A submission and the channel its submitter may wait on.
///
/// State only moves forward: `Queued` to either `Running` or `Cancelled`,
/// `Running` to `Finished`. The worker and the scheduling path race for the
/// `Queued` state under the job's own lock, so a job is either started or
/// cancelled, never both.
#[derive(Debug)]
pub(crate) struct QueuedJob {
    pub id: JobId,
    pub kind: JobKind,
    state: Mutex<JobState>,
    reply: Mutex<Option<oneshot::Sender<JobResult>>>,
}

impl QueuedJob {
    pub fn new(kind: JobKind) -> (Arc<Self>, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        let job = Arc::new(Self {
            id: JobId::new(),
            kind,
            state: Mutex::new(JobState::Queued),
            reply: Mutex::new(Some(tx)),
        });
        (job, rx)
    }

    /// Cancel the job if it has not started. Returns whether it was cancelled
    /// by this call.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state != JobState::Queued {
                return false;
            }
            *state = JobState::Cancelled;
        }
        self.respond(Err(RunnerError::Cancelled));
        true
    }

    /// Claim the job for execution. Fails if it was cancelled.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != JobState::Queued {
            return false;
        }
        *state = JobState::Running;
        true
    }

    pub fn finish(&self, result: JobResult) {
        *self.state.lock() = JobState::Finished;
        self.respond(result);
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.state.lock(), JobState::Finished | JobState::Cancelled)
    }

    fn respond(&self, result: JobResult) {
        if let Some(tx) = self.reply.lock().take() {
            // The submitter may not be waiting.
            let _ = tx.send(result);
        }
    }
}
