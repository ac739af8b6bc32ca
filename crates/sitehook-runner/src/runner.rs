//! Per-target runner handle and its single worker.

use parking_lot::Mutex;
use sitehook_core::process::AbortHandle;
use sitehook_core::{StatusLog, TargetConfig};
use sitehook_git::RepoSync;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::job::{JobKind, JobResult, QueuedJob};
use crate::pipeline::RunnerInner;
use crate::{BuildOutcome, RunnerError};

/// How a build request is submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Kill the currently running build command before submitting.
    pub abort_running: bool,
    /// Wait for the submitted job to finish and return its outcome.
    pub wait: bool,
    /// Build the last synced checkout when fetching upstream fails.
    pub ignore_pull_error: bool,
}

/// Submission side of the worker queue. Guarded by the scheduling lock.
#[derive(Debug)]
struct Scheduling {
    queue: Option<mpsc::UnboundedSender<Arc<QueuedJob>>>,
    jobs: Vec<Arc<QueuedJob>>,
}

/// Executes the build pipeline of one target.
///
/// At most one job runs at a time. Submitting a job cancels every job that is
/// still waiting, so the queue holds at most the running job plus the newest
/// request. Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct BuildRunner {
    inner: Arc<RunnerInner>,
    scheduling: Mutex<Scheduling>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BuildRunner {
    /// Validate `target`, create its working directory and start the worker.
    pub fn new(target: TargetConfig, git_timeout: Option<Duration>) -> Result<Self, RunnerError> {
        target.validate()?;
        let target = target.with_resolved_working_directory()?;

        let inner = Arc::new(RunnerInner {
            repo_sync: RepoSync::new(target.name.clone(), git_timeout),
            status: StatusLog::new(),
            abort: AbortHandle::new(),
            target,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(inner.clone(), rx));
        info!(
            target_name = %inner.target.name,
            working_directory = %inner.target.working_directory.display(),
            "Build runner started"
        );

        Ok(Self {
            inner,
            scheduling: Mutex::new(Scheduling {
                queue: Some(tx),
                jobs: Vec::new(),
            }),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.target.name
    }

    pub fn branch(&self) -> &str {
        &self.inner.target.branch
    }

    pub fn target(&self) -> &TargetConfig {
        &self.inner.target
    }

    pub fn status(&self) -> &StatusLog {
        &self.inner.status
    }

    /// Whether a job is currently running or waiting.
    pub fn is_busy(&self) -> bool {
        self.scheduling.lock().jobs.iter().any(|job| !job.is_done())
    }

    /// Submit a pipeline run.
    ///
    /// Without `wait`, returns `Ok(None)` as soon as the job is queued.
    /// With `wait`, returns the outcome, or [`RunnerError::Cancelled`] if a
    /// newer submission replaced this one before it started.
    pub async fn build(&self, options: BuildOptions) -> Result<Option<BuildOutcome>, RunnerError> {
        let reply = self.submit(
            JobKind::Pipeline {
                ignore_pull_error: options.ignore_pull_error,
            },
            options.abort_running,
        )?;
        if !options.wait {
            return Ok(None);
        }
        self.wait_for(reply).await
    }

    /// Remove the build repository and output directory, waiting for the
    /// cleanup. Runs on the worker like any build.
    pub async fn clean_working_dir(&self, abort_running: bool) -> Result<(), RunnerError> {
        let reply = self.submit(JobKind::Clean, abort_running)?;
        self.wait_for(reply).await.map(drop)
    }

    /// Kill the running build command, if any. Returns whether a kill was
    /// sent. A job between steps sees the abort flag and stops before its
    /// build command starts.
    pub fn try_abort_build(&self) -> bool {
        let killed = self.inner.abort.abort();
        info!(target_name = %self.name(), killed, "Build abort requested");
        killed
    }

    /// Stop accepting jobs, cancel queued jobs, abort the running build and
    /// wait for the worker to exit.
    pub async fn shutdown(&self) {
        let worker = {
            let mut scheduling = self.scheduling.lock();
            // Closing the channel lets the worker exit once it drains.
            scheduling.queue = None;
            for job in scheduling.jobs.drain(..) {
                job.cancel();
            }
            self.worker.lock().take()
        };
        // Queued jobs are cancelled first, so the worker cannot pick one up
        // once the running build dies.
        self.try_abort_build();

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(target_name = %self.name(), error = %e, "Build worker ended abnormally");
            }
        }
        info!(target_name = %self.name(), "Build runner stopped");
    }

    fn submit(
        &self,
        kind: JobKind,
        abort_running: bool,
    ) -> Result<oneshot::Receiver<JobResult>, RunnerError> {
        let mut scheduling = self.scheduling.lock();
        let Some(queue) = scheduling.queue.clone() else {
            return Err(RunnerError::ShutDown(self.name().to_string()));
        };

        if abort_running {
            self.try_abort_build();
        }

        scheduling.jobs.retain(|job| {
            if job.cancel() {
                debug!(target_name = %self.name(), job_id = %job.id, "Cancelled superseded job");
            }
            !job.is_done()
        });

        let (job, reply) = QueuedJob::new(kind);
        queue
            .send(job.clone())
            .map_err(|_| RunnerError::ShutDown(self.name().to_string()))?;
        debug!(target_name = %self.name(), job_id = %job.id, kind = ?kind, "Job queued");
        scheduling.jobs.push(job);
        Ok(reply)
    }

    async fn wait_for(
        &self,
        reply: oneshot::Receiver<JobResult>,
    ) -> Result<Option<BuildOutcome>, RunnerError> {
        reply
            .await
            .unwrap_or_else(|_| Err(RunnerError::ShutDown(self.name().to_string())))
    }
}

/// Execute queued jobs one at a time until the queue closes.
///
/// Each job body runs in its own task, so a panic fails that job without
/// stopping the worker.
async fn run_worker(inner: Arc<RunnerInner>, mut queue: mpsc::UnboundedReceiver<Arc<QueuedJob>>) {
    while let Some(job) = queue.recv().await {
        // An abort aimed at a previous job must not leak into this one. Reset
        // before starting, so an abort landing after `start` is never lost.
        inner.abort.reset();
        if !job.start() {
            debug!(target_name = %inner.target.name, job_id = %job.id, "Skipping cancelled job");
            continue;
        }

        debug!(target_name = %inner.target.name, job_id = %job.id, "Job started");
        let task_inner = inner.clone();
        let kind = job.kind;
        let result = match tokio::spawn(async move { task_inner.run_job(kind).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(target_name = %inner.target.name, job_id = %job.id, error = %e, "Job panicked");
                Err(RunnerError::Panicked(e.to_string()))
            }
        };
        job.finish(result);
    }
    debug!(target_name = %inner.target.name, "Build worker exiting");
}
