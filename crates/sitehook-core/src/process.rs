//! Supervised subprocess execution.
//!
//! Every child runs in its own process group. A guard owns the group while the
//! child is alive and sends `SIGKILL` to the whole group on any exit path where
//! the child was not observed to finish (timeout, error, dropped future).

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Normal exit with the given code.
    Code(i32),
    /// Terminated by the given signal.
    Signal(i32),
}

impl ProcessExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessExit::Code(code),
            (None, Some(signal)) => ProcessExit::Signal(signal),
            // Stopped/continued statuses never reach us from wait().
            (None, None) => ProcessExit::Signal(0),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Code(code) => Some(*code),
            ProcessExit::Signal(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ProcessExit::Code(_) => None,
            ProcessExit::Signal(signal) => Some(*signal),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exit status {}", code),
            ProcessExit::Signal(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

/// Exit and captured output of a finished child.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit: ProcessExit,
    pub stdout: String,
    pub stderr: String,
}

/// Abort flag paired with the process group of the child that may currently
/// be interrupted.
///
/// Setting the flag and killing the registered group happen in that order, and
/// registration re-checks the flag after publishing the group, so a child that
/// starts concurrently with an abort request is always killed.
#[derive(Debug, Default)]
pub struct AbortHandle {
    aborted: AtomicBool,
    current: Mutex<Option<Pid>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the abort flag.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Whether an interruptible child is currently registered.
    pub fn has_process(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Set the abort flag and kill the registered process group, if any.
    /// Returns whether a kill signal was sent. Idempotent.
    pub fn abort(&self) -> bool {
        self.aborted.store(true, Ordering::SeqCst);
        let current = *self.current.lock();
        match current {
            Some(pgid) => {
                kill_group(pgid);
                true
            }
            None => false,
        }
    }

    fn register(&self, pgid: Pid) {
        *self.current.lock() = Some(pgid);
        if self.is_aborted() {
            kill_group(pgid);
        }
    }

    fn release(&self, pgid: Pid) {
        let mut current = self.current.lock();
        if *current == Some(pgid) {
            *current = None;
        }
    }
}

/// Send SIGKILL to a process group. The group may already be gone, so
/// failures are only logged.
pub fn kill_group(pgid: Pid) {
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!(pgid = %pgid, error = %e, "Unable to kill process group");
    }
}

/// Owns a child's process group until the child is confirmed exited.
struct GroupGuard<'a> {
    pgid: Option<Pid>,
    abort: Option<&'a AbortHandle>,
    exited: bool,
}

impl<'a> GroupGuard<'a> {
    fn new(pgid: Option<Pid>, abort: Option<&'a AbortHandle>) -> Self {
        if let (Some(pgid), Some(abort)) = (pgid, abort) {
            abort.register(pgid);
        }
        Self {
            pgid,
            abort,
            exited: false,
        }
    }
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        if !self.exited {
            kill_group(pgid);
        }
        if let Some(abort) = self.abort {
            abort.release(pgid);
        }
    }
}

/// Run a command to completion in a new process group, capturing its output.
///
/// With a `timeout`, the group is killed and [`Error::Timeout`] returned once it
/// elapses. With an `abort` handle, the child is registered so that
/// [`AbortHandle::abort`] can kill it while it runs.
pub async fn run_captured(
    command: &mut Command,
    timeout: Option<Duration>,
    abort: Option<&AbortHandle>,
) -> Result<CapturedOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let child = command.spawn()?;
    let pgid = child
        .id()
        .and_then(|id| i32::try_from(id).ok())
        .map(Pid::from_raw);
    let mut guard = GroupGuard::new(pgid, abort);

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(Error::Timeout(limit)),
        },
        None => child.wait_with_output().await?,
    };
    guard.exited = true;
    drop(guard);

    Ok(CapturedOutput {
        exit: ProcessExit::from_status(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
