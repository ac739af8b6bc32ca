//! Git errors.

use sitehook_core::process::ProcessExit;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A single git invocation did not succeed.
#[derive(Debug, Error)]
pub enum GitCommandError {
    #[error("`git {command}` failed with {exit}: {}", .stderr.trim())]
    Failed {
        command: String,
        exit: ProcessExit,
        stdout: String,
        stderr: String,
    },

    #[error("`git {command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("could not run `git {command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl GitCommandError {
    /// The git arguments of the failed invocation.
    pub fn command(&self) -> &str {
        match self {
            GitCommandError::Failed { command, .. }
            | GitCommandError::Timeout { command, .. }
            | GitCommandError::Spawn { command, .. } => command,
        }
    }
}

/// Bringing a working copy in sync with its remote failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Needs manual intervention: the directory holds something else.
    #[error("non-empty {} exists but is not a valid git repository", .path.display())]
    RepositoryState { path: PathBuf },

    #[error(transparent)]
    Git(#[from] GitCommandError),

    /// Fetching upstream failed; the previous checkout is still usable.
    #[error("git pull failed: {0}")]
    Pull(#[source] GitCommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_pull_error(&self) -> bool {
        matches!(self, SyncError::Pull(_))
    }
}
