//! Runner errors.

use sitehook_git::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("repository sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("could not run {step} command: {source}")]
    Spawn {
        step: &'static str,
        #[source]
        source: sitehook_core::Error,
    },

    #[error("cleaning working directory failed: {0}")]
    Clean(#[source] std::io::Error),

    /// A newer submission replaced this job before it started.
    #[error("job was superseded before it started")]
    Cancelled,

    #[error("runner for target '{0}' is shut down")]
    ShutDown(String),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Target(#[from] sitehook_core::Error),
}
