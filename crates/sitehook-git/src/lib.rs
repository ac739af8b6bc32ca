//! Git working copy synchronization for sitehook.
//!
//! [`GitRepo`] exposes the supported git operations as typed methods;
//! [`RepoSync`] composes them into the mirror-a-remote-branch sequence.

pub mod error;
pub mod repo;
pub mod sync;

pub use error::{GitCommandError, SyncError};
pub use repo::GitRepo;
pub use sync::RepoSync;
