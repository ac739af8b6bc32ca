//! Typed git operations on one working copy.

use sitehook_core::Error as CoreError;
use sitehook_core::process::{CapturedOutput, run_captured};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::GitCommandError;

/// Keeps git from ever waiting on a terminal prompt, editor or pager.
const GIT_ENV: [(&str, &str); 5] = [
    ("GIT_TERMINAL_PROMPT", "0"),
    ("GIT_ASKPASS", "echo"),
    ("GIT_EDITOR", "true"),
    ("GIT_PAGER", "cat"),
    ("GIT_CONFIG_NOSYSTEM", "1"),
];

/// A git working copy at a fixed directory.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    git_cmd: String,
    default_timeout: Option<Duration>,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            git_cmd: "git".to_string(),
            default_timeout: None,
        }
    }

    /// Use a different git executable.
    pub fn with_git_cmd(mut self, git_cmd: impl Into<String>) -> Self {
        self.git_cmd = git_cmd.into();
        self
    }

    /// Kill any git invocation running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Whether the directory is the top level of a git working copy.
    ///
    /// A plain `rev-parse --git-dir` also succeeds inside any enclosing
    /// repository, so the reported top level must be this directory.
    pub async fn is_repo(&self) -> bool {
        let Ok(output) = self.exec(&["rev-parse", "--show-toplevel"]).await else {
            return false;
        };
        if !output.exit.success() {
            return false;
        }

        let toplevel = PathBuf::from(output.stdout.trim_end_matches(&['\r', '\n'][..]));
        match (toplevel.canonicalize(), self.dir.canonicalize()) {
            (Ok(toplevel), Ok(dir)) => toplevel == dir,
            _ => false,
        }
    }

    /// Shallow-clone `branch` of `url` into the (empty) directory.
    pub async fn clone_branch(&self, url: &str, branch: &str) -> Result<(), GitCommandError> {
        self.run(&["clone", "--branch", branch, "--depth", "1", url, "."])
            .await
            .map(drop)
    }

    pub async fn config_get(&self, key: &str) -> Result<String, GitCommandError> {
        let output = self.run(&["config", "--get", key]).await?;
        Ok(output.stdout.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<(), GitCommandError> {
        self.run(&["config", key, value]).await.map(drop)
    }

    /// Drop the working state of every submodule. Their objects stay in
    /// `.git`, so initializing them again is cheap.
    pub async fn submodule_deinit_all(&self) -> Result<(), GitCommandError> {
        self.run(&["submodule", "deinit", "--force", "--all"])
            .await
            .map(drop)
    }

    pub async fn checkout_force(&self, branch: &str) -> Result<(), GitCommandError> {
        self.run(&["checkout", "--force", branch]).await.map(drop)
    }

    pub async fn reset_hard(&self) -> Result<(), GitCommandError> {
        self.run(&["reset", "--hard"]).await.map(drop)
    }

    /// Pull `branch` from `remote` with a forced refspec, so the local branch
    /// becomes an exact copy of upstream instead of a merge.
    pub async fn pull_mirror(&self, remote: &str, branch: &str) -> Result<(), GitCommandError> {
        let refspec = format!("+{b}:{b}", b = branch);
        self.run(&[
            "pull",
            "--force",
            "--recurse-submodules",
            "--depth",
            "1",
            remote,
            &refspec,
        ])
        .await
        .map(drop)
    }

    /// Remove untracked and ignored files.
    pub async fn clean_all(&self) -> Result<(), GitCommandError> {
        self.run(&["clean", "--force", "-d", "-x"]).await.map(drop)
    }

    pub async fn submodule_sync(&self) -> Result<(), GitCommandError> {
        self.run(&["submodule", "sync", "--recursive"])
            .await
            .map(drop)
    }

    pub async fn submodule_update(&self) -> Result<(), GitCommandError> {
        self.run(&["submodule", "update", "--init", "--recursive", "--force"])
            .await
            .map(drop)
    }

    /// Run git and fail on a non-zero exit.
    async fn run(&self, args: &[&str]) -> Result<CapturedOutput, GitCommandError> {
        let output = self.exec(args).await?;
        if output.exit.success() {
            return Ok(output);
        }
        Err(GitCommandError::Failed {
            command: args.join(" "),
            exit: output.exit,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Run git and return whatever it produced.
    async fn exec(&self, args: &[&str]) -> Result<CapturedOutput, GitCommandError> {
        let mut command = Command::new(&self.git_cmd);
        command.args(args).current_dir(&self.dir).envs(GIT_ENV);

        let output = run_captured(&mut command, self.default_timeout, None)
            .await
            .map_err(|e| match e {
                CoreError::Timeout(after) => GitCommandError::Timeout {
                    command: args.join(" "),
                    after,
                },
                CoreError::Io(source) => GitCommandError::Spawn {
                    command: args.join(" "),
                    source,
                },
                other => GitCommandError::Spawn {
                    command: args.join(" "),
                    source: std::io::Error::other(other.to_string()),
                },
            })?;

        debug!(
            dir = %self.dir.display(),
            command = %args.join(" "),
            exit = %output.exit,
            "git finished"
        );
        debug!(stdout = %output.stdout, "git stdout");
        debug!(stderr = %output.stderr, "git stderr");

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_directory_is_not_a_repo() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!GitRepo::new(tmp.path()).is_repo().await);
    }

    #[tokio::test]
    async fn test_subdirectory_of_repo_is_not_a_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let outer = GitRepo::new(tmp.path());
        outer.run(&["init", "-q"]).await.unwrap();
        assert!(outer.is_repo().await);

        let nested = tmp.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        assert!(!GitRepo::new(&nested).is_repo().await);
    }

    #[tokio::test]
    async fn test_config_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = GitRepo::new(tmp.path());
        repo.run(&["init", "-q"]).await.unwrap();

        repo.config_set("remote.origin.url", "https://example.com/a.git")
            .await
            .unwrap();
        assert_eq!(
            repo.config_get("remote.origin.url").await.unwrap(),
            "https://example.com/a.git"
        );
    }

    #[tokio::test]
    async fn test_failure_carries_command_and_output() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = GitRepo::new(tmp.path());

        let err = repo.checkout_force("master").await.unwrap_err();
        assert_eq!(err.command(), "checkout --force master");
        match err {
            GitCommandError::Failed { exit, stderr, .. } => {
                assert!(!exit.success());
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_git_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = GitRepo::new(tmp.path()).with_git_cmd("/nonexistent/git");
        assert!(matches!(
            repo.reset_hard().await,
            Err(GitCommandError::Spawn { .. })
        ));
        assert!(!repo.is_repo().await);
    }
}
