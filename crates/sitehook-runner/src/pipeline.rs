//! The job bodies executed on a runner's worker.
//!
//! A pipeline run syncs the build repository, runs the build command and then
//! the install command, recording every step in the target's status log. The
//! last event of every run has `running == false`.

use serde::Serialize;
use serde_json::json;
use sitehook_core::process::{AbortHandle, CapturedOutput, ProcessExit, run_captured};
use sitehook_core::{Payload, StatusLog, TargetConfig};
use sitehook_git::RepoSync;
use std::fmt;
use std::io::ErrorKind;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::RunnerError;
use crate::job::{JobKind, JobResult};

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    Succeeded,
    /// The build command failed. The install step did not run.
    BuildFailed { status: Option<i32> },
    /// The install command failed. The deployed site may be incomplete.
    InstallFailed { status: Option<i32> },
    /// The build was killed on request.
    Aborted,
}

impl BuildOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildOutcome::Succeeded => "succeeded",
            BuildOutcome::BuildFailed { .. } => "build_failed",
            BuildOutcome::InstallFailed { .. } => "install_failed",
            BuildOutcome::Aborted => "aborted",
        }
    }

    /// Succeeded or aborted. An abort is requested, so it is not a failure.
    pub fn is_ok(&self) -> bool {
        matches!(self, BuildOutcome::Succeeded | BuildOutcome::Aborted)
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildOutcome::Succeeded => write!(f, "succeeded"),
            BuildOutcome::BuildFailed { .. } => write!(f, "build failed"),
            BuildOutcome::InstallFailed { .. } => write!(f, "install failed, site may be broken"),
            BuildOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// State shared between a runner's handle and its worker.
#[derive(Debug)]
pub(crate) struct RunnerInner {
    pub target: TargetConfig,
    pub status: StatusLog,
    pub abort: AbortHandle,
    pub repo_sync: RepoSync,
}

impl RunnerInner {
    pub async fn run_job(&self, kind: JobKind) -> JobResult {
        match kind {
            JobKind::Pipeline { ignore_pull_error } => {
                self.run_pipeline(ignore_pull_error).await.map(Some)
            }
            JobKind::Clean => self.clean_working_dir().await.map(|()| None),
        }
    }

    async fn run_pipeline(&self, ignore_pull_error: bool) -> Result<BuildOutcome, RunnerError> {
        match self.pipeline_steps(ignore_pull_error).await {
            Ok(outcome) => {
                info!(target_name = %self.target.name, outcome = %outcome, "End of build");
                Ok(outcome)
            }
            Err(e) => {
                error!(target_name = %self.target.name, error = %e, "Build stopped with error");
                self.status.append(
                    false,
                    "Build stopped with error",
                    Some(payload([("error", json!(e.to_string()))])),
                    false,
                );
                Err(e)
            }
        }
    }

    async fn pipeline_steps(&self, ignore_pull_error: bool) -> Result<BuildOutcome, RunnerError> {
        let target = &self.target;
        info!(target_name = %target.name, branch = %target.branch, "Starting repository sync");
        self.status
            .append(true, "Starting repository sync", None, true);

        match self
            .repo_sync
            .sync(&target.build_repo_path(), &target.clone_url, &target.branch)
            .await
        {
            Ok(()) => {}
            Err(e) if ignore_pull_error && e.is_pull_error() => {
                warn!(target_name = %target.name, error = %e, "Git pull failed, building last synced checkout");
                self.status.append(
                    true,
                    "Git pull failed, building last synced checkout",
                    Some(payload([("error", json!(e.to_string()))])),
                    true,
                );
            }
            Err(e) => return Err(e.into()),
        }

        if self.abort.is_aborted() {
            info!(target_name = %target.name, "Abort requested during sync, skipping build");
            return Ok(self.finish(BuildOutcome::Aborted));
        }

        let build_command = target.resolved_build_command();
        info!(target_name = %target.name, cmd = %build_command, "Starting build");
        self.status.append(
            true,
            "Starting build",
            Some(payload([("cmd", json!(build_command))])),
            true,
        );

        let mut command = shell(&build_command);
        command
            .current_dir(target.build_repo_path())
            .envs(&target.build_env);
        let output = run_captured(&mut command, None, Some(&self.abort))
            .await
            .map_err(|source| RunnerError::Spawn {
                step: "build",
                source,
            })?;
        log_output(&target.name, "build", &output);

        let outcome = if output.exit.success() {
            self.status
                .append(true, "Build finished", Some(output_payload(&output)), true);
            self.final_install().await?
        } else if output.exit.signal().is_some() || self.abort.is_aborted() {
            // Only a requested abort counts as a clean stop.
            let aborted = self.abort.is_aborted();
            info!(target_name = %target.name, exit = %output.exit, aborted, "Killed build");
            self.status
                .append(aborted, "Killed build", Some(output_payload(&output)), false);
            if aborted {
                BuildOutcome::Aborted
            } else {
                BuildOutcome::BuildFailed { status: None }
            }
        } else {
            warn!(target_name = %target.name, exit = %output.exit, "Build failed");
            self.status
                .append(false, "Build failed", Some(output_payload(&output)), true);
            BuildOutcome::BuildFailed {
                status: output.exit.code(),
            }
        };

        Ok(self.finish(outcome))
    }

    /// Run the install command. It is not registered with the abort handle,
    /// so an install that has started always runs to completion.
    async fn final_install(&self) -> Result<BuildOutcome, RunnerError> {
        let target = &self.target;
        let install_command = target.resolved_install_command();
        info!(target_name = %target.name, cmd = %install_command, "Starting final install");
        self.status.append(
            true,
            "Starting final install",
            Some(payload([("cmd", json!(install_command))])),
            true,
        );

        let mut command = shell(&install_command);
        command.current_dir(&target.working_directory);
        let output = run_captured(&mut command, None, None)
            .await
            .map_err(|source| RunnerError::Spawn {
                step: "install",
                source,
            })?;
        log_output(&target.name, "install", &output);

        if output.exit.success() {
            self.status
                .append(true, "Install finished", Some(output_payload(&output)), true);
            return Ok(BuildOutcome::Succeeded);
        }

        error!(target_name = %target.name, exit = %output.exit, "Install failed, site may be broken!");
        self.status.append(
            false,
            "Install failed, site may be broken!",
            Some(output_payload(&output)),
            true,
        );
        Ok(BuildOutcome::InstallFailed {
            status: output.exit.code(),
        })
    }

    /// Append the terminal event of a pipeline run. Its `ok` and payload carry
    /// over from the event before it.
    fn finish(&self, outcome: BuildOutcome) -> BuildOutcome {
        let previous = self.status.latest();
        let ok = previous.as_ref().map_or(outcome.is_ok(), |status| status.ok);
        let mut payload = previous.and_then(|status| status.payload).unwrap_or_default();
        payload.insert("outcome".to_string(), json!(outcome.as_str()));

        self.status
            .append(ok, format!("End of build: {}", outcome), Some(payload), false);
        outcome
    }

    async fn clean_working_dir(&self) -> Result<(), RunnerError> {
        let target = &self.target;
        info!(target_name = %target.name, "Starting cleaning of working dir");
        self.status
            .append(true, "Starting cleaning of working dir", None, true);

        for path in [target.build_repo_path(), target.output_path()] {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    error!(target_name = %target.name, path = %path.display(), error = %e, "Cleaning failed");
                    self.status.append(
                        false,
                        "Cleaning of working dir failed",
                        Some(payload([
                            ("path", json!(path.display().to_string())),
                            ("error", json!(e.to_string())),
                        ])),
                        false,
                    );
                    return Err(RunnerError::Clean(e));
                }
            }
        }

        info!(target_name = %target.name, "Working dir cleaned");
        self.status.append(true, "Working dir cleaned", None, false);
        Ok(())
    }
}

fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

fn payload<const N: usize>(entries: [(&str, serde_json::Value); N]) -> Payload {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn output_payload(output: &CapturedOutput) -> Payload {
    let mut payload = payload([
        ("status", json!(output.exit.code())),
        ("stdout", json!(output.stdout)),
        ("stderr", json!(output.stderr)),
    ]);
    if let ProcessExit::Signal(signal) = output.exit {
        payload.insert("signal".to_string(), json!(signal));
    }
    payload
}

fn log_output(name: &str, step: &str, output: &CapturedOutput) {
    info!(target_name = %name, step, exit = %output.exit, "Command finished");
    if !output.stdout.is_empty() {
        info!(target_name = %name, step, stdout = %output.stdout, "Command stdout");
    }
    if !output.stderr.is_empty() {
        info!(target_name = %name, step, stderr = %output.stderr, "Command stderr");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(BuildOutcome::Succeeded.to_string(), "succeeded");
        assert_eq!(
            BuildOutcome::InstallFailed { status: Some(2) }.to_string(),
            "install failed, site may be broken"
        );
        assert_eq!(
            BuildOutcome::BuildFailed { status: None }.as_str(),
            "build_failed"
        );
        assert!(BuildOutcome::Aborted.is_ok());
        assert!(!BuildOutcome::BuildFailed { status: Some(1) }.is_ok());
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let value = serde_json::to_value(BuildOutcome::InstallFailed { status: Some(2) }).unwrap();
        assert_eq!(value, json!({ "outcome": "install_failed", "status": 2 }));
    }

    #[test]
    fn test_output_payload_records_signal() {
        let output = CapturedOutput {
            exit: ProcessExit::Signal(9),
            stdout: String::new(),
            stderr: "killed".to_string(),
        };
        let payload = output_payload(&output);
        assert_eq!(payload["status"], json!(null));
        assert_eq!(payload["signal"], json!(9));
        assert_eq!(payload["stderr"], json!("killed"));
    }
}
