//! CLI command implementations.

use anyhow::{Context, Result, anyhow};
use sitehook_config::{DeployConfig, load_deploy_config};
use sitehook_core::BuildStatus;
use sitehook_runner::{BuildOptions, BuildRunner, RunnerError};
use std::path::Path;

/// Parse and check a configuration file. Returns whether it is valid.
pub fn validate(path: &Path) -> Result<bool> {
    match load_deploy_config(path) {
        Ok(config) => {
            print!("{}", describe(&config));
            println!("Configuration is valid");
            Ok(true)
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            Ok(false)
        }
    }
}

/// Build one target and print its status log. Returns whether the build
/// succeeded.
pub async fn build(path: &Path, target: &str, ignore_pull_error: bool) -> Result<bool> {
    let config = load_deploy_config(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let target_config = config
        .target(target)
        .cloned()
        .ok_or_else(|| anyhow!("no target named '{}' in {}", target, path.display()))?;

    let runner = BuildRunner::new(target_config, config.git_timeout)?;
    let result = runner
        .build(BuildOptions {
            wait: true,
            ignore_pull_error,
            ..Default::default()
        })
        .await;
    runner.shutdown().await;

    for event in runner.status().snapshot() {
        println!("{}", format_event(&event));
    }

    match result {
        Ok(Some(outcome)) => {
            println!("Build {}", outcome);
            Ok(outcome.is_ok())
        }
        Ok(None) => Ok(true),
        Err(RunnerError::Sync(e)) => {
            println!("Build stopped: {}", e);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn describe(config: &DeployConfig) -> String {
    let mut out = String::new();
    for target in &config.targets {
        out.push_str(&format!(
            "{} ({} @ {})\n  build:   {}\n  install: {}\n  workdir: {}\n",
            target.name,
            target.clone_url,
            target.branch,
            target.build_command,
            target.install_command,
            target.working_directory.display(),
        ));
        for schedule in config.schedules_for(&target.name) {
            out.push_str(&format!("  schedule {}: {}\n", schedule.job_name(), schedule.schedule));
        }
    }
    out
}

fn format_event(event: &BuildStatus) -> String {
    let marker = match (event.ok, event.running) {
        (false, _) => "FAIL",
        (true, true) => " .. ",
        (true, false) => " ok ",
    };
    let mut line = format!(
        "[{}] {} {}",
        event.date.format("%Y-%m-%d %H:%M:%S"),
        marker,
        event.message
    );
    if let Some(payload) = &event.payload {
        for key in ["cmd", "status", "error"] {
            if let Some(value) = payload.get(key).filter(|v| !v.is_null()) {
                line.push_str(&format!(" {}={}", key, value));
            }
        }
    }
    line
}
