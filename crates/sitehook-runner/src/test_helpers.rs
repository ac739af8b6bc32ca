//! Git fixtures and polling helpers shared by runner tests.

use sitehook_core::{StatusLog, TargetConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Sitehook Test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn commit_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", &format!("update {}", name)]);
}

pub fn head(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"])
}

/// A site repository with `index.md` committed on `master`.
pub struct Upstream {
    pub dir: PathBuf,
    pub url: String,
}

impl Upstream {
    pub fn new(root: &Path) -> Self {
        let dir = root.join("upstream");
        std::fs::create_dir_all(&dir).unwrap();
        git(&dir, &["init", "-q"]);
        git(&dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        commit_file(&dir, "index.md", "hello");
        let url = format!("file://{}", dir.display());
        Self { dir, url }
    }
}

pub fn make_target(root: &Path, clone_url: &str, build: &str, install: &str) -> TargetConfig {
    TargetConfig {
        name: "site".to_string(),
        working_directory: root.join("work"),
        clone_url: clone_url.to_string(),
        branch: "master".to_string(),
        build_command: build.to_string(),
        install_command: install.to_string(),
        build_env: BTreeMap::new(),
    }
}

pub fn messages(status: &StatusLog) -> Vec<String> {
    status.snapshot().into_iter().map(|e| e.message).collect()
}

pub fn count_messages(status: &StatusLog, message: &str) -> usize {
    status
        .snapshot()
        .iter()
        .filter(|e| e.message == message)
        .count()
}

/// Poll `condition` until it holds, failing the test after ten seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
