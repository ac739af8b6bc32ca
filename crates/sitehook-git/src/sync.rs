//! Mirror a remote branch into a local working copy.

use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{GitRepo, SyncError};

/// Synchronizes one target's working copy with its upstream branch.
///
/// Syncs are serialized by an internal lock, independent of any scheduling
/// done by the caller, so two code paths can never interleave git mutations
/// on the same working copy.
#[derive(Debug)]
pub struct RepoSync {
    name: String,
    timeout: Option<Duration>,
    lock: Mutex<()>,
}

impl RepoSync {
    /// `name` labels log lines; `timeout` bounds every git invocation.
    pub fn new(name: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            timeout,
            lock: Mutex::new(()),
        }
    }

    /// Bring `target_dir` to an exact copy of `branch` at `clone_url`.
    ///
    /// A failed fetch is reported as [`SyncError::Pull`], leaving the last
    /// synced checkout in place so callers may keep building from it.
    pub async fn sync(
        &self,
        target_dir: &Path,
        clone_url: &str,
        branch: &str,
    ) -> Result<(), SyncError> {
        let _guard = self.lock.lock().await;
        self.sync_locked(target_dir, clone_url, branch).await
    }

    async fn sync_locked(
        &self,
        target_dir: &Path,
        clone_url: &str,
        branch: &str,
    ) -> Result<(), SyncError> {
        if !target_dir.exists() {
            tokio::fs::create_dir_all(target_dir).await?;
        }

        let repo = GitRepo::new(target_dir).with_timeout(self.timeout);

        if !repo.is_repo().await {
            let mut entries = tokio::fs::read_dir(target_dir).await?;
            if entries.next_entry().await?.is_some() {
                warn!(
                    target_name = %self.name,
                    path = %target_dir.display(),
                    "Non-empty build repository is not a valid git repository"
                );
                return Err(SyncError::RepositoryState {
                    path: target_dir.to_path_buf(),
                });
            }

            info!(target_name = %self.name, path = %target_dir.display(), "Build repository missing, cloning");
            repo.clone_branch(clone_url, branch).await?;
        }

        let origin_url = repo.config_get("remote.origin.url").await?;
        if origin_url != clone_url {
            info!(
                target_name = %self.name,
                old = %origin_url,
                new = %clone_url,
                "Origin URL changed, adjusting"
            );
            repo.config_set("remote.origin.url", clone_url).await?;
        }

        // Removed submodules must not linger across branch changes.
        repo.submodule_deinit_all().await?;
        repo.checkout_force(branch).await?;
        repo.reset_hard().await?;

        info!(target_name = %self.name, "Pulling changes from origin");
        if let Err(e) = repo.pull_mirror("origin", branch).await {
            self.refresh_submodules(&repo).await;
            return Err(SyncError::Pull(e));
        }

        if let Err(e) = repo.clean_all().await {
            warn!(target_name = %self.name, error = %e, "git clean failed");
        }

        self.refresh_submodules(&repo).await;
        Ok(())
    }

    /// Sync, update and force-init all submodules recursively. Best effort.
    async fn refresh_submodules(&self, repo: &GitRepo) {
        info!(target_name = %self.name, "Updating submodules");
        if let Err(e) = repo.submodule_sync().await {
            warn!(target_name = %self.name, error = %e, "git submodule sync failed");
        }
        if let Err(e) = repo.submodule_update().await {
            warn!(target_name = %self.name, error = %e, "git submodule update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::process::Command as StdCommand;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
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

    /// A site repository with `index.md` committed on `master`.
    struct Upstream {
        dir: PathBuf,
        url: String,
    }

    impl Upstream {
        fn new(root: &Path) -> Self {
            let dir = root.join("upstream");
            std::fs::create_dir_all(&dir).unwrap();
            git(&dir, &["init", "-q"]);
            git(&dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
            commit_file(&dir, "index.md", "hello");
            let url = format!("file://{}", dir.display());
            Self { dir, url }
        }
    }

    fn commit_file(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", &format!("update {}", name)]);
    }

    fn head(dir: &Path) -> String {
        git(dir, &["rev-parse", "HEAD"])
    }

    #[tokio::test]
    async fn test_sync_clones_missing_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let Upstream { dir: upstream_dir, url } = Upstream::new(tmp.path());
        let checkout = tmp.path().join("site_build_repo");

        RepoSync::new("site", None)
            .sync(&checkout, &url, "master")
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(checkout.join("index.md")).unwrap(),
            "hello"
        );
        assert_eq!(head(&checkout), head(&upstream_dir));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let Upstream { url, .. } = Upstream::new(tmp.path());
        let checkout = tmp.path().join("site_build_repo");
        let sync = RepoSync::new("site", None);

        sync.sync(&checkout, &url, "master").await.unwrap();
        let first = head(&checkout);
        sync.sync(&checkout, &url, "master").await.unwrap();

        assert_eq!(head(&checkout), first);
        assert_eq!(
            std::fs::read_to_string(checkout.join("index.md")).unwrap(),
            "hello"
        );
        assert_eq!(git(&checkout, &["status", "--porcelain"]), "");
    }

    #[tokio::test]
    async fn test_sync_follows_upstream_and_discards_local_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let Upstream { dir: upstream_dir, url } = Upstream::new(tmp.path());
        let checkout = tmp.path().join("site_build_repo");
        let sync = RepoSync::new("site", None);
        sync.sync(&checkout, &url, "master").await.unwrap();

        std::fs::write(checkout.join("index.md"), "local edit").unwrap();
        std::fs::write(checkout.join("stray.txt"), "untracked").unwrap();
        commit_file(&upstream_dir, "about.md", "about");

        sync.sync(&checkout, &url, "master").await.unwrap();

        assert_eq!(head(&checkout), head(&upstream_dir));
        assert_eq!(
            std::fs::read_to_string(checkout.join("index.md")).unwrap(),
            "hello"
        );
        assert!(checkout.join("about.md").exists());
        assert!(!checkout.join("stray.txt").exists());
    }

    #[tokio::test]
    async fn test_non_empty_foreign_directory_needs_intervention() {
        let tmp = tempfile::tempdir().unwrap();
        let Upstream { url, .. } = Upstream::new(tmp.path());
        let checkout = tmp.path().join("site_build_repo");
        std::fs::create_dir_all(&checkout).unwrap();
        std::fs::write(checkout.join("precious.txt"), "keep me").unwrap();

        let err = RepoSync::new("site", None)
            .sync(&checkout, &url, "master")
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::RepositoryState { .. }));
        assert_eq!(
            std::fs::read_to_string(checkout.join("precious.txt")).unwrap(),
            "keep me"
        );
    }

    #[tokio::test]
    async fn test_clone_failure_is_git_error() {
        let tmp = tempfile::tempdir().unwrap();
        let checkout = tmp.path().join("site_build_repo");
        let url = format!("file://{}", tmp.path().join("missing").display());

        let err = RepoSync::new("site", None)
            .sync(&checkout, &url, "master")
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Git(_)));
        assert!(!err.is_pull_error());
    }

    #[tokio::test]
    async fn test_changed_origin_url_is_adopted() {
        let tmp = tempfile::tempdir().unwrap();
        let Upstream { dir: upstream_dir, url } = Upstream::new(tmp.path());
        let checkout = tmp.path().join("site_build_repo");
        let sync = RepoSync::new("site", None);
        sync.sync(&checkout, &url, "master").await.unwrap();

        let plain_path = upstream_dir.display().to_string();
        sync.sync(&checkout, &plain_path, "master").await.unwrap();

        assert_eq!(git(&checkout, &["config", "--get", "remote.origin.url"]), plain_path);
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_pull_error_and_keeps_checkout() {
        let tmp = tempfile::tempdir().unwrap();
        let Upstream { url, .. } = Upstream::new(tmp.path());
        let checkout = tmp.path().join("site_build_repo");
        let sync = RepoSync::new("site", None);
        sync.sync(&checkout, &url, "master").await.unwrap();
        let before = head(&checkout);

        let unreachable = format!("file://{}", tmp.path().join("gone").display());
        let err = sync.sync(&checkout, &unreachable, "master").await.unwrap_err();

        assert!(err.is_pull_error(), "unexpected error: {err}");
        assert_eq!(head(&checkout), before);
        assert_eq!(
            std::fs::read_to_string(checkout.join("index.md")).unwrap(),
            "hello"
        );
    }
}
