//! Deployment target configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::{Error, Result};

/// Placeholder replaced by the generator output directory.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Placeholder replaced by the path of the build result report.
pub const RESULT_PLACEHOLDER: &str = "{result}";

/// One named deployment pipeline. Immutable once a runner owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Unique name, used in URLs and derived directory names.
    pub name: String,
    /// Directory where building takes place. Several targets may share one.
    pub working_directory: PathBuf,
    /// Upstream URL of the site repository.
    pub clone_url: String,
    /// Branch that is built and deployed.
    pub branch: String,
    /// Command producing the site into `{output}`.
    pub build_command: String,
    /// Command copying `{output}` to its final destination.
    pub install_command: String,
    /// Added to the inherited environment of the build command.
    #[serde(default)]
    pub build_env: BTreeMap<String, String>,
}

impl TargetConfig {
    /// Check the invariants the runner relies on.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidTarget(format!(
                "target name '{}' may only contain letters, digits, '_' and '-'",
                self.name
            )));
        }

        let required = [
            ("clone-url", &self.clone_url),
            ("branch", &self.branch),
            ("build-command", &self.build_command),
            ("install-command", &self.install_command),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::InvalidTarget(format!(
                    "{} of target '{}' is empty",
                    field, self.name
                )));
            }
        }

        if self.working_directory.as_os_str().is_empty() {
            return Err(Error::InvalidTarget(format!(
                "working-directory of target '{}' is empty",
                self.name
            )));
        }

        if !self.install_command.contains(OUTPUT_PLACEHOLDER) {
            return Err(Error::InvalidTarget(format!(
                "install-command of target '{}' must reference {}",
                self.name, OUTPUT_PLACEHOLDER
            )));
        }

        Ok(())
    }

    /// Create the working directory if needed and make its path absolute.
    pub fn with_resolved_working_directory(mut self) -> Result<Self> {
        if !self.working_directory.exists() {
            info!(
                target_name = %self.name,
                path = %self.working_directory.display(),
                "Creating working directory"
            );
            std::fs::create_dir_all(&self.working_directory)?;
        }
        self.working_directory = self.working_directory.canonicalize()?;
        Ok(self)
    }

    /// Git working copy exclusively owned by this target.
    pub fn build_repo_path(&self) -> PathBuf {
        self.working_directory
            .join(format!("{}_build_repo", self.name))
    }

    /// Generator output directory exclusively owned by this target.
    pub fn output_path(&self) -> PathBuf {
        self.working_directory.join(format!("{}_output", self.name))
    }

    /// Where the build command may write its result report.
    pub fn result_path(&self) -> PathBuf {
        self.working_directory
            .join(format!("{}_result.json", self.name))
    }

    /// Build command with all placeholders substituted.
    pub fn resolved_build_command(&self) -> String {
        self.build_command
            .replace(OUTPUT_PLACEHOLDER, &self.output_path().to_string_lossy())
            .replace(RESULT_PLACEHOLDER, &self.result_path().to_string_lossy())
    }

    /// Install command with the output placeholder substituted.
    pub fn resolved_install_command(&self) -> String {
        self.install_command
            .replace(OUTPUT_PLACEHOLDER, &self.output_path().to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_target() -> TargetConfig {
        TargetConfig {
            name: "website_master".to_string(),
            working_directory: PathBuf::from("/srv/deploy"),
            clone_url: "https://example.com/site.git".to_string(),
            branch: "master".to_string(),
            build_command: "make html OUTPUT=\"{output}\" REPORT={result}".to_string(),
            install_command: "rsync -r '{output}/' /var/www".to_string(),
            build_env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_derived_paths() {
        let target = make_target();
        assert_eq!(
            target.build_repo_path(),
            PathBuf::from("/srv/deploy/website_master_build_repo")
        );
        assert_eq!(
            target.output_path(),
            PathBuf::from("/srv/deploy/website_master_output")
        );
        assert_eq!(
            target.result_path(),
            PathBuf::from("/srv/deploy/website_master_result.json")
        );
    }

    #[test]
    fn test_resolved_commands() {
        let target = make_target();
        assert_eq!(
            target.resolved_build_command(),
            "make html OUTPUT=\"/srv/deploy/website_master_output\" \
             REPORT=/srv/deploy/website_master_result.json"
        );
        assert_eq!(
            target.resolved_install_command(),
            "rsync -r '/srv/deploy/website_master_output/' /var/www"
        );
    }

    #[test]
    fn test_validate_accepts_good_target() {
        assert!(make_target().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_odd_names() {
        let mut target = make_target();
        target.name = "my site".to_string();
        assert!(matches!(target.validate(), Err(Error::InvalidTarget(_))));

        target.name = "../escape".to_string();
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_validate_requires_output_in_install_command() {
        let mut target = make_target();
        target.install_command = "rsync -r build/ /var/www".to_string();
        let err = target.validate().unwrap_err();
        assert!(err.to_string().contains("{output}"));
    }

    #[test]
    fn test_validate_rejects_empty_branch() {
        let mut target = make_target();
        target.branch = "  ".to_string();
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_resolving_working_directory_creates_it() {
        let tmp = tempfile::tempdir().unwrap();
        let mut target = make_target();
        target.working_directory = tmp.path().join("nested").join("work");

        let target = target.with_resolved_working_directory().unwrap();
        assert!(target.working_directory.is_dir());
        assert!(target.working_directory.is_absolute());
    }
}
