//! Push events from git hosting webhooks.

use serde::{Deserialize, Serialize};

/// The fields of a push notification that decide whether a target rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub r#ref: String,
    pub after: Option<String>,
    pub repository_full_name: Option<String>,
    pub pusher: String,
}

impl PushEvent {
    /// Parse a GitHub push webhook payload. Returns `None` without a `ref`.
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let r#ref = payload.get("ref")?.as_str()?.to_string();
        let after = payload
            .get("after")
            .and_then(|a| a.as_str())
            .map(String::from);
        let repository_full_name = payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(|n| n.as_str())
            .map(String::from);
        let pusher = payload
            .get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();

        Some(PushEvent {
            r#ref,
            after,
            repository_full_name,
            pusher,
        })
    }

    /// Whether this push updates `branch`.
    pub fn targets_branch(&self, branch: &str) -> bool {
        ref_matches_branch(&self.r#ref, branch)
    }
}

/// A ref names a branch either exactly or in its `refs/heads/<branch>` form.
pub fn ref_matches_branch(push_ref: &str, branch: &str) -> bool {
    push_ref == branch || push_ref.strip_prefix("refs/heads/") == Some(branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ref_matching() {
        assert!(ref_matches_branch("master", "master"));
        assert!(ref_matches_branch("refs/heads/master", "master"));
        assert!(!ref_matches_branch("refs/heads/main", "master"));
        assert!(!ref_matches_branch("refs/tags/master", "master"));
        assert!(!ref_matches_branch("refs/heads/master-old", "master"));
        assert!(!ref_matches_branch("", "master"));
    }

    #[test]
    fn test_parse_github_push() {
        let payload = json!({
            "ref": "refs/heads/master",
            "before": "0000000",
            "after": "abc1234",
            "repository": { "full_name": "ieee/website" },
            "pusher": { "name": "octocat" }
        });

        let event = PushEvent::from_github_payload(&payload).unwrap();
        assert_eq!(event.r#ref, "refs/heads/master");
        assert_eq!(event.after.as_deref(), Some("abc1234"));
        assert_eq!(event.repository_full_name.as_deref(), Some("ieee/website"));
        assert_eq!(event.pusher, "octocat");
        assert!(event.targets_branch("master"));
        assert!(!event.targets_branch("develop"));
    }

    #[test]
    fn test_parse_requires_ref() {
        assert!(PushEvent::from_github_payload(&json!({ "zen": "hi" })).is_none());
    }
}
