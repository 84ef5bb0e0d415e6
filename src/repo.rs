//! Repository identity and statistics types.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Reference to a GitHub repository. Identity is the exact `owner/name` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Cache and result-map key (`owner/name`, case-sensitive)
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Popularity and activity facts for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStats {
    pub stars: u64,
    /// ISO-8601 timestamp of the latest commit on the default branch
    pub last_commit_at: Option<String>,
}

/// GraphQL quota snapshot returned alongside a batch. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u64,
    pub reset_at: String,
    pub cost: Option<u64>,
}

/// Parse a GitHub repository URL into a `RepoRef`.
///
/// Only `github.com` URLs with at least `owner/name` in the path are accepted.
/// Deep links (`/owner/name/issues/1`) resolve to the repository itself and a
/// trailing `.git` is stripped.
pub fn parse_github_repo(url: &str) -> Option<RepoRef> {
    let parsed = Url::parse(url).ok()?;
    if parsed.host_str() != Some("github.com") {
        return None;
    }

    let mut parts = parsed
        .path_segments()?
        .map(str::trim)
        .filter(|part| !part.is_empty());

    let owner = parts.next()?;
    let name = parts.next()?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    if name.is_empty() {
        return None;
    }

    Some(RepoRef::new(owner, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_case_sensitive() {
        let a = RepoRef::new("Owner", "Repo");
        let b = RepoRef::new("owner", "repo");
        assert_eq!(a.key(), "Owner/Repo");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_parse_github_repo() {
        let repo = parse_github_repo("https://github.com/tokio-rs/tokio").unwrap();
        assert_eq!(repo, RepoRef::new("tokio-rs", "tokio"));
    }

    #[test]
    fn test_parse_deep_link_and_git_suffix() {
        assert_eq!(
            parse_github_repo("https://github.com/serde-rs/serde/tree/master/serde"),
            Some(RepoRef::new("serde-rs", "serde"))
        );
        assert_eq!(
            parse_github_repo("https://github.com/rust-lang/rust.git"),
            Some(RepoRef::new("rust-lang", "rust"))
        );
    }

    #[test]
    fn test_parse_rejects_non_repo_urls() {
        assert_eq!(parse_github_repo("https://github.com/tokio-rs"), None);
        assert_eq!(parse_github_repo("https://gitlab.com/a/b"), None);
        assert_eq!(parse_github_repo("https://www.github.com/a/b"), None);
        assert_eq!(parse_github_repo("not a url"), None);
        assert_eq!(parse_github_repo("#section"), None);
    }
}
