//! Remote repository access.
//!
//! The session talks to a hosted repository only through [`RepositoryClient`].
//! [`GitHubClient`] is the production implementation and [`MemoryRepository`]
//! keeps everything in process for sandbox sessions and tests.

pub mod github;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use github::GitHubClient;
pub use memory::MemoryRepository;

/// Opaque content revision marker (a blob SHA on GitHub).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
}

impl RepoInfo {
    pub fn new(owner: &str, repo: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    /// Parse `owner/repo`.
    pub fn parse(slug: &str) -> Option<Self> {
        let (owner, repo) = slug.trim().split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self::new(owner, repo))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// An authenticated binding to one repository.
#[derive(Clone, PartialEq, Eq)]
pub struct RepoContext {
    pub token: String,
    pub repo: RepoInfo,
}

impl RepoContext {
    pub fn new(token: &str, repo: RepoInfo) -> Self {
        Self {
            token: token.to_string(),
            repo,
        }
    }
}

impl fmt::Debug for RepoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoContext")
            .field("token", &"<redacted>")
            .field("repo", &self.repo)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Blob,
    Tree,
}

/// One item of a flat recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    pub revision: RevisionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content: String,
    pub revision: RevisionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for RepositoryError {
    fn from(error: reqwest::Error) -> Self {
        RepositoryError::Transport(error.to_string())
    }
}

#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Flat recursive listing of the branch head.
    async fn get_tree(&self, ctx: &RepoContext) -> Result<Vec<TreeEntry>, RepositoryError>;

    /// Fails with `NotFound` when the path is missing or is a directory.
    async fn get_blob(&self, ctx: &RepoContext, path: &str) -> Result<Blob, RepositoryError>;

    /// Current revision of the file at `path`, or `None` when there is no
    /// file there. Works for files whose content is not text.
    async fn get_revision(
        &self,
        ctx: &RepoContext,
        path: &str,
    ) -> Result<Option<RevisionId>, RepositoryError>;

    /// Create the blob when `expected` is `None`, otherwise update it if the
    /// stored revision still equals `expected`. Returns the new revision.
    async fn put_blob(
        &self,
        ctx: &RepoContext,
        path: &str,
        content: &str,
        commit_message: &str,
        expected: Option<&RevisionId>,
    ) -> Result<RevisionId, RepositoryError>;

    async fn download_archive(&self, ctx: &RepoContext) -> Result<Vec<u8>, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_slug() {
        let info = RepoInfo::parse("octocat/hello-world").unwrap();
        assert_eq!(info.owner, "octocat");
        assert_eq!(info.repo, "hello-world");
        assert_eq!(info.branch, None);
        assert_eq!(info.full_name(), "octocat/hello-world");
    }

    #[test]
    fn test_parse_rejects_bad_slugs() {
        for slug in ["octocat", "/repo", "owner/", "a/b/c", ""] {
            assert!(RepoInfo::parse(slug).is_none(), "accepted {slug:?}");
        }
    }

    #[test]
    fn test_context_debug_hides_token() {
        let ctx = RepoContext::new("ghp_secret", RepoInfo::new("o", "r"));
        let rendered = format!("{ctx:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_errors_display_message_verbatim() {
        let error = RepositoryError::Conflict("a.txt does not match 1234".to_string());
        assert_eq!(error.to_string(), "a.txt does not match 1234");
    }
}
