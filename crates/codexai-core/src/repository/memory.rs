use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Blob, EntryKind, RepoContext, RepositoryClient, RepositoryError, RevisionId, TreeEntry};

struct StoredFile {
    content: String,
    revision: RevisionId,
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, StoredFile>,
    next_revision: u64,
    fail_next_tree: Option<String>,
    writes: usize,
    tree_reads: usize,
}

impl MemoryState {
    fn mint_revision(&mut self) -> RevisionId {
        self.next_revision += 1;
        RevisionId(format!("rev-{}", self.next_revision))
    }

    fn directories(&self) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for path in self.files.keys() {
            let mut end = 0;
            while let Some(offset) = path[end..].find('/') {
                end += offset;
                dirs.insert(path[..end].to_string());
                end += 1;
            }
        }
        dirs
    }
}

/// Repository kept entirely in process.
///
/// Revisions are numbered `rev-1`, `rev-2`, ... in write order and the same
/// optimistic-concurrency rules as the hosted API apply.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let repository = Self::new();
        {
            let mut state = repository.state();
            for (path, content) in files {
                let revision = state.mint_revision();
                state.files.insert(
                    path.to_string(),
                    StoredFile {
                        content: content.to_string(),
                        revision,
                    },
                );
            }
        }
        repository
    }

    pub fn file(&self, path: &str) -> Option<Blob> {
        self.state().files.get(path).map(|file| Blob {
            content: file.content.clone(),
            revision: file.revision.clone(),
        })
    }

    /// Make the next `get_tree` call fail with `message`.
    pub fn fail_next_tree(&self, message: &str) {
        self.state().fail_next_tree = Some(message.to_string());
    }

    /// Number of successful `put_blob` calls.
    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    pub fn tree_read_count(&self) -> usize {
        self.state().tree_reads
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RepositoryClient for MemoryRepository {
    async fn get_tree(&self, _ctx: &RepoContext) -> Result<Vec<TreeEntry>, RepositoryError> {
        let mut state = self.state();
        state.tree_reads += 1;
        if let Some(message) = state.fail_next_tree.take() {
            return Err(RepositoryError::Transport(message));
        }

        let mut entries: Vec<TreeEntry> = state
            .directories()
            .into_iter()
            .map(|dir| TreeEntry {
                revision: RevisionId(format!("tree:{}", dir)),
                path: dir,
                kind: EntryKind::Tree,
            })
            .collect();
        entries.extend(state.files.iter().map(|(path, file)| TreeEntry {
            path: path.clone(),
            kind: EntryKind::Blob,
            revision: file.revision.clone(),
        }));
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get_blob(&self, _ctx: &RepoContext, path: &str) -> Result<Blob, RepositoryError> {
        let state = self.state();
        match state.files.get(path) {
            Some(file) => Ok(Blob {
                content: file.content.clone(),
                revision: file.revision.clone(),
            }),
            None if state.directories().contains(path) => Err(RepositoryError::NotFound(format!(
                "Path is a directory, not a file: {}",
                path
            ))),
            None => Err(RepositoryError::NotFound(format!(
                "Could not fetch file content for: {}",
                path
            ))),
        }
    }

    async fn get_revision(
        &self,
        _ctx: &RepoContext,
        path: &str,
    ) -> Result<Option<RevisionId>, RepositoryError> {
        Ok(self.state().files.get(path).map(|file| file.revision.clone()))
    }

    async fn put_blob(
        &self,
        _ctx: &RepoContext,
        path: &str,
        content: &str,
        _commit_message: &str,
        expected: Option<&RevisionId>,
    ) -> Result<RevisionId, RepositoryError> {
        let mut state = self.state();
        match (state.files.get(path), expected) {
            (Some(_), None) => {
                return Err(RepositoryError::AlreadyExists(format!(
                    "File already exists at path: {}",
                    path
                )));
            }
            (None, Some(revision)) => {
                return Err(RepositoryError::Conflict(format!(
                    "Failed to update file: {} does not exist at {}",
                    path, revision
                )));
            }
            (Some(file), Some(revision)) if &file.revision != revision => {
                return Err(RepositoryError::Conflict(format!(
                    "Failed to update file: {} does not match {}",
                    path, revision
                )));
            }
            _ => {}
        }
        if state.directories().contains(path) {
            return Err(RepositoryError::Conflict(format!(
                "Failed to write file: {} is a directory",
                path
            )));
        }

        let revision = state.mint_revision();
        state.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                revision: revision.clone(),
            },
        );
        state.writes += 1;
        Ok(revision)
    }

    async fn download_archive(&self, _ctx: &RepoContext) -> Result<Vec<u8>, RepositoryError> {
        Err(RepositoryError::Unsupported(
            "Archive download is not available for the in-memory repository".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepoInfo;

    fn ctx() -> RepoContext {
        RepoContext::new("token", RepoInfo::new("local", "sandbox"))
    }

    #[tokio::test]
    async fn test_tree_lists_directories_before_their_files() {
        let repo = MemoryRepository::with_files([("src/lib.rs", "x"), ("README.md", "y")]);
        let tree = repo.get_tree(&ctx()).await.unwrap();

        let listing: Vec<(&str, EntryKind)> =
            tree.iter().map(|e| (e.path.as_str(), e.kind)).collect();
        assert_eq!(
            listing,
            vec![
                ("README.md", EntryKind::Blob),
                ("src", EntryKind::Tree),
                ("src/lib.rs", EntryKind::Blob),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_then_update_with_token() {
        let repo = MemoryRepository::new();
        let first = repo.put_blob(&ctx(), "a.txt", "one", "init", None).await.unwrap();
        let second = repo
            .put_blob(&ctx(), "a.txt", "two", "edit", Some(&first))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(repo.file("a.txt").unwrap().content, "two");
        assert_eq!(repo.write_count(), 2);
    }

    #[tokio::test]
    async fn test_create_over_existing_is_rejected() {
        let repo = MemoryRepository::with_files([("a.txt", "one")]);
        let error = repo.put_blob(&ctx(), "a.txt", "two", "init", None).await.unwrap_err();
        assert!(matches!(error, RepositoryError::AlreadyExists(_)));
        assert_eq!(repo.file("a.txt").unwrap().content, "one");
    }

    #[tokio::test]
    async fn test_stale_token_is_rejected() {
        let repo = MemoryRepository::new();
        let first = repo.put_blob(&ctx(), "a.txt", "one", "init", None).await.unwrap();
        repo.put_blob(&ctx(), "a.txt", "two", "edit", Some(&first))
            .await
            .unwrap();

        let error = repo
            .put_blob(&ctx(), "a.txt", "three", "stale", Some(&first))
            .await
            .unwrap_err();
        assert!(matches!(error, RepositoryError::Conflict(_)));
        assert_eq!(repo.file("a.txt").unwrap().content, "two");
    }

    #[tokio::test]
    async fn test_revision_lookup_skips_content() {
        let repo = MemoryRepository::with_files([("src/lib.rs", "x")]);
        let stored = repo.file("src/lib.rs").unwrap().revision;

        assert_eq!(repo.get_revision(&ctx(), "src/lib.rs").await.unwrap(), Some(stored));
        assert_eq!(repo.get_revision(&ctx(), "src").await.unwrap(), None);
        assert_eq!(repo.get_revision(&ctx(), "missing.rs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_directory_is_not_a_blob() {
        let repo = MemoryRepository::with_files([("src/lib.rs", "x")]);
        let error = repo.get_blob(&ctx(), "src").await.unwrap_err();
        assert!(matches!(error, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fail_next_tree_only_once() {
        let repo = MemoryRepository::new();
        repo.fail_next_tree("rate limited");

        let error = repo.get_tree(&ctx()).await.unwrap_err();
        assert_eq!(error.to_string(), "rate limited");
        assert!(repo.get_tree(&ctx()).await.is_ok());
        assert_eq!(repo.tree_read_count(), 2);
    }
}
