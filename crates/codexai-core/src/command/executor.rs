//! Performs one extracted command against the session's collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use super::{Command, Effect, ExecutionOutcome};
use crate::repository::{RepoContext, RepositoryClient, RepositoryError, RevisionId};
use crate::run::RunError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("repository not connected")]
    NotConnected,
    #[error("project already running")]
    AlreadyRunning,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Run(RunError),
}

impl From<RunError> for ExecutionError {
    fn from(error: RunError) -> Self {
        match error {
            RunError::AlreadyRunning => ExecutionError::AlreadyRunning,
            other => ExecutionError::Run(other),
        }
    }
}

/// Starts a run sequence.
///
/// `launch` must check the run guard and claim it before returning, so two
/// callers racing for it see exactly one `Ok`.
pub trait RunLauncher: Send + Sync {
    fn launch(&self, command: &str) -> Result<(), RunError>;
}

/// One async lock per repository path.
///
/// A file write holds its path's lock from the revision lookup through the
/// write.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let lock = locks.entry(path.to_string()).or_default().clone();
            lock
        };
        lock.lock_owned().await
    }
}

/// Revisions returned by the writes of one turn, keyed by path.
///
/// A later write to the same path uses the recorded revision instead of
/// asking the repository again.
#[derive(Default)]
pub struct TurnRevisions {
    revisions: Mutex<HashMap<String, RevisionId>>,
}

impl TurnRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<RevisionId> {
        self.entries().get(path).cloned()
    }

    fn record(&self, path: &str, revision: RevisionId) {
        self.entries().insert(path.to_string(), revision);
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RevisionId>> {
        self.revisions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything a command may touch. Borrowed for the duration of one turn.
pub struct ExecutionContext<'a> {
    pub repository: &'a dyn RepositoryClient,
    pub connection: Option<&'a RepoContext>,
    pub launcher: &'a dyn RunLauncher,
    pub path_locks: &'a PathLocks,
    pub revisions: &'a TurnRevisions,
}

/// Execute `command`. Every failure comes back as a failed outcome.
pub async fn execute(command: &Command, ctx: &ExecutionContext<'_>) -> ExecutionOutcome {
    let result = match command {
        Command::FileWrite {
            path,
            commit_message,
            content,
        } => write_file(ctx, path, commit_message, content).await,
        Command::RunProject { command } => ctx
            .launcher
            .launch(command)
            .map(|()| Effect::RunStarted)
            .map_err(ExecutionError::from),
    };

    match result {
        Ok(effect) => ExecutionOutcome::success(command.clone(), effect),
        Err(error) => {
            tracing::warn!(kind = command.kind().fence_tag(), %error, "command failed");
            ExecutionOutcome::failure(command.clone(), error.to_string())
        }
    }
}

async fn write_file(
    ctx: &ExecutionContext<'_>,
    path: &str,
    commit_message: &str,
    content: &str,
) -> Result<Effect, ExecutionError> {
    let connection = ctx.connection.ok_or(ExecutionError::NotConnected)?;
    let _guard = ctx.path_locks.acquire(path).await;

    let expected = match ctx.revisions.get(path) {
        Some(revision) => Some(revision),
        None => ctx.repository.get_revision(connection, path).await?,
    };
    let message = if commit_message.trim().is_empty() {
        default_commit_message(path, expected.is_some())
    } else {
        commit_message.to_string()
    };

    tracing::debug!(path, update = expected.is_some(), "writing file");
    let revision = ctx
        .repository
        .put_blob(connection, path, content, &message, expected.as_ref())
        .await?;
    ctx.revisions.record(path, revision.clone());

    Ok(match expected {
        Some(_) => Effect::FileUpdated { revision },
        None => Effect::FileCreated { revision },
    })
}

fn default_commit_message(path: &str, update: bool) -> String {
    if update {
        format!("Update {}", path)
    } else {
        format!("Create {}", path)
    }
}
