//! The session coordinator.
//!
//! A [`Session`] owns chat history, the current path, the repository binding,
//! the tree snapshot and the run state, and is the only thing that mutates
//! them. Handles are cheap to clone and all clones share one session.
//!
//! State sits behind a synchronous mutex that is never held across an await.
//! Anything that mutates the repository or the tree additionally takes the
//! turn gate, so overlapping operations apply their effects one at a time in
//! the order they reach it.

mod turn;


use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::TextGenerator;
use crate::command::{ExecutionError, PathLocks, RunLauncher};
use crate::config::Config;
use crate::directive::Instructions;
use crate::repository::{
    EntryKind, RepoContext, RepoInfo, RepositoryClient, RepositoryError, RevisionId, TreeEntry,
};
use crate::run::{ProjectRunner, RunError, RunOutput, RunState};
use crate::state::{ChatMessage, SelectedFile, SessionState};
use crate::tree::{FileTree, TreeNode};

pub use turn::TurnReport;

const SCAN_LISTING_LIMIT: usize = 8000;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub instructions: Instructions,
    /// Post a System message when a reply contains command blocks that were not run.
    pub report_malformed_commands: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            instructions: Instructions::default(),
            report_malformed_commands: true,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            instructions: config.instructions(),
            report_malformed_commands: config.report_malformed_commands,
        }
    }
}

struct SessionInner {
    generator: Arc<dyn TextGenerator>,
    repository: Arc<dyn RepositoryClient>,
    runner: Arc<dyn ProjectRunner>,
    report_malformed_commands: bool,
    state: Mutex<SessionState>,
    turn_gate: tokio::sync::Mutex<()>,
    path_locks: PathLocks,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        repository: Arc<dyn RepositoryClient>,
        runner: Arc<dyn ProjectRunner>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                generator,
                repository,
                runner,
                report_malformed_commands: options.report_malformed_commands,
                state: Mutex::new(SessionState::new(options.instructions)),
                turn_gate: tokio::sync::Mutex::new(()),
                path_locks: PathLocks::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn system(&self, content: impl Into<String>) -> ChatMessage {
        self.state().system(content)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state().messages.clone()
    }

    /// Messages appended after the first `seen`.
    pub fn messages_since(&self, seen: usize) -> Vec<ChatMessage> {
        self.state().messages.iter().skip(seen).cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

    pub fn current_path(&self) -> String {
        self.state().current_path.clone()
    }

    pub fn connection(&self) -> Option<RepoInfo> {
        self.state().connection.as_ref().map(|ctx| ctx.repo.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.state().connection.is_some()
    }

    pub fn tree(&self) -> Option<FileTree> {
        self.state().tree.clone()
    }

    pub fn selected_file(&self) -> Option<SelectedFile> {
        self.state().selected_file.clone()
    }

    pub fn run_state(&self) -> RunState {
        self.state().run_state.clone()
    }

    pub fn run_log(&self) -> Vec<String> {
        self.state().run_log.clone()
    }

    pub fn instructions(&self) -> Instructions {
        self.state().instructions.clone()
    }

    /// Takes effect from the next prompt on.
    pub fn set_instructions(&self, instructions: Instructions) {
        self.state().instructions = instructions;
    }

    fn require_connection(&self) -> Result<RepoContext, ExecutionError> {
        self.state().connection.clone().ok_or(ExecutionError::NotConnected)
    }

    /// Bind the session to `repo` and load its tree.
    ///
    /// The previous binding, if any, is kept when the new one fails.
    pub async fn connect(&self, token: &str, repo: RepoInfo) -> Result<()> {
        let _turn = self.inner.turn_gate.lock().await;
        let name = repo.full_name();
        self.system(format!("Attempting to connect to {}...", name));

        let ctx = RepoContext::new(token, repo);
        match self.inner.repository.get_tree(&ctx).await {
            Ok(entries) => {
                tracing::info!(repo = %name, entries = entries.len(), "connected");
                let mut state = self.state();
                state.connection = Some(ctx);
                state.replace_tree(entries);
                state.current_path.clear();
                state.selected_file = None;
                state.system(format!("Successfully connected to {}.", name));
                Ok(())
            }
            Err(error) => {
                tracing::warn!(repo = %name, %error, "connection failed");
                self.system(format!("Connection failed: {}", error));
                Err(error.into())
            }
        }
    }

    /// Navigate to `path`. When it names a file in the snapshot, its content
    /// is fetched and becomes the selected file.
    pub async fn open_path(&self, path: &str) -> Result<Option<SelectedFile>> {
        let path = path.trim_matches('/').to_string();
        let (connection, is_file) = {
            let mut state = self.state();
            state.current_path = path.clone();
            let is_file = state
                .tree
                .as_ref()
                .and_then(|tree| tree.node(&path))
                .is_some_and(|node| !node.is_directory());
            if !is_file {
                state.selected_file = None;
            }
            (state.connection.clone(), is_file)
        };

        let Some(ctx) = connection.filter(|_| is_file) else {
            return Ok(None);
        };

        self.system(format!("Fetching content for {}...", path));
        match self.inner.repository.get_blob(&ctx, &path).await {
            Ok(blob) => {
                let selected = SelectedFile {
                    path: path.clone(),
                    content: blob.content,
                    revision: blob.revision,
                };
                let mut state = self.state();
                state.selected_file = Some(selected.clone());
                state.system(format!("Successfully loaded {}.", path));
                Ok(Some(selected))
            }
            Err(error) => {
                self.system(format!("Error fetching file {}: {}", path, error));
                Err(error.into())
            }
        }
    }

    /// Immediate children of the directory at `path` in the current snapshot.
    pub fn list_directory(&self, path: &str) -> Option<Vec<TreeNode>> {
        let state = self.state();
        let children: Vec<TreeNode> = state
            .tree
            .as_ref()?
            .children_at(path)?
            .into_iter()
            .cloned()
            .collect();
        Some(children)
    }

    /// Commit editor content for the selected file at the revision it was read at.
    pub async fn commit_file(&self, path: &str, content: &str, message: &str) -> Result<RevisionId> {
        let _turn = self.inner.turn_gate.lock().await;
        let (connection, selected) = {
            let state = self.state();
            (
                state.connection.clone(),
                state.selected_file.clone().filter(|file| file.path == path),
            )
        };
        let (Some(ctx), Some(selected)) = (connection, selected) else {
            self.system("Error: No file selected or repository not connected.");
            return Err(anyhow!("{} is not the open file of a connected repository", path));
        };

        self.system(format!("Committing changes to {}...", path));
        let written = {
            let _path = self.inner.path_locks.acquire(path).await;
            self.inner
                .repository
                .put_blob(&ctx, path, content, message, Some(&selected.revision))
                .await
        };

        match written {
            Ok(revision) => {
                {
                    let mut state = self.state();
                    state.selected_file = Some(SelectedFile {
                        path: path.to_string(),
                        content: content.to_string(),
                        revision: revision.clone(),
                    });
                    state.system(format!("Successfully committed changes to {}.", path));
                }
                let _ = self.refresh_with_messages(&ctx).await;
                Ok(revision)
            }
            Err(error) => {
                self.system(format!("Error committing to {}: {}", path, error));
                Err(error.into())
            }
        }
    }

    /// Reload the tree snapshot from the repository.
    pub async fn refresh_tree(&self) -> Result<()> {
        let _turn = self.inner.turn_gate.lock().await;
        let ctx = self.require_connection()?;
        self.refresh_with_messages(&ctx).await?;
        Ok(())
    }

    async fn refresh_with_messages(&self, ctx: &RepoContext) -> Result<(), RepositoryError> {
        self.system(format!("Refreshing file tree for {}...", ctx.repo.full_name()));
        match self.reload_tree(ctx).await {
            Ok(()) => {
                self.system("File tree refreshed.");
                Ok(())
            }
            Err(error) => {
                self.system(format!("Error refreshing file tree: {}", error));
                Err(error)
            }
        }
    }

    async fn reload_tree(&self, ctx: &RepoContext) -> Result<(), RepositoryError> {
        let entries = self.inner.repository.get_tree(ctx).await?;
        tracing::debug!(entries = entries.len(), "tree snapshot replaced");
        self.state().replace_tree(entries);
        Ok(())
    }

    /// Ask for an overview of the whole repository, as a normal turn.
    pub async fn scan_repository(&self) -> Option<TurnReport> {
        let prompt = {
            let state = self.state();
            match &state.connection {
                Some(ctx) if !state.tree_entries.is_empty() => {
                    Some(scan_prompt(&ctx.repo, &state.tree_entries))
                }
                _ => None,
            }
        };

        match prompt {
            Some(prompt) => Some(self.submit_prompt(&prompt).await),
            None => {
                self.system("File tree not available. Please connect to a repository first.");
                None
            }
        }
    }

    /// Save the repository archive as `DIR/REPO.zip`.
    ///
    /// Returns `Ok(None)` without doing anything while another download is
    /// in progress.
    pub async fn download_archive(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let ctx = self.require_connection()?;
        {
            let mut state = self.state();
            if state.downloading {
                return Ok(None);
            }
            state.downloading = true;
            state.system(format!(
                "Preparing to download {}.zip...",
                ctx.repo.full_name()
            ));
        }

        let target = dir.join(format!("{}.zip", ctx.repo.repo));
        let result = self.fetch_archive(&ctx, &target).await;

        let mut state = self.state();
        state.downloading = false;
        match result {
            Ok(()) => {
                state.system(format!("Successfully downloaded {}.zip.", ctx.repo.repo));
                Ok(Some(target))
            }
            Err(error) => {
                state.system(format!("Download failed: {}", error));
                Err(error)
            }
        }
    }

    async fn fetch_archive(&self, ctx: &RepoContext, target: &Path) -> Result<()> {
        let bytes = self.inner.repository.download_archive(ctx).await?;
        tokio::fs::create_dir_all(target.parent().unwrap_or(Path::new("."))).await?;
        tokio::fs::write(target, bytes).await?;
        Ok(())
    }

    /// Start a run sequence from the user's own controls.
    pub fn start_project(&self, command: &str) -> Result<(), RunError> {
        let started = self.launch(command);
        if let Err(RunError::AlreadyRunning) = started {
            self.system("A project is already running. Please stop it before starting a new one.");
        }
        started
    }

    /// Stop whatever is running. Always appends a line to the run log.
    pub fn stop_project(&self) {
        let mut state = self.state();
        if let Some(run) = state.current_run.take() {
            run.cancel.cancel();
        }
        if state.run_state.is_active() {
            tracing::info!("run stopped");
            state.run_state = RunState::Stopped;
            state.system("Project stopped and preview closed.");
        }
        state.run_log.push("> Server stopped by user.".to_string());
    }

    /// Wait for every run sequence started so far to settle.
    pub async fn wait_for_run(&self) {
        loop {
            let tasks = std::mem::take(&mut self.state().run_tasks);
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(error) = task.await {
                    tracing::warn!(%error, "run task ended abnormally");
                }
            }
        }
    }

    async fn drive_run(self, run_id: u64, command: String, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = self.inner.runner.clone();

        let run = runner.run(&command, RunOutput::new(tx), cancel);
        let pump = async {
            while let Some(line) = rx.recv().await {
                let mut state = self.state();
                if state.is_current_run(run_id) {
                    state.run_log.push(line);
                }
            }
        };
        let (result, ()) = tokio::join!(run, pump);

        let mut state = self.state();
        if !state.is_current_run(run_id) {
            return;
        }
        match result {
            Ok(preview) => {
                tracing::info!(url = %preview.url, "project running");
                state.system(format!(
                    "Project is now running. A preview is available at {}.",
                    preview.url
                ));
                state.run_state = RunState::Running { command, preview };
            }
            Err(RunError::Cancelled) => {
                state.current_run = None;
                state.run_state = RunState::Stopped;
            }
            Err(error) => {
                tracing::warn!(%error, "run failed");
                state.current_run = None;
                state.run_log.push(format!("> Run failed: {}", error));
                state.system(format!("Project run failed: {}", error));
                state.run_state = RunState::Failed {
                    reason: error.to_string(),
                };
            }
        }
    }
}

impl RunLauncher for Session {
    fn launch(&self, command: &str) -> Result<(), RunError> {
        let (run_id, cancel) = {
            let mut state = self.state();
            if state.run_state.is_active() {
                return Err(RunError::AlreadyRunning);
            }
            tracing::info!(command, "starting run");
            state.run_state = RunState::Starting {
                command: command.to_string(),
            };
            state.run_log = vec!["> Project runner initializing...".to_string()];
            state.system(format!(
                "Initializing project runner to run your project with '{}'...",
                command
            ));
            state.begin_run()
        };

        let task = tokio::spawn(self.clone().drive_run(run_id, command.to_string(), cancel));
        let mut state = self.state();
        state.run_tasks.retain(|task| !task.is_finished());
        state.run_tasks.push(task);
        Ok(())
    }
}

fn scan_prompt(repo: &RepoInfo, entries: &[TreeEntry]) -> String {
    let paths: Vec<&str> = entries
        .iter()
        .filter(|entry| entry.kind == EntryKind::Blob)
        .map(|entry| entry.path.as_str())
        .collect();
    let mut listing = paths.join("\n");
    if listing.len() > SCAN_LISTING_LIMIT {
        let mut cut = SCAN_LISTING_LIMIT;
        while !listing.is_char_boundary(cut) {
            cut -= 1;
        }
        listing.truncate(cut);
        listing.push_str("\n... (file list truncated)");
    }

    format!(
        "\nI am analyzing the repository '{}'. Here is a list of all file paths:\n---\n{}\n---\n\
         Based on this structure, please provide a high-level analysis. What is the project's \
         purpose? What are the main technologies? Which files are most important? Can you \
         suggest any improvements? If this looks like a runnable web project (e.g., contains \
         package.json with scripts), suggest that I run it.",
        repo.full_name(),
        listing
    )
}
