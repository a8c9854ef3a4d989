//! UI-agnostic session state types
//!
//! Everything here is owned by [`crate::session::Session`]; front ends only
//! ever see clones.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::directive::Instructions;
use crate::repository::{RepoContext, RevisionId, TreeEntry};
use crate::run::RunState;
use crate::tree::FileTree;

/// A chat message in the AI conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub role: ChatRole,
    pub content: String,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// The file open in the editor, with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: String,
    pub content: String,
    pub revision: RevisionId,
}

pub(crate) struct ActiveRun {
    pub id: u64,
    pub cancel: CancellationToken,
}

pub(crate) struct SessionState {
    pub messages: Vec<ChatMessage>,
    next_message_id: u64,
    pub current_path: String,
    pub connection: Option<RepoContext>,
    pub tree_entries: Vec<TreeEntry>,
    pub tree: Option<FileTree>,
    pub selected_file: Option<SelectedFile>,
    pub instructions: Instructions,
    pub run_state: RunState,
    pub run_log: Vec<String>,
    pub current_run: Option<ActiveRun>,
    next_run_id: u64,
    pub run_tasks: Vec<JoinHandle<()>>,
    pub downloading: bool,
}

impl SessionState {
    pub fn new(instructions: Instructions) -> Self {
        Self {
            messages: Vec::new(),
            next_message_id: 1,
            current_path: String::new(),
            connection: None,
            tree_entries: Vec::new(),
            tree: None,
            selected_file: None,
            instructions,
            run_state: RunState::Idle,
            run_log: Vec::new(),
            current_run: None,
            next_run_id: 1,
            run_tasks: Vec::new(),
            downloading: false,
        }
    }

    /// Append a message. Messages are never edited or reordered afterwards.
    pub fn push_message(&mut self, role: ChatRole, content: impl Into<String>) -> ChatMessage {
        let message = ChatMessage {
            id: self.next_message_id,
            role,
            content: content.into(),
        };
        self.next_message_id += 1;
        self.messages.push(message.clone());
        message
    }

    pub fn system(&mut self, content: impl Into<String>) -> ChatMessage {
        self.push_message(ChatRole::System, content)
    }

    /// Replace the tree snapshot wholesale.
    pub fn replace_tree(&mut self, entries: Vec<TreeEntry>) {
        self.tree = Some(FileTree::from_entries(&entries));
        self.tree_entries = entries;
    }

    pub fn begin_run(&mut self) -> (u64, CancellationToken) {
        let id = self.next_run_id;
        self.next_run_id += 1;
        let cancel = CancellationToken::new();
        self.current_run = Some(ActiveRun {
            id,
            cancel: cancel.clone(),
        });
        (id, cancel)
    }

    pub fn is_current_run(&self, id: u64) -> bool {
        self.current_run.as_ref().is_some_and(|run| run.id == id)
    }
}
