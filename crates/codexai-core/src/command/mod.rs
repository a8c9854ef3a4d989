//! The command protocol embedded in assistant replies.
//!
//! An assistant reply is free-form text that may contain fenced command
//! blocks. The [`extractor`] finds them, the [`executor`] performs each
//! one against the session's collaborators, and the [`rewriter`] swaps
//! every block for a short status annotation before the reply is shown.

pub mod executor;
pub mod extractor;
pub mod rewriter;

use std::ops::Range;

use crate::repository::RevisionId;

pub use executor::{
    execute, ExecutionContext, ExecutionError, PathLocks, RunLauncher, TurnRevisions,
};
pub use extractor::{extract, Extraction, MalformedBlock, MalformedReason};
pub use rewriter::{annotation, rewrite};

/// Fence tag that opens a file-write block.
pub const CREATE_FILE_TAG: &str = "create-file";
/// Fence tag that opens a run-project block.
pub const RUN_PROJECT_TAG: &str = "run-project";

/// A structured directive recovered from assistant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FileWrite {
        path: String,
        commit_message: String,
        content: String,
    },
    RunProject {
        command: String,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::FileWrite { .. } => CommandKind::FileWrite,
            Command::RunProject { .. } => CommandKind::RunProject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    FileWrite,
    RunProject,
}

impl CommandKind {
    pub fn fence_tag(&self) -> &'static str {
        match self {
            CommandKind::FileWrite => CREATE_FILE_TAG,
            CommandKind::RunProject => RUN_PROJECT_TAG,
        }
    }

    fn from_fence_tag(tag: &str) -> Option<Self> {
        match tag {
            CREATE_FILE_TAG => Some(CommandKind::FileWrite),
            RUN_PROJECT_TAG => Some(CommandKind::RunProject),
            _ => None,
        }
    }
}

/// A command together with the exact byte span it occupied in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatch {
    pub command: Command,
    pub span: Range<usize>,
    /// The matched substring, `&text[span]` at extraction time.
    pub source: String,
}

/// What a successful command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FileCreated { revision: RevisionId },
    FileUpdated { revision: RevisionId },
    RunStarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success(Effect),
    Failure(String),
}

/// The result of executing one command, in extraction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub command: Command,
    pub status: ExecutionStatus,
}

impl ExecutionOutcome {
    pub fn success(command: Command, effect: Effect) -> Self {
        Self {
            command,
            status: ExecutionStatus::Success(effect),
        }
    }

    pub fn failure(command: Command, reason: impl Into<String>) -> Self {
        Self {
            command,
            status: ExecutionStatus::Failure(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Success(_))
    }

    /// True when this outcome wrote a file, which means the tree snapshot is stale.
    pub fn wrote_file(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Success(Effect::FileCreated { .. } | Effect::FileUpdated { .. })
        )
    }
}
