pub mod ai;
pub mod command;
pub mod config;
pub mod directive;
pub mod provider;
pub mod repository;
pub mod run;
pub mod session;
pub mod state;
pub mod tree;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use ai::{ClaudeClient, GeminiClient, LanguageModel, OllamaClient, OpenAIClient, TextGenerator};
pub use command::{Command, CommandMatch, ExecutionOutcome, ExecutionStatus};
pub use config::Config;
pub use directive::Instructions;
pub use provider::Provider;
pub use repository::{GitHubClient, MemoryRepository, RepoInfo, RepositoryClient, RevisionId};
pub use run::{PreviewHandle, ProjectRunner, RunState, SimulatedRunner};
pub use session::{Session, SessionOptions, TurnReport};
pub use state::{ChatMessage, ChatRole, SelectedFile};
pub use tree::{FileTree, TreeNode};
