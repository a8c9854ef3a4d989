//! Project run lifecycle: states, the runner seam, and the staged simulation.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use simulated::SimulatedRunner;

/// Where a running project can be previewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewHandle {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Starting {
        command: String,
    },
    Running {
        command: String,
        preview: PreviewHandle,
    },
    Stopped,
    Failed {
        reason: String,
    },
}

impl RunState {
    /// A run sequence is in flight or a project is being served.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Starting { .. } | RunState::Running { .. })
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        match self {
            RunState::Running { preview, .. } => Some(preview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("project already running")]
    AlreadyRunning,
    #[error("{0}")]
    Failed(String),
    #[error("run cancelled")]
    Cancelled,
}

/// The ordered stages every run sequence goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Mount,
    Install,
    Build,
    Start,
}

impl RunStage {
    pub fn all() -> [RunStage; 4] {
        [RunStage::Mount, RunStage::Install, RunStage::Build, RunStage::Start]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Mount => "mount",
            RunStage::Install => "install",
            RunStage::Build => "build",
            RunStage::Start => "start",
        }
    }
}

/// Sink for a run sequence's log lines; lines arrive in send order.
#[derive(Clone)]
pub struct RunOutput {
    tx: mpsc::UnboundedSender<String>,
}

impl RunOutput {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Returns false once nobody is listening any more.
    pub fn line(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).is_ok()
    }
}

#[async_trait]
pub trait ProjectRunner: Send + Sync {
    /// Drive one run sequence to completion, reporting output as it goes.
    /// Must return `RunError::Cancelled` promptly once `cancel` fires.
    async fn run(
        &self,
        command: &str,
        output: RunOutput,
        cancel: CancellationToken,
    ) -> Result<PreviewHandle, RunError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(!RunState::Idle.is_active());
        assert!(!RunState::Stopped.is_active());
        assert!(!RunState::Failed { reason: "x".into() }.is_active());
        assert!(RunState::Starting { command: "npm start".into() }.is_active());

        let running = RunState::Running {
            command: "npm start".into(),
            preview: PreviewHandle { url: "http://localhost:3000/".into() },
        };
        assert!(running.is_active());
        assert_eq!(running.preview().unwrap().url, "http://localhost:3000/");
    }

    #[test]
    fn test_already_running_message() {
        assert_eq!(RunError::AlreadyRunning.to_string(), "project already running");
    }

    #[tokio::test]
    async fn test_output_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = RunOutput::new(tx);
        assert!(output.line("first"));
        drop(rx);
        assert!(!output.line("second"));
    }
}
