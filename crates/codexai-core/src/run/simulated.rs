use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{PreviewHandle, ProjectRunner, RunError, RunOutput, RunStage};

const PACKAGES: [&str; 5] = ["react", "react-dom", "vite", "tailwindcss", "express"];
const DEFAULT_PORT: u16 = 3000;

/// Scripted stand-in for a real project container.
///
/// Emits a fixed mount, install, build and start transcript with a delay of
/// `step_delay` between steps, and serves nothing.
#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    step_delay: Duration,
    port: u16,
}

impl SimulatedRunner {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            port: DEFAULT_PORT,
        }
    }

    async fn pause(&self, steps: u32, cancel: &CancellationToken) -> Result<(), RunError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunError::Cancelled),
            _ = tokio::time::sleep(self.step_delay * steps) => Ok(()),
        }
    }

    async fn stage(
        &self,
        stage: RunStage,
        command: &str,
        output: &RunOutput,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        self.pause(4, cancel).await?;
        match stage {
            RunStage::Mount => emit(output, "> Filesystem mounted.")?,
            RunStage::Install => {
                emit(output, "")?;
                emit(output, "> Running: npm install")?;
                for package in PACKAGES {
                    self.pause(1, cancel).await?;
                    emit(output, format!("+ {}@latest", package))?;
                }
                self.pause(2, cancel).await?;
                emit(output, "added 342 packages from 24 contributors and audited 342 packages in 8.2s")?;
            }
            RunStage::Build => {
                emit(output, "")?;
                emit(output, "> Running: npm run build")?;
                let transcript = [
                    "> vite build",
                    "vite v5.1.4 building for production...",
                    "✓ 34 modules transformed.",
                    "dist/index.html                   0.58 kB │ gzip:  0.37 kB",
                    "dist/assets/index.css            69.21 kB │ gzip:  8.84 kB",
                    "dist/assets/index.js            145.29 kB │ gzip: 47.09 kB",
                    "✓ built in 1.97s",
                ];
                for line in transcript {
                    self.pause(1, cancel).await?;
                    emit(output, line)?;
                }
            }
            RunStage::Start => {
                emit(output, "")?;
                emit(output, format!("> Running: {}", command))?;
                self.pause(2, cancel).await?;
                emit(output, "> vite")?;
                self.pause(6, cancel).await?;
                emit(output, format!("  ➜  Local:   {}", self.preview_url()))?;
                emit(output, "  ➜  Network: use --host to expose")?;
                emit(output, "  ➜  press h to show help")?;
            }
        }
        tracing::debug!(stage = stage.as_str(), "run stage complete");
        Ok(())
    }

    fn preview_url(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }
}

impl Default for SimulatedRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[async_trait]
impl ProjectRunner for SimulatedRunner {
    async fn run(
        &self,
        command: &str,
        output: RunOutput,
        cancel: CancellationToken,
    ) -> Result<PreviewHandle, RunError> {
        for stage in RunStage::all() {
            self.stage(stage, command, &output, &cancel).await?;
        }
        Ok(PreviewHandle {
            url: self.preview_url(),
        })
    }
}

fn emit(output: &RunOutput, text: impl Into<String>) -> Result<(), RunError> {
    if output.line(text) {
        Ok(())
    } else {
        Err(RunError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn position(lines: &[String], needle: &str) -> usize {
        lines
            .iter()
            .position(|line| line.contains(needle))
            .unwrap_or_else(|| panic!("missing line containing {needle:?}"))
    }

    #[tokio::test]
    async fn test_stages_are_emitted_in_order() {
        let runner = SimulatedRunner::new(Duration::ZERO);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let preview = runner
            .run("npm run dev", RunOutput::new(tx), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(preview.url, "http://localhost:3000/");

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }

        let mount = position(&lines, "Filesystem mounted");
        let install = position(&lines, "npm install");
        let build = position(&lines, "npm run build");
        let start = position(&lines, "> Running: npm run dev");
        let local = position(&lines, "Local:");
        assert!(mount < install && install < build && build < start && start < local);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let runner = SimulatedRunner::new(Duration::from_secs(60));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner.run("npm start", RunOutput::new(tx), cancel).await;
        assert_eq!(result, Err(RunError::Cancelled));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stops_when_output_is_dropped() {
        let runner = SimulatedRunner::new(Duration::ZERO);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let result = runner
            .run("npm start", RunOutput::new(tx), CancellationToken::new())
            .await;
        assert_eq!(result, Err(RunError::Cancelled));
    }
}
