use super::Session;
use crate::command::{
    execute, extract, rewrite, Command, ExecutionContext, ExecutionOutcome, MalformedBlock,
    TurnRevisions,
};
use crate::state::{ChatMessage, ChatRole};

const GENERATION_APOLOGY: &str = "Apologies, a glitch in the mainframe occurred.";

/// What one turn did, in addition to the messages it appended.
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    /// The rewritten assistant message, `None` when generation failed.
    pub reply: Option<ChatMessage>,
    pub outcomes: Vec<ExecutionOutcome>,
    pub malformed: Vec<MalformedBlock>,
    /// Set when the post-write tree reload failed.
    pub refresh_error: Option<String>,
}

impl TurnReport {
    pub fn generation_failed(&self) -> bool {
        self.reply.is_none()
    }
}

impl Session {
    /// Run one turn: ask the model, perform every command found in its
    /// reply in source order, then append the rewritten reply.
    pub async fn submit_prompt(&self, prompt: &str) -> TurnReport {
        let directive = {
            let mut state = self.state();
            state.push_message(ChatRole::User, prompt);
            state.instructions.merge(&state.current_path)
        };

        tracing::info!(prompt_len = prompt.len(), "turn started");
        let text = match self.inner.generator.generate(prompt, &directive).await {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, "text generation failed");
                self.system(GENERATION_APOLOGY);
                return TurnReport::default();
            }
        };

        let _turn = self.inner.turn_gate.lock().await;
        let extraction = extract(&text);
        self.report_malformed(&extraction.malformed);

        let connection = self.state().connection.clone();
        let revisions = TurnRevisions::new();
        let ctx = ExecutionContext {
            repository: self.inner.repository.as_ref(),
            connection: connection.as_ref(),
            launcher: self,
            path_locks: &self.inner.path_locks,
            revisions: &revisions,
        };

        let mut outcomes = Vec::with_capacity(extraction.matches.len());
        for found in &extraction.matches {
            if let Command::FileWrite {
                path,
                commit_message,
                ..
            } = &found.command
            {
                self.system(format!(
                    "AI is creating file '{}' with commit: \"{}\"",
                    path, commit_message
                ));
            }
            outcomes.push(execute(&found.command, &ctx).await);
        }

        let mut refresh_error = None;
        if outcomes.iter().any(ExecutionOutcome::wrote_file) {
            if let Some(ctx) = &connection {
                if let Err(error) = self.reload_tree(ctx).await {
                    tracing::warn!(%error, "tree refresh after write failed");
                    refresh_error = Some(error.to_string());
                }
            }
        }

        let rewritten = rewrite(&text, &extraction.matches, &outcomes);
        let reply = self.state().push_message(ChatRole::Assistant, rewritten);
        if let Some(error) = &refresh_error {
            self.system(format!("Error refreshing file tree: {}", error));
        }

        tracing::info!(
            commands = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.is_success()).count(),
            "turn finished"
        );
        TurnReport {
            reply: Some(reply),
            outcomes,
            malformed: extraction.malformed,
            refresh_error,
        }
    }

    fn report_malformed(&self, malformed: &[MalformedBlock]) {
        for block in malformed {
            tracing::warn!(
                tag = block.kind.fence_tag(),
                offset = block.span.start,
                reason = %block.reason,
                "ignoring malformed command block"
            );
        }
        if malformed.is_empty() || !self.inner.report_malformed_commands {
            return;
        }

        let details: Vec<String> = malformed
            .iter()
            .map(|block| format!("- {}: {}", block.kind.fence_tag(), block.reason))
            .collect();
        self.system(format!(
            "Some command blocks in the reply were not run:\n{}",
            details.join("\n")
        ));
    }
}
