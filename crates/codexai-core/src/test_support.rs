//! In-crate fakes for the session and executor tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::ai::TextGenerator;
use crate::command::RunLauncher;
use crate::run::RunError;

/// Replies keyed by prompt. Unknown prompts fail like a transport error.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: HashMap<String, String>,
    holds: HashMap<String, Arc<Notify>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, prompt: &str, text: &str) -> Self {
        self.replies.insert(prompt.to_string(), text.to_string());
        self
    }

    /// Make `prompt` wait until the returned handle is notified.
    pub fn hold(&mut self, prompt: &str) -> Arc<Notify> {
        self.holds
            .entry(prompt.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Every `(prompt, directive)` pair seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, directive: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), directive.to_string()));
        if let Some(gate) = self.holds.get(prompt) {
            gate.notified().await;
        }
        self.replies
            .get(prompt)
            .cloned()
            .ok_or_else(|| anyhow!("quota exceeded"))
    }
}

/// Claims the run guard on the first launch and never releases it.
#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

impl RunLauncher for RecordingLauncher {
    fn launch(&self, command: &str) -> Result<(), RunError> {
        let mut launched = self.launched.lock().unwrap();
        if !launched.is_empty() {
            return Err(RunError::AlreadyRunning);
        }
        launched.push(command.to_string());
        Ok(())
    }
}
