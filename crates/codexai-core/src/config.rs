use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

use crate::directive::Instructions;
use crate::provider::Provider;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub default_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub claude_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub ollama_url: Option<String>,
    pub github_token: Option<String>,
    pub temperature: f32,
    pub run_stage_delay_ms: u64,
    pub report_malformed_commands: bool,
    pub orchestrator_instruction: Option<String>,
    pub supervisor_instruction: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            provider: Some("gemini".to_string()),
            default_model: None,
            gemini_api_key: None,
            claude_api_key: None,
            openai_api_key: None,
            ollama_url: None,
            github_token: None,
            temperature: 0.5,
            run_stage_delay_ms: 250,
            report_malformed_commands: true,
            orchestrator_instruction: None,
            supervisor_instruction: None,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("codexai").join("config.json"))
    }

    /// The configured provider; unknown names fall back to Gemini.
    pub fn provider(&self) -> Provider {
        self.provider
            .as_deref()
            .and_then(Provider::from_str)
            .unwrap_or(Provider::Gemini)
    }

    pub fn ollama_url(&self) -> String {
        self.ollama_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
    }

    fn stored_key(&self, provider: Provider) -> Option<&String> {
        match provider {
            Provider::Ollama => None,
            Provider::Claude => self.claude_api_key.as_ref(),
            Provider::OpenAI => self.openai_api_key.as_ref(),
            Provider::Gemini => self.gemini_api_key.as_ref(),
        }
    }

    /// The provider's API key, environment first, then this config.
    pub fn resolve_api_key(&self, provider: Provider) -> Option<String> {
        provider
            .api_key_env()
            .and_then(env_value)
            .or_else(|| self.stored_key(provider).cloned())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn set_api_key(&mut self, provider: Provider, key: &str) -> Result<()> {
        let slot = match provider {
            Provider::Ollama => return Err(anyhow!("Ollama does not use an API key")),
            Provider::Claude => &mut self.claude_api_key,
            Provider::OpenAI => &mut self.openai_api_key,
            Provider::Gemini => &mut self.gemini_api_key,
        };
        *slot = Some(key.to_string());
        Ok(())
    }

    pub fn resolve_github_token(&self) -> Option<String> {
        env_value("GITHUB_TOKEN")
            .or_else(|| self.github_token.clone())
            .filter(|token| !token.trim().is_empty())
    }

    /// Built-in instructions with any configured overrides applied.
    pub fn instructions(&self) -> Instructions {
        let mut instructions = Instructions::default();
        if let Some(text) = &self.orchestrator_instruction {
            instructions.orchestrator = text.clone();
        }
        if let Some(text) = &self.supervisor_instruction {
            instructions.supervisor = text.clone();
        }
        instructions
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
