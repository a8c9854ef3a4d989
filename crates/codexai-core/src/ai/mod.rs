pub mod claude;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use claude::ClaudeClient;
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::config::Config;
use crate::provider::Provider;

/// Opaque text generation: a prompt plus a system directive in, reply text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, directive: &str) -> Result<String>;
}

#[derive(Clone)]
pub enum Backend {
    Ollama(OllamaClient),
    Claude(ClaudeClient),
    OpenAI(OpenAIClient),
    Gemini(GeminiClient),
}

impl Backend {
    pub fn provider(&self) -> Provider {
        match self {
            Backend::Ollama(_) => Provider::Ollama,
            Backend::Claude(_) => Provider::Claude,
            Backend::OpenAI(_) => Provider::OpenAI,
            Backend::Gemini(_) => Provider::Gemini,
        }
    }
}

/// A provider client bound to one model and sampling temperature.
#[derive(Clone)]
pub struct LanguageModel {
    backend: Backend,
    model: String,
    temperature: f32,
}

impl LanguageModel {
    pub fn new(backend: Backend, model: &str, temperature: f32) -> Self {
        Self {
            backend,
            model: model.to_string(),
            temperature,
        }
    }

    /// Build the model for `provider`, falling back to the configured provider,
    /// then to the provider's default model when none is named.
    pub fn from_config(config: &Config, provider: Option<Provider>, model: Option<&str>) -> Result<Self> {
        let provider = provider.unwrap_or_else(|| config.provider());
        let backend = match provider {
            Provider::Ollama => Backend::Ollama(OllamaClient::new(&config.ollama_url())),
            Provider::Claude => Backend::Claude(ClaudeClient::new(&require_key(config, provider)?)),
            Provider::OpenAI => Backend::OpenAI(OpenAIClient::new(&require_key(config, provider)?)),
            Provider::Gemini => Backend::Gemini(GeminiClient::new(&require_key(config, provider)?)),
        };

        let model = model
            .map(str::to_string)
            .or_else(|| {
                // A saved model only applies to the provider it was saved for.
                (config.provider() == provider)
                    .then(|| config.default_model.clone())
                    .flatten()
            })
            .unwrap_or_else(|| provider.default_model().to_string());

        Ok(Self::new(backend, &model, config.temperature))
    }

    pub fn provider(&self) -> Provider {
        self.backend.provider()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn available_models(&self) -> Result<Vec<String>> {
        match &self.backend {
            Backend::Ollama(client) => client.list_models().await,
            Backend::Claude(_) => Ok(ClaudeClient::list_models()),
            Backend::OpenAI(_) => Ok(OpenAIClient::list_models()),
            Backend::Gemini(_) => Ok(GeminiClient::list_models()),
        }
    }
}

fn require_key(config: &Config, provider: Provider) -> Result<String> {
    config.resolve_api_key(provider).ok_or_else(|| {
        anyhow!(
            "No API key for {}. Set {} or run: codexai config set-key {} <KEY>",
            provider.display_name(),
            provider.api_key_env().unwrap_or("an API key"),
            provider.as_str()
        )
    })
}

#[async_trait]
impl TextGenerator for LanguageModel {
    async fn generate(&self, prompt: &str, directive: &str) -> Result<String> {
        tracing::debug!(provider = self.provider().as_str(), model = %self.model, "generating reply");
        match &self.backend {
            Backend::Ollama(client) => client.query(&self.model, directive, prompt, self.temperature).await,
            Backend::Claude(client) => client.query(&self.model, directive, prompt, self.temperature).await,
            Backend::OpenAI(client) => client.query(&self.model, directive, prompt, self.temperature).await,
            Backend::Gemini(client) => client.query(&self.model, directive, prompt, self.temperature).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_needs_no_key() {
        let config = Config::new();
        let model = LanguageModel::from_config(&config, Some(Provider::Ollama), None).unwrap();
        assert_eq!(model.provider(), Provider::Ollama);
        assert_eq!(model.model(), Provider::Ollama.default_model());
    }

    #[test]
    fn test_configured_key_and_explicit_model() {
        let mut config = Config::new();
        config.claude_api_key = Some("sk-test".to_string());
        let model =
            LanguageModel::from_config(&config, Some(Provider::Claude), Some("claude-3-5-haiku-20241022")).unwrap();
        assert_eq!(model.provider(), Provider::Claude);
        assert_eq!(model.model(), "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_saved_model_ignored_for_other_provider() {
        let mut config = Config::new();
        config.provider = Some("ollama".to_string());
        config.default_model = Some("qwen2.5-coder".to_string());
        config.openai_api_key = Some("sk-test".to_string());

        let model = LanguageModel::from_config(&config, Some(Provider::OpenAI), None).unwrap();
        assert_eq!(model.model(), Provider::OpenAI.default_model());
        let local = LanguageModel::from_config(&config, None, None).unwrap();
        assert_eq!(local.model(), "qwen2.5-coder");
    }
}
