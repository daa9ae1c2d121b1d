//! Text-generation providers
//!
//! The turn pipeline only sees the `Generator` trait: a prompt and sampling
//! parameters in, text out (whole or streamed).

mod ollama;
mod openai_compat;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;

use crate::config::LlmConfig;

pub use ollama::OllamaProvider;
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Incrementally generated text, ending when generation completes
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the full completion for `prompt`
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ProviderError>;

    /// Generate `prompt` as a stream of text fragments
    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TextStream, ProviderError>;
}

pub enum Provider {
    Ollama(OllamaProvider),
    OpenAICompat(OpenAICompatProvider),
}

impl Provider {
    pub fn from_config(llm: &LlmConfig) -> Result<Self, ProviderError> {
        match llm.provider.to_lowercase().as_str() {
            "ollama" => {
                let url = llm
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".into());
                Ok(Provider::Ollama(OllamaProvider::new(
                    url,
                    llm.model.clone(),
                    llm.timeout_secs,
                )?))
            }
            "openai" | "openai_compat" => {
                let api_key = match &llm.api_key_env {
                    Some(var) => Some(
                        std::env::var(var)
                            .map_err(|_| ProviderError::NotConfigured(var.clone()))?,
                    ),
                    None => None,
                };
                let config = OpenAICompatConfig {
                    base_url: llm
                        .endpoint
                        .clone()
                        .unwrap_or_else(|| "https://api.openai.com/v1".into()),
                    api_key,
                    default_model: llm.model.clone(),
                    timeout_secs: llm.timeout_secs,
                };
                Ok(Provider::OpenAICompat(OpenAICompatProvider::new(config)?))
            }
            "local" => {
                let url = llm
                    .endpoint
                    .clone()
                    .ok_or_else(|| ProviderError::NotConfigured("llm.endpoint".into()))?;
                let config = OpenAICompatConfig::local(url, llm.model.clone());
                Ok(Provider::OpenAICompat(OpenAICompatProvider::new(config)?))
            }
            _ => Err(ProviderError::UnknownProvider(llm.provider.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama(_) => "ollama",
            Provider::OpenAICompat(_) => "openai_compat",
        }
    }
}

#[async_trait]
impl Generator for Provider {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        match self {
            Provider::Ollama(p) => p.generate(prompt, max_tokens, temperature).await,
            Provider::OpenAICompat(p) => p.generate(prompt, max_tokens, temperature).await,
        }
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TextStream, ProviderError> {
        match self {
            Provider::Ollama(p) => p.generate_stream(prompt, max_tokens, temperature).await,
            Provider::OpenAICompat(p) => {
                p.generate_stream(prompt, max_tokens, temperature).await
            }
        }
    }
}

/// Split a streamed HTTP body into non-empty, trimmed lines
fn body_lines(response: reqwest::Response) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ProviderError::from)?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).trim().to_string();
                if !line.is_empty() {
                    yield line;
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            yield rest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_from_config() {
        let provider = Provider::from_config(&llm("Ollama")).unwrap();
        assert_eq!(provider.name(), "ollama");

        let provider = Provider::from_config(&llm("openai")).unwrap();
        assert_eq!(provider.name(), "openai_compat");
    }

    #[test]
    fn test_local_requires_endpoint() {
        let err = Provider::from_config(&llm("local")).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));

        let config = LlmConfig {
            provider: "local".into(),
            endpoint: Some("http://localhost:8000/v1".into()),
            ..LlmConfig::default()
        };
        assert_eq!(Provider::from_config(&config).unwrap().name(), "openai_compat");
    }

    #[test]
    fn test_unknown_provider() {
        let err = Provider::from_config(&llm("mystery")).err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(name) if name == "mystery"));
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = LlmConfig {
            provider: "openai".into(),
            api_key_env: Some("COUNTER_AGENT_TEST_UNSET_KEY".into()),
            ..LlmConfig::default()
        };
        let err = Provider::from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
