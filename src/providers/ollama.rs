//! Ollama provider implementation

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{body_lines, ProviderError, TextStream};

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

/// One response object; the streaming API sends one per line
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn post(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream,
            options: GenerateOptions {
                temperature,
                num_predict: max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "{}: {}",
                status, body
            )));
        }

        Ok(response)
    }

    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let response = self.post(prompt, max_tokens, temperature, false).await?;
        let chunk: GenerateChunk = response.json().await?;

        match chunk.error {
            Some(error) => Err(ProviderError::InvalidResponse(error)),
            None => Ok(chunk.response),
        }
    }

    pub async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TextStream, ProviderError> {
        let response = self.post(prompt, max_tokens, temperature, true).await?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut lines = Box::pin(body_lines(response));
            while let Some(line) = lines.next().await {
                let line = line?;
                let chunk = parse_chunk(&line)?;
                if !chunk.response.is_empty() {
                    yield chunk.response;
                }
                if chunk.done {
                    break;
                }
            }
        }))
    }
}

fn parse_chunk(line: &str) -> Result<GenerateChunk, ProviderError> {
    let chunk: GenerateChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::InvalidResponse(format!("{} - Line: {}", e, line)))?;
    match chunk.error {
        Some(error) => Err(ProviderError::InvalidResponse(error)),
        None => Ok(chunk),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            model: "gemma3",
            prompt: "Hi",
            stream: true,
            options: GenerateOptions {
                temperature: 0.0,
                num_predict: 10,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["options"]["num_predict"], 10);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_parse_chunk() {
        let chunk = parse_chunk(r#"{"model":"gemma3","response":"Hel","done":false}"#).unwrap();
        assert_eq!(chunk.response, "Hel");
        assert!(!chunk.done);

        let err = parse_chunk(r#"{"error":"model not found"}"#).err().unwrap();
        assert!(err.to_string().contains("model not found"));
        assert!(parse_chunk("not json").is_err());
    }
}
