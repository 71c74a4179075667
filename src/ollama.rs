//! HTTP client for an Ollama-compatible language model server.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::services::AnalysisService;

const SYSTEM_PROMPT: &str =
    "You are a contract review assistant. Reply with a single JSON object and nothing else.";

/// Ollama client used as the analysis service.
pub struct OllamaClient {
    base_url: String,
    model: String,
    max_tokens: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Client for the configured server and model.
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    /// Names of the models the server has pulled
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama returned {}: {}", status.as_u16(), body));
        }

        let parsed: TagsResponse = response.json().await.context("Failed to parse model list")?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn request_error(&self, err: &reqwest::Error) -> anyhow::Error {
        if err.is_connect() {
            anyhow!("Cannot connect to Ollama at {}", self.base_url)
        } else if err.is_timeout() {
            anyhow!("Request timed out after {}s", self.timeout_secs)
        } else {
            anyhow!("HTTP client error: {err}")
        }
    }
}

/// Request body for /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

/// Response body from /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Response body from /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Deserialize)]
struct TagsModel {
    name: String,
}

#[async_trait]
impl AnalysisService for OllamaClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system: SYSTEM_PROMPT,
            stream: false,
            format: "json",
            options: GenerateOptions {
                num_predict: self.max_tokens,
            },
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Invoking analysis model");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama returned {}: {}", status.as_u16(), body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse model response")?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let config = AnalysisConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..AnalysisConfig::default()
        };
        let client = OllamaClient::new(&config).expect("client");
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.max_tokens, 4000);
    }

    #[test]
    fn test_request_shape() {
        let body = GenerateRequest {
            model: "llama3.1:8b",
            prompt: "Analyze",
            system: SYSTEM_PROMPT,
            stream: false,
            format: "json",
            options: GenerateOptions { num_predict: 4000 },
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 4000);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let config = AnalysisConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..AnalysisConfig::default()
        };
        let client = OllamaClient::new(&config).expect("client");
        assert!(client.invoke("hello").await.is_err());
    }
}
