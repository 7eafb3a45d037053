//! Self-hosted Ollama adapter. No credential; the endpoint is a local-network
//! base URL (defaults to the standard local daemon port).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{truncate_detail, ModelHandle, ProviderError};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaHandle {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaHandle {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl ModelHandle for OllamaHandle {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions { num_predict: max_output_tokens },
        };
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                detail: truncate_detail(&body),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|error| ProviderError::Malformed(error.to_string()))?;
        Ok(parsed.response)
    }
}
