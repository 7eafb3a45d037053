//! Anthropic messages adapter. Same normalized surface as the other
//! providers, different wire shape: `x-api-key` header, versioned API, and a
//! content-block response body.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{truncate_detail, ModelHandle, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicHandle {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicHandle {
    pub fn new(client: reqwest::Client, api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ModelHandle for AnthropicHandle {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        let request = MessagesRequest {
            model,
            max_tokens: max_output_tokens,
            messages: [UserMessage { role: "user", content: prompt }],
        };
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|error| ProviderError::Malformed(error.to_string()))?;
        let text: String =
            parsed.content.into_iter().map(|block| block.text).collect::<Vec<_>>().join("");
        if text.is_empty() {
            return Err(ProviderError::Malformed("response contained no text blocks".to_string()));
        }
        Ok(text)
    }
}
