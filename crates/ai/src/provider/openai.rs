//! OpenAI chat-completions adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{truncate_detail, ModelHandle, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiHandle {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiHandle {
    pub fn new(client: reqwest::Client, api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[async_trait]
impl ModelHandle for OpenAiHandle {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model,
            messages: [ChatMessage { role: "user", content: prompt }],
            max_tokens: max_output_tokens,
        };
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|error| ProviderError::Malformed(error.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Malformed("response contained no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::ChatCompletionResponse;

    #[test]
    fn parses_the_chat_completions_wire_shape() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.choices[0].message.content, "hello");
    }
}
