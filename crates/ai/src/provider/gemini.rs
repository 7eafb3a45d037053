//! Google Gemini `generateContent` adapter. The key rides in a query
//! parameter and the output token bound lives under `generationConfig`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{truncate_detail, ModelHandle, ProviderError};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiHandle {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiHandle {
    pub fn new(client: reqwest::Client, api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ModelHandle for GeminiHandle {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            contents: [Content { parts: [Part { text: prompt }] }],
            generation_config: GenerationConfig { max_output_tokens },
        };
        let response = self
            .client
            .post(format!("{}/v1beta/models/{model}:generateContent", self.base_url))
            .query(&[("key", self.api_key.as_str())])
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
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate.content.parts.into_iter().map(|part| part.text).collect::<Vec<_>>().join("")
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::Malformed("response contained no candidates".to_string()));
        }
        Ok(text)
    }
}
