use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExtractionRequest, Extractor};
use crate::error::{ConfigError, ExtractError};

/// Chat-completions client for Groq's OpenAI-compatible API.
pub struct GroqExtractor {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl GroqExtractor {
    pub fn new(
        api_key: String,
        api_base: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }
}

fn system_prompt(request: &ExtractionRequest) -> String {
    format!(
        "{}\n\nReply with a JSON array only. Each element must match this JSON schema:\n{}",
        request.instruction, request.schema
    )
}

#[async_trait]
impl Extractor for GroqExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        let system = system_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.content,
                },
            ],
        };

        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Upstream(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExtractError::Upstream(e.to_string()))?;
        debug!(
            model = %self.model,
            "extraction call returned {} in {}ms",
            status,
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(ExtractError::Upstream(format!("HTTP {}: {}", status, message)));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ExtractError::Upstream(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ExtractError::Upstream("no content in completion".into()))
    }
}
