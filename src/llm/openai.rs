//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{CompletionRequest, LanguageModel, VisionDescriber};
use crate::error::{Error, Result};

const VISION_PROMPT: &str = "Describe this product image in detail. Focus on: color, type of item, key visual features, style. Be concise but specific.";

/// Async client bound to one model and token budget.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: usize,
    service: &'static str,
}

impl OpenAiClient {
    /// Build a client for `model` at `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        max_tokens: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing OpenAI API key".into()));
        }
        if model.trim().is_empty() {
            return Err(Error::Config("missing OpenAI model name".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| Error::Config("invalid OpenAI API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            max_tokens,
            service: "llm",
        })
    }

    /// Label used in error messages (e.g. "vision", "filter-extraction").
    pub fn with_service_name(mut self, service: &'static str) -> Self {
        self.service = service;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: Vec<ChatMessage<'_>>, json_output: bool, temperature: f32) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature,
            messages,
            response_format: json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::external(self.service, e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::external(
                self.service,
                format!("{} returned {}: {}", self.model, status, text),
            ));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::external(self.service, format!("bad response body: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::external(self.service, "response has no message content"))?;
        debug!("{} replied with {} chars", self.model, content.len());
        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: MessageContent::Text(request.prompt),
        });
        self.chat(messages, request.json_output, request.temperature)
            .await
    }
}

#[async_trait]
impl VisionDescriber for OpenAiClient {
    async fn describe(&self, image_ref: &str) -> Result<String> {
        let url = image_url(image_ref)
            .await
            .map_err(|e| Error::external(self.service, e))?;
        let messages = vec![ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                },
                ContentPart::Text {
                    text: VISION_PROMPT,
                },
            ]),
        }];
        self.chat(messages, false, 0.0).await
    }
}

/// Remote URLs pass through; local files become base64 data URLs.
async fn image_url(image_ref: &str) -> std::result::Result<String, String> {
    if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
        return Ok(image_ref.to_string());
    }
    let bytes = tokio::fs::read(image_ref)
        .await
        .map_err(|e| format!("failed to read image {}: {}", image_ref, e))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime_type(image_ref), encoded))
}

fn mime_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
