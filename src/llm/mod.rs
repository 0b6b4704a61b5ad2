//! Language-model collaborators.
//!
//! - [`LanguageModel`]: text completion, used for filter extraction and answers
//! - [`VisionDescriber`]: image → text description, used at index time
//!
//! [`OpenAiClient`] implements both against an OpenAI-compatible
//! chat-completions endpoint. Calls are single-shot: no retry, the caller
//! owns the fallback.

mod answer;
mod extractor;
mod openai;

pub use answer::{build_context, Answer, AnswerGenerator};
pub use extractor::{parse_filter_response, FilterExtractor};
pub use openai::OpenAiClient;

use async_trait::async_trait;

use crate::error::Result;

/// Prompt sent to a [`LanguageModel`].
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Optional system instruction
    pub system: Option<&'a str>,
    /// User message
    pub prompt: &'a str,
    /// Sampling temperature
    pub temperature: f32,
    /// Ask the model for a JSON object
    pub json_output: bool,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            system: None,
            prompt,
            temperature: 0.0,
            json_output: false,
        }
    }

    pub fn with_system(mut self, system: &'a str) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Text-generation collaborator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the model's reply text.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String>;
}

/// Image description collaborator.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    /// Describe the image at `image_ref` (local path or http(s) URL).
    async fn describe(&self, image_ref: &str) -> Result<String>;
}
