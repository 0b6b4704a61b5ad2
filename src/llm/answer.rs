//! Answer generation over retrieved products.

use serde::Serialize;
use std::sync::Arc;

use super::{CompletionRequest, LanguageModel};
use crate::error::Result;
use crate::search::{IndexSnapshot, SearchOutcome};

/// Generated answer and the products it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Product ids in rank order
    pub sources: Vec<String>,
}

/// Render retrieved products as prompt context.
pub fn build_context(outcome: &SearchOutcome, snapshot: &IndexSnapshot) -> String {
    let mut context = String::from("TEXT DESCRIPTIONS:\n");
    for result in &outcome.results {
        context.push_str(&format!(
            "- [{}] {} (price: ${:.2})\n",
            result.record.id,
            result.record.text_document(),
            result.record.price
        ));
    }

    let visual: Vec<String> = outcome
        .results
        .iter()
        .filter_map(|result| {
            let description = snapshot.visual_description(&result.record.id)?;
            let image = result.record.image_ref.as_deref().unwrap_or("-");
            Some(format!(
                "- [{}] {} (image: {})\n",
                result.record.id, description, image
            ))
        })
        .collect();
    if !visual.is_empty() {
        context.push_str("\nVISUAL DESCRIPTIONS:\n");
        for line in visual {
            context.push_str(&line);
        }
    }
    context
}

/// Answers questions from search results with a language model.
pub struct AnswerGenerator {
    llm: Arc<dyn LanguageModel>,
    temperature: f32,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Errors from the model are returned unchanged.
    pub async fn answer(
        &self,
        query: &str,
        outcome: &SearchOutcome,
        snapshot: &IndexSnapshot,
    ) -> Result<Answer> {
        let context = build_context(outcome, snapshot);
        let prompt = format!(
            "Based on this product catalog information:\n\n{}\n\nAnswer this question: {}\n\nBe specific and reference the products you're talking about.",
            context, query
        );
        let request = CompletionRequest::new(&prompt).with_temperature(self.temperature);
        let answer = self.llm.complete(request).await?;
        Ok(Answer {
            answer: answer.trim().to_string(),
            sources: outcome.ids(),
        })
    }
}
