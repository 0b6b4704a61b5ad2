//! Natural-language query → [`FilterPredicate`].

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{CompletionRequest, LanguageModel};
use crate::error::{Error, Result};
use crate::search::{FilterPredicate, FilterSchema};

const SERVICE: &str = "filter-extraction";

/// Extracts metadata filters from queries with a language model.
///
/// Fail-open: when the model errors or replies with garbage, the query is
/// searched without filters.
pub struct FilterExtractor {
    llm: Arc<dyn LanguageModel>,
    schema: FilterSchema,
    system_prompt: String,
}

impl FilterExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, schema: FilterSchema) -> Self {
        let system_prompt = system_prompt(&schema);
        Self {
            llm,
            schema,
            system_prompt,
        }
    }

    pub fn schema(&self) -> &FilterSchema {
        &self.schema
    }

    /// Extract a filter; failures yield an empty predicate.
    pub async fn extract(&self, query: &str) -> FilterPredicate {
        match self.try_extract(query).await {
            Ok(filter) => filter,
            Err(e) => {
                warn!("Filter extraction failed for {:?}, searching unfiltered: {}", query, e);
                metrics::counter!("filter_extraction_failures_total").increment(1);
                FilterPredicate::default()
            }
        }
    }

    /// Extract a filter, surfacing model and parse failures.
    pub async fn try_extract(&self, query: &str) -> Result<FilterPredicate> {
        let prompt = format!("Query: {}", query.trim());
        let request = CompletionRequest::new(&prompt)
            .with_system(&self.system_prompt)
            .json();
        let raw = self.llm.complete(request).await?;
        let filter = parse_filter_response(&raw, &self.schema)?;
        debug!("Extracted filter {} from {:?}", filter, query);
        Ok(filter)
    }
}

/// Parse a model reply into a filter.
///
/// Tolerates Markdown code fences and prose around the JSON object.
/// `null`, `{}` and an empty reply mean "no filter". Invalid fields are
/// dropped; a reply with no parseable JSON is an error.
pub fn parse_filter_response(raw: &str, schema: &FilterSchema) -> Result<FilterPredicate> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() || body.eq_ignore_ascii_case("null") {
        return Ok(FilterPredicate::default());
    }
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(Error::external(
                SERVICE,
                format!("no JSON object in reply: {}", truncate(body, 80)),
            ))
        }
    };
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::external(SERVICE, format!("unparseable reply: {}", e)))?;
    Ok(FilterPredicate::from_json_lenient(&value, schema))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line, e.g. ```json
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn system_prompt(schema: &FilterSchema) -> String {
    let mut prompt = String::from(
        "Extract product search filters from the user's query.\n\
         Reply with a single JSON object using only these optional keys:\n\
         - \"category\": product category\n\
         - \"color\": product colour\n\
         - \"price\": an object with exactly one of \"$lt\", \"$lte\", \"$gt\", \"$gte\", \"$eq\" mapped to a number\n",
    );
    if let Some(categories) = &schema.categories {
        let list: Vec<&str> = categories.iter().map(String::as_str).collect();
        prompt.push_str(&format!("Known categories: {}\n", list.join(", ")));
    }
    if let Some(colors) = &schema.colors {
        let list: Vec<&str> = colors.iter().map(String::as_str).collect();
        prompt.push_str(&format!("Known colors: {}\n", list.join(", ")));
    }
    prompt.push_str(
        "Omit a key when the query does not constrain it or names several alternatives.\n\
         Example: \"white electronics under $300\" -> {\"category\": \"electronics\", \"color\": \"white\", \"price\": {\"$lt\": 300}}\n\
         Reply {} when the query has no filters.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Comparator;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<String> {
            assert!(request.json_output);
            self.prompts
                .lock()
                .unwrap()
                .push(request.system.unwrap_or_default().to_string());
            self.reply
                .clone()
                .ok_or_else(|| Error::external("llm", "connection refused"))
        }
    }

    fn catalog_schema() -> FilterSchema {
        FilterSchema {
            categories: Some(BTreeSet::from([
                "electronics".to_string(),
                "shoes".to_string(),
            ])),
            colors: Some(BTreeSet::from(["white".to_string(), "red".to_string()])),
        }
    }

    #[test]
    fn test_parse_plain_and_fenced_replies() {
        let schema = catalog_schema();
        let expected = FilterPredicate::new()
            .with_category("electronics")
            .with_color("white")
            .with_price(Comparator::Lt, 300.0);

        let plain = r#"{"category": "electronics", "color": "white", "price": {"$lt": 300}}"#;
        assert_eq!(parse_filter_response(plain, &schema).unwrap(), expected);

        let fenced = "```json\n{\"category\": \"Electronics\", \"color\": \"white\", \"price\": {\"lt\": \"300\"}}\n```";
        assert_eq!(parse_filter_response(fenced, &schema).unwrap(), expected);

        let chatty = "Sure! Here you go: {\"category\": \"electronics\", \"color\": \"white\", \"price\": {\"$lt\": 300}} Hope that helps.";
        assert_eq!(parse_filter_response(chatty, &schema).unwrap(), expected);
    }

    #[test]
    fn test_parse_empty_replies() {
        let schema = catalog_schema();
        for raw in ["", "null", "{}", "```json\n{}\n```", "  NULL  "] {
            assert!(parse_filter_response(raw, &schema).unwrap().is_empty(), "{raw:?}");
        }
    }

    #[test]
    fn test_parse_drops_invalid_fields() {
        let schema = catalog_schema();
        let raw = r#"{"category": "furniture", "color": "red", "brand": "acme", "price": {"$between": 5}}"#;
        let filter = parse_filter_response(raw, &schema).unwrap();
        assert_eq!(filter, FilterPredicate::new().with_color("red"));
    }

    #[test]
    fn test_parse_garbage_is_error() {
        let schema = catalog_schema();
        let err = parse_filter_response("I cannot help with that", &schema).unwrap_err();
        assert!(err.is_recoverable());
        let err = parse_filter_response("{category: electronics", &schema).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_extract_fails_open() {
        let extractor = FilterExtractor::new(Arc::new(ScriptedModel::failing()), catalog_schema());
        assert!(extractor.extract("white headphones").await.is_empty());
        assert!(extractor.try_extract("white headphones").await.is_err());

        let extractor = FilterExtractor::new(
            Arc::new(ScriptedModel::replying("not json at all")),
            catalog_schema(),
        );
        assert!(extractor.extract("white headphones").await.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_lists_vocabulary() {
        let model = Arc::new(ScriptedModel::replying(r#"{"color": "white"}"#));
        let extractor = FilterExtractor::new(model.clone(), catalog_schema());

        let filter = extractor.extract("white things").await;
        assert_eq!(filter, FilterPredicate::new().with_color("white"));

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Known categories: electronics, shoes"));
        assert!(prompts[0].contains("Known colors: red, white"));
    }
}
