pub mod llm;

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::ExtractError;
use crate::record::{RawItem, DOCUMENT_NAME};

pub use llm::GroqExtractor;

/// What the extraction service is asked to do for one page.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub content: String,
    pub schema: Value,
    pub instruction: String,
}

/// A structured-extraction service. Returns the raw extracted content.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<String, ExtractError>;
}

pub const DEFAULT_TASK: &str = "Extract all objects with 'document_name' and 'document_url' of the \
ISO 9001 documents from the following content. Only retrieve the links relevant to the Germany \
location and take care that you take the PDF links which are working for download.";

/// Build the instruction for one page: the task text followed by the
/// URL rules for `base_url`. `{base_url}` in the task is substituted too.
pub fn build_instruction(task: &str, base_url: &str) -> String {
    format!(
        "{}\n\n\
         The base URL of this page is {base}. Every document_url must be an absolute URL:\n\
         - keep URLs that start with http:// or https:// unchanged;\n\
         - for URLs starting with //, prepend the scheme of {base};\n\
         - for URLs starting with /, prepend the scheme and host of {base};\n\
         - resolve any other relative path against {base}.\n\
         Set error to true only if you are unsure the link is a downloadable document.",
        task.replace("{base_url}", base_url),
        base = base_url
    )
}

/// Call the service once and parse its output into raw items.
pub async fn invoke(
    extractor: &dyn Extractor,
    request: &ExtractionRequest,
) -> Result<Vec<RawItem>, ExtractError> {
    let content = extractor.extract(request).await?;
    parse_items(&content)
}

/// Parse extracted content into maps.
///
/// Accepts a JSON array, an object wrapping a single array, or a single
/// record object. Reasoning blocks and Markdown fences are ignored.
pub fn parse_items(content: &str) -> Result<Vec<RawItem>, ExtractError> {
    static THINK_RE: OnceLock<Regex> = OnceLock::new();
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let think_re = THINK_RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());
    let fence_re = FENCE_RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").unwrap());

    let without_think = think_re.replace_all(content, "");
    let body = match fence_re.captures(&without_think) {
        Some(c) => c.get(1).map_or("", |m| m.as_str()).to_string(),
        None => without_think.to_string(),
    };
    let body = body.trim();
    if body.is_empty() {
        return Err(ExtractError::Parse("empty response".into()));
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(obj) if obj.contains_key(DOCUMENT_NAME) => vec![Value::Object(obj)],
        Value::Object(obj) => {
            let mut arrays = obj.into_iter().filter_map(|(_, v)| match v {
                Value::Array(a) => Some(a),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(a), None) => a,
                _ => {
                    return Err(ExtractError::Parse(
                        "object does not wrap exactly one list".into(),
                    ))
                }
            }
        }
        other => {
            return Err(ExtractError::Parse(format!(
                "expected a list, got {}",
                type_name(&other)
            )))
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(map) => Some(map),
            other => {
                debug!("skipping non-object item: {}", other);
                None
            }
        })
        .collect())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
