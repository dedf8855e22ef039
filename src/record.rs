use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Rejection;
use crate::urls;

pub const DOCUMENT_NAME: &str = "document_name";
pub const DOCUMENT_URL: &str = "document_url";
pub const ERROR: &str = "error";

/// Fields every accepted record must carry.
pub const REQUIRED_FIELDS: &[&str] = &[DOCUMENT_NAME, DOCUMENT_URL];

/// One item as returned by the extraction service, before any checks.
pub type RawItem = Map<String, Value>;

/// A validated document link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    pub document_name: String,
    pub document_url: String,
    /// Set when the extraction service flagged the item as uncertain.
    #[serde(skip_serializing_if = "is_false")]
    pub error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl DocumentRecord {
    /// Shape handed to the extraction service.
    pub fn json_schema() -> Value {
        serde_json::json!({
            "title": "DocumentRecord",
            "type": "object",
            "properties": {
                DOCUMENT_NAME: { "type": "string", "title": "Document Name" },
                DOCUMENT_URL: { "type": "string", "title": "Document Url" },
                ERROR: { "type": "boolean", "title": "Error", "default": false }
            },
            "required": [DOCUMENT_NAME, DOCUMENT_URL]
        })
    }
}

/// Document names accepted so far in a run. Only ever grows.
#[derive(Debug, Default, Clone)]
pub struct SeenNames {
    names: HashSet<String>,
}

impl SeenNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` and reports whether it was new, in one step.
    pub fn insert_if_new(&mut self, name: &str) -> bool {
        if self.names.contains(name) {
            return false;
        }
        self.names.insert(name.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

/// Drops an `error: false` flag; any other value is left in place.
pub fn strip_false_error(item: &mut RawItem) {
    if item.get(ERROR) == Some(&Value::Bool(false)) {
        item.remove(ERROR);
    }
}

/// Every required field must exist as a non-blank string.
pub fn validate(item: &RawItem, required: &[&str]) -> Result<(), Rejection> {
    match required.iter().find(|key| {
        !matches!(item.get(**key), Some(Value::String(s)) if !s.trim().is_empty())
    }) {
        Some(field) => Err(Rejection::MissingField(field.to_string())),
        None => Ok(()),
    }
}

/// Turn one raw item into an accepted record, or say why not.
///
/// Order: resolve the URL against `base_url`, check completeness, then
/// claim the name in `seen`. Only accepted names are registered.
pub fn accept(
    mut item: RawItem,
    base_url: &str,
    required: &[&str],
    seen: &mut SeenNames,
) -> Result<DocumentRecord, Rejection> {
    let resolved = match item.get(DOCUMENT_URL) {
        Some(Value::String(raw)) if !raw.trim().is_empty() => Some(
            urls::normalize_url(raw, base_url)
                .ok_or_else(|| Rejection::UnresolvableUrl(raw.clone()))?,
        ),
        _ => None,
    };
    if let Some(url) = resolved {
        item.insert(DOCUMENT_URL.to_string(), Value::String(url));
    }

    strip_false_error(&mut item);
    validate(&item, required)?;

    let name = string_field(&item, DOCUMENT_NAME)
        .ok_or_else(|| Rejection::MissingField(DOCUMENT_NAME.to_string()))?;
    let url = string_field(&item, DOCUMENT_URL)
        .ok_or_else(|| Rejection::MissingField(DOCUMENT_URL.to_string()))?;

    if !seen.insert_if_new(&name) {
        return Err(Rejection::Duplicate(name));
    }

    Ok(DocumentRecord {
        document_name: name,
        document_url: url,
        error: item.get(ERROR).is_some_and(flags_error),
    })
}

fn string_field(item: &RawItem, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn flags_error(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}
