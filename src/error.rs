use thiserror::Error;

/// The page collaborator could not retrieve content. Fatal to the page only.
#[derive(Debug, Clone, Error)]
#[error("fetch failed for {url}: {message}")]
pub struct FetchError {
    pub url: String,
    /// Upstream diagnostic, kept verbatim.
    pub message: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// The extraction collaborator produced nothing usable. Never fatal.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("extraction service error: {0}")]
    Upstream(String),
    #[error("extracted content is not a list of records: {0}")]
    Parse(String),
    #[error("no content to extract from: {0}")]
    EmptyContent(String),
}

/// Missing or invalid settings. The only failure that stops a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    MissingCredential(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// Why a single extracted item was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("document_url '{0}' cannot be resolved to an absolute URL")]
    UnresolvableUrl(String),
    #[error("duplicate document '{0}'")]
    Duplicate(String),
}
