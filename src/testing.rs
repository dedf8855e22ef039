//! In-memory collaborators for pipeline and driver tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ExtractError, FetchError};
use crate::extract::{ExtractionRequest, Extractor};
use crate::fetch::{FetchRequest, FetchedPage, Fetcher};

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
}

/// Serves canned HTML per URL; unknown URLs fail like a DNS error unless a
/// fallback page is set.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, Result<String, String>>,
    fallback: Option<String>,
    pub requests: Mutex<Vec<FetchRequest>>,
}

impl FakeFetcher {
    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), Ok(html.into()));
        self
    }

    pub fn failing(mut self, url: &str, message: &str) -> Self {
        self.pages.insert(url.to_string(), Err(message.to_string()));
        self
    }

    /// Serve `html` for every URL without its own entry.
    pub fn any_url(mut self, html: impl Into<String>) -> Self {
        self.fallback = Some(html.into());
        self
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        let html = match (self.pages.get(&request.url), &self.fallback) {
            (Some(Ok(html)), _) | (None, Some(html)) => html,
            (Some(Err(msg)), _) => return Err(FetchError::new(&request.url, msg.clone())),
            (None, None) => {
                return Err(FetchError::new(&request.url, "net::ERR_NAME_NOT_RESOLVED"))
            }
        };
        Ok(FetchedPage {
            url: request.url.clone(),
            html: html.clone(),
        })
    }
}

/// Answers with the first canned reply whose needle occurs in the content.
/// Content matching no needle gets an empty list.
#[derive(Default)]
pub struct FakeExtractor {
    replies: Vec<(String, Result<String, ExtractError>)>,
    pub requests: Mutex<Vec<ExtractionRequest>>,
}

impl FakeExtractor {
    pub fn reply(mut self, needle: &str, content: &str) -> Self {
        self.replies.push((needle.to_string(), Ok(content.to_string())));
        self
    }

    pub fn fail(mut self, needle: &str, err: ExtractError) -> Self {
        self.replies.push((needle.to_string(), Err(err)));
        self
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .iter()
            .find(|(needle, _)| request.content.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Ok("[]".to_string()))
    }
}
