use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, warn};

use crate::error::{ConfigError, FetchError};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const USER_AGENT: &str = concat!("cert_scraper/", env!("CARGO_PKG_VERSION"));

/// One page fetch. Requests sharing a `session_id` belong to the same run section.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub session_id: String,
}

/// Rendered page as returned by the fetch service.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError>;
}

/// Fetches pages through spider.cloud, which renders them server-side.
pub struct SpiderFetcher {
    spider: Spider,
}

impl SpiderFetcher {
    pub fn new(api_key: String) -> Result<Self, ConfigError> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| ConfigError::Invalid(format!("Failed to create Spider client: {}", e)))?;
        Ok(Self { spider })
    }

    async fn scrape_once(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let start = Instant::now();
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| FetchError::new(url, e.to_string()))?;
        debug!("spider responded for {} in {}ms", url, start.elapsed().as_millis());

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        if let Some(err) = first
            .and_then(|obj| obj.get("error"))
            .and_then(|e| e.as_str())
            .filter(|e| !e.is_empty())
        {
            return Err(FetchError::new(url, err));
        }
        if let Some(status) = first
            .and_then(|obj| obj.get("status"))
            .and_then(|s| s.as_i64())
            .filter(|s| *s >= 400)
        {
            return Err(FetchError::new(url, format!("HTTP {}", status)));
        }

        let html = first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| FetchError::new(url, "No content in spider response"))?;

        Ok(FetchedPage {
            url: url.to_string(),
            html: html.to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for SpiderFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        for attempt in 0..MAX_RETRIES {
            match self.scrape_once(&request.url).await {
                Err(e) if is_retryable(&e.message) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        session = %request.session_id,
                        "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                        request.url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
        self.scrape_once(&request.url).await
    }
}

/// Rate limits and transient server errors. Status codes only count in the
/// `HTTP <status>` form, never as bare digits elsewhere in the message.
fn is_retryable(message: &str) -> bool {
    static STATUS_RE: OnceLock<Regex> = OnceLock::new();
    static RATE_RE: OnceLock<Regex> = OnceLock::new();
    let status_re = STATUS_RE
        .get_or_init(|| Regex::new(r"\bHTTP (?:status \w+ error \()?(\d{3})\b").unwrap());
    let rate_re = RATE_RE.get_or_init(|| Regex::new(r"(?i)\brate[- ]limit").unwrap());

    let status = status_re
        .captures(message)
        .and_then(|c| c[1].parse::<u16>().ok());
    matches!(status, Some(429 | 500 | 502 | 503 | 504)) || rate_re.is_match(message)
}

/// Plain HTTP fetcher for sites that need no rendering.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        debug!(session = %request.session_id, "GET {}", request.url);
        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(|e| FetchError::new(&request.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(&request.url, format!("HTTP {}", status)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| FetchError::new(&request.url, e.to_string()))?;
        Ok(FetchedPage {
            url: request.url.clone(),
            html,
        })
    }
}
