use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ExtractError, FetchError, Rejection};
use crate::extract::{self, ExtractionRequest, Extractor};
use crate::fetch::{FetchRequest, Fetcher};
use crate::record::{self, DocumentRecord, SeenNames};
use crate::{html, terminator, urls};

/// Per-run settings shared by every page.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// CSS selector for the region handed to extraction.
    pub css_selector: String,
    pub required_fields: Vec<String>,
    pub no_results_marker: String,
    /// Extraction task text; URL rules for each page are appended to it.
    pub task: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            css_selector: "body".to_string(),
            required_fields: record::REQUIRED_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            no_results_marker: terminator::DEFAULT_MARKER.to_string(),
            task: extract::DEFAULT_TASK.to_string(),
        }
    }
}

/// Why a page produced no records. Only `Fetch` ends pagination.
#[derive(Debug, Clone)]
pub enum PageFailure {
    Fetch(FetchError),
    Extraction(ExtractError),
}

/// Items dropped on a page, by reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DropCounts {
    pub incomplete: usize,
    pub unresolvable: usize,
    pub duplicate: usize,
}

impl DropCounts {
    fn record(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::MissingField(_) => self.incomplete += 1,
            Rejection::UnresolvableUrl(_) => self.unresolvable += 1,
            Rejection::Duplicate(_) => self.duplicate += 1,
        }
    }

    pub fn add(&mut self, other: DropCounts) {
        self.incomplete += other.incomplete;
        self.unresolvable += other.unresolvable;
        self.duplicate += other.duplicate;
    }
}

/// Result of processing one page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    /// Accepted records in extraction order.
    pub records: Vec<DocumentRecord>,
    /// Items the extraction service returned before any checks.
    pub raw_items: usize,
    pub more_pages: bool,
    pub failure: Option<PageFailure>,
    pub dropped: DropCounts,
}

impl PageOutcome {
    fn fetch_failed(err: FetchError) -> Self {
        Self {
            records: Vec::new(),
            raw_items: 0,
            more_pages: false,
            failure: Some(PageFailure::Fetch(err)),
            dropped: DropCounts::default(),
        }
    }

    fn extraction_failed(err: ExtractError, more_pages: bool) -> Self {
        Self {
            records: Vec::new(),
            raw_items: 0,
            more_pages,
            failure: Some(PageFailure::Extraction(err)),
            dropped: DropCounts::default(),
        }
    }
}

/// Fetch, extract, validate and deduplicate one listing page.
pub struct PageExtractionPipeline {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    config: PipelineConfig,
}

impl PageExtractionPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            config,
        }
    }

    pub async fn process_page(
        &self,
        page_url: &str,
        session_id: &str,
        seen: &mut SeenNames,
    ) -> PageOutcome {
        info!("Loading URL: {}", page_url);

        let request = FetchRequest {
            url: page_url.to_string(),
            session_id: session_id.to_string(),
        };
        let page = match self.fetcher.fetch(&request).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Error fetching URL: {}", e);
                return PageOutcome::fetch_failed(e);
            }
        };

        let base_url = urls::resolve_base_url(&page.html, &page.url);
        let more_pages =
            !terminator::has_no_results_marker(&page.html, &self.config.no_results_marker);
        if !more_pages {
            info!("No-results marker found on {}", page_url);
        }

        let content = match html::select_region(&page.html, &self.config.css_selector) {
            Some(region) if !region.trim().is_empty() => region,
            Some(_) => {
                let err = ExtractError::EmptyContent(format!(
                    "selector '{}' matched nothing",
                    self.config.css_selector
                ));
                warn!("{} on {}", err, page_url);
                return PageOutcome::extraction_failed(err, more_pages);
            }
            None => {
                let err = ExtractError::EmptyContent(format!(
                    "invalid selector '{}'",
                    self.config.css_selector
                ));
                warn!("{}", err);
                return PageOutcome::extraction_failed(err, more_pages);
            }
        };

        let extraction = ExtractionRequest {
            content,
            schema: DocumentRecord::json_schema(),
            instruction: extract::build_instruction(&self.config.task, &base_url),
        };
        let items = match extract::invoke(self.extractor.as_ref(), &extraction).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Extraction failed for {}: {}", page_url, e);
                return PageOutcome::extraction_failed(e, more_pages);
            }
        };
        let raw_items = items.len();
        debug!("Extracted {} raw items from {}", raw_items, page_url);

        let required: Vec<&str> = self
            .config
            .required_fields
            .iter()
            .map(String::as_str)
            .collect();
        let mut records = Vec::new();
        let mut dropped = DropCounts::default();

        for item in items {
            match record::accept(item, &base_url, &required, seen) {
                Ok(rec) => records.push(rec),
                Err(rejection) => {
                    match &rejection {
                        Rejection::Duplicate(name) => {
                            info!("Duplicate document '{}' found. Skipping.", name)
                        }
                        other => debug!("Dropping item: {}", other),
                    }
                    dropped.record(&rejection);
                }
            }
        }

        if records.is_empty() {
            info!("No new documents on {}", page_url);
        } else {
            info!("Extracted {} documents from {}", records.len(), page_url);
        }

        PageOutcome {
            records,
            raw_items,
            more_pages,
            failure: None,
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, FakeExtractor, FakeFetcher};

    const PAGE1: &str = "https://zert.example.de/suche?page=1";
    const PAGE2: &str = "https://zert.example.de/suche?page=2";
    const PAGE3: &str = "https://zert.example.de/suche?page=3";

    const PAGE1_REPLY: &str = r#"[
        {"document_name": "ISO 9001 Zertifikat Berlin", "document_url": "/downloads/iso9001-berlin.pdf", "error": false},
        {"document_name": "ISO 9001 Zertifikat Hamburg", "document_url": "downloads/iso9001-hamburg.pdf", "error": false},
        {"document_name": "ISO 9001 Zertifikat Berlin", "document_url": "/downloads/iso9001-berlin-copy.pdf", "error": false},
        {"document_name": "", "document_url": "/downloads/unnamed.pdf", "error": false},
        {"document_name": "ISO 9001 Zertifikat München", "document_url": "https://files.example-cdn.net/iso9001-muenchen.pdf", "error": false}
    ]"#;

    fn pipeline(fetcher: FakeFetcher, extractor: FakeExtractor) -> PageExtractionPipeline {
        let config = PipelineConfig {
            css_selector: "div.search-results".into(),
            ..PipelineConfig::default()
        };
        PageExtractionPipeline::new(Arc::new(fetcher), Arc::new(extractor), config)
    }

    #[tokio::test]
    async fn accepts_normalizes_and_dedups_within_page() {
        let p = pipeline(
            FakeFetcher::default().page(PAGE1, fixture("listing_page1")),
            FakeExtractor::default().reply("iso9001-berlin", PAGE1_REPLY),
        );
        let mut seen = SeenNames::new();
        let out = p.process_page(PAGE1, "s1", &mut seen).await;

        assert!(out.failure.is_none());
        assert!(out.more_pages);
        let urls: Vec<&str> = out.records.iter().map(|r| r.document_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://zert.example.de/downloads/iso9001-berlin.pdf",
                "https://zert.example.de/downloads/iso9001-hamburg.pdf",
                "https://files.example-cdn.net/iso9001-muenchen.pdf",
            ]
        );
        assert_eq!(out.raw_items, 5);
        assert_eq!(out.dropped.duplicate, 1);
        assert_eq!(out.dropped.incomplete, 1);
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn instruction_and_content_are_page_scoped() {
        let extractor = Arc::new(FakeExtractor::default());
        let p = PageExtractionPipeline::new(
            Arc::new(FakeFetcher::default().page(PAGE2, fixture("listing_page2"))),
            extractor.clone(),
            PipelineConfig {
                css_selector: "div.search-results".into(),
                ..PipelineConfig::default()
            },
        );
        p.process_page(PAGE2, "s1", &mut SeenNames::new()).await;

        let requests = extractor.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0]
            .instruction
            .contains("The base URL of this page is https://static.example.com/certs/."));
        assert!(requests[0].content.contains("iso9001-koeln.pdf"));
        assert!(!requests[0].content.contains("<title>"));
        assert_eq!(requests[0].schema, DocumentRecord::json_schema());
    }

    #[tokio::test]
    async fn declared_base_drives_resolution() {
        let reply = r#"[{"document_name": "ISO 9001 Zertifikat Köln", "document_url": "iso9001-koeln.pdf"}]"#;
        let p = pipeline(
            FakeFetcher::default().page(PAGE2, fixture("listing_page2")),
            FakeExtractor::default().reply("koeln", reply),
        );
        let out = p.process_page(PAGE2, "s1", &mut SeenNames::new()).await;
        assert_eq!(
            out.records[0].document_url,
            "https://static.example.com/certs/iso9001-koeln.pdf"
        );
    }

    #[tokio::test]
    async fn marker_stops_even_with_records() {
        let html = fixture("listing_page1").replace(
            "<ul class=\"pagination\">",
            "<p>No Results Found</p><ul class=\"pagination\">",
        );
        let p = pipeline(
            FakeFetcher::default().page(PAGE1, html),
            FakeExtractor::default().reply("iso9001-berlin", PAGE1_REPLY),
        );
        let out = p.process_page(PAGE1, "s1", &mut SeenNames::new()).await;
        assert_eq!(out.records.len(), 3);
        assert!(!out.more_pages);
    }

    #[tokio::test]
    async fn empty_page_with_marker() {
        let p = pipeline(
            FakeFetcher::default().page(PAGE3, fixture("listing_empty")),
            FakeExtractor::default(),
        );
        let out = p.process_page(PAGE3, "s1", &mut SeenNames::new()).await;
        assert!(out.records.is_empty());
        assert!(!out.more_pages);
        assert!(out.failure.is_none());
    }

    #[tokio::test]
    async fn fetch_failure_stops_with_diagnostic() {
        let p = pipeline(
            FakeFetcher::default().failing(PAGE1, "Timeout 30000ms exceeded"),
            FakeExtractor::default(),
        );
        let mut seen = SeenNames::new();
        let out = p.process_page(PAGE1, "s1", &mut seen).await;
        assert!(out.records.is_empty());
        assert!(!out.more_pages);
        match out.failure {
            Some(PageFailure::Fetch(e)) => assert_eq!(e.message, "Timeout 30000ms exceeded"),
            other => panic!("expected fetch failure, got {:?}", other),
        }
        assert_eq!(seen.len(), 0);
    }

    #[tokio::test]
    async fn extraction_failure_is_not_terminal() {
        let p = pipeline(
            FakeFetcher::default().page(PAGE1, fixture("listing_page1")),
            FakeExtractor::default().fail(
                "iso9001",
                ExtractError::Upstream("HTTP 429: rate limit".into()),
            ),
        );
        let out = p.process_page(PAGE1, "s1", &mut SeenNames::new()).await;
        assert!(out.records.is_empty());
        assert!(out.more_pages);
        assert!(matches!(out.failure, Some(PageFailure::Extraction(_))));
    }

    #[tokio::test]
    async fn malformed_output_is_a_parse_failure() {
        let p = pipeline(
            FakeFetcher::default().page(PAGE1, fixture("listing_page1")),
            FakeExtractor::default().reply("iso9001", "I could not find any documents."),
        );
        let out = p.process_page(PAGE1, "s1", &mut SeenNames::new()).await;
        assert!(out.more_pages);
        assert!(matches!(
            out.failure,
            Some(PageFailure::Extraction(ExtractError::Parse(_)))
        ));
    }

    #[tokio::test]
    async fn unmatched_selector_skips_extraction() {
        let extractor = Arc::new(FakeExtractor::default());
        let p = PageExtractionPipeline::new(
            Arc::new(FakeFetcher::default().page(PAGE1, fixture("listing_page1"))),
            extractor.clone(),
            PipelineConfig {
                css_selector: "table.certs".into(),
                ..PipelineConfig::default()
            },
        );
        let out = p.process_page(PAGE1, "s1", &mut SeenNames::new()).await;
        assert!(out.more_pages);
        assert!(matches!(
            out.failure,
            Some(PageFailure::Extraction(ExtractError::EmptyContent(_)))
        ));
        assert!(extractor.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn names_seen_on_earlier_pages_are_dropped() {
        let p = pipeline(
            FakeFetcher::default().page(PAGE2, fixture("listing_page2")),
            FakeExtractor::default().reply(
                "koeln",
                r#"[{"document_name": "ISO 9001 Zertifikat Köln", "document_url": "iso9001-koeln.pdf"},
                    {"document_name": "ISO 9001 Zertifikat Berlin", "document_url": "/downloads/iso9001-berlin.pdf"}]"#,
            ),
        );
        let mut seen = SeenNames::new();
        seen.insert_if_new("ISO 9001 Zertifikat Berlin");
        let out = p.process_page(PAGE2, "s1", &mut seen).await;
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].document_name, "ISO 9001 Zertifikat Köln");
        assert_eq!(out.dropped.duplicate, 1);
    }
}
