use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::pipeline::{DropCounts, PageExtractionPipeline, PageFailure};
use crate::record::{DocumentRecord, SeenNames};
use crate::urls;

pub const DEFAULT_MAX_EMPTY_PAGES: u32 = 3;

/// Page range for each section.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub start_page: u32,
    /// Stop after this many pages even if more are available.
    pub max_pages: Option<u32>,
    /// Give up on a section after this many pages in a row that failed
    /// extraction or yielded no items at all. 0 disables the cap.
    pub max_empty_pages: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            max_pages: None,
            max_empty_pages: DEFAULT_MAX_EMPTY_PAGES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NoResultsMarker,
    FetchFailed,
    PageLimit,
    EmptyPages,
}

/// Counters for a section or a whole run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub pages: usize,
    pub accepted: usize,
    pub extraction_failures: usize,
    pub dropped: DropCounts,
    /// Duplicates removed when merging parallel sections.
    pub merge_duplicates: usize,
    pub stops: Vec<StopReason>,
}

impl RunReport {
    fn absorb(&mut self, other: RunReport) {
        self.pages += other.pages;
        self.accepted += other.accepted;
        self.extraction_failures += other.extraction_failures;
        self.dropped.add(other.dropped);
        self.merge_duplicates += other.merge_duplicates;
        self.stops.extend(other.stops);
    }

    pub fn summary(&self) -> String {
        let stops_of = |reason: StopReason| self.stops.iter().filter(|s| **s == reason).count();
        let fetch_stops = stops_of(StopReason::FetchFailed);
        let empty_stops = stops_of(StopReason::EmptyPages);
        let mut line = format!(
            "{} pages, {} documents ({} incomplete, {} unresolvable, {} duplicates dropped, {} extraction failures)",
            self.pages,
            self.accepted,
            self.dropped.incomplete,
            self.dropped.unresolvable,
            self.dropped.duplicate + self.merge_duplicates,
            self.extraction_failures,
        );
        if fetch_stops > 0 {
            line.push_str(&format!(", {} sections cut short by fetch errors", fetch_stops));
        }
        if empty_stops > 0 {
            line.push_str(&format!(", {} sections abandoned after empty pages", empty_stops));
        }
        line
    }
}

/// Walk one section's pages in order, threading `seen` through every page.
pub async fn run_section(
    pipeline: &PageExtractionPipeline,
    url_template: &str,
    session_id: &str,
    options: RunOptions,
    seen: &mut SeenNames,
    progress: &ProgressBar,
) -> (Vec<DocumentRecord>, RunReport) {
    let mut records = Vec::new();
    let mut report = RunReport::default();
    let mut page = options.start_page;
    let mut empty_streak = 0u32;

    loop {
        if options
            .max_pages
            .is_some_and(|max| report.pages >= max as usize)
        {
            info!("Page limit reached for {}", url_template);
            report.stops.push(StopReason::PageLimit);
            break;
        }

        let url = urls::page_url(url_template, page);
        progress.set_message(url.clone());
        let outcome = pipeline.process_page(&url, session_id, seen).await;
        progress.inc(1);

        report.pages += 1;
        report.accepted += outcome.records.len();
        report.dropped.add(outcome.dropped);
        records.extend(outcome.records);

        let unproductive = match outcome.failure {
            Some(PageFailure::Fetch(e)) => {
                warn!("Stopping {} at page {}: {}", url_template, page, e.message);
                report.stops.push(StopReason::FetchFailed);
                break;
            }
            Some(PageFailure::Extraction(_)) => {
                report.extraction_failures += 1;
                true
            }
            None => outcome.raw_items == 0,
        };
        empty_streak = if unproductive { empty_streak + 1 } else { 0 };

        debug!("{} distinct documents after page {}", seen.len(), page);

        if !outcome.more_pages {
            info!("No more results after page {} of {}", page, url_template);
            report.stops.push(StopReason::NoResultsMarker);
            break;
        }
        if options.max_empty_pages > 0 && empty_streak >= options.max_empty_pages {
            warn!(
                "Giving up on {} after {} pages without extracted items (last: {})",
                url_template, empty_streak, page
            );
            report.stops.push(StopReason::EmptyPages);
            break;
        }
        page += 1;
    }

    (records, report)
}

/// Run every section and return the merged records in section order.
///
/// Sequential runs share one `SeenNames` across sections. Parallel runs give
/// each section its own set and reconcile when merging, so the first
/// occurrence in section order wins either way.
pub async fn run_sections(
    pipeline: Arc<PageExtractionPipeline>,
    url_templates: &[String],
    options: RunOptions,
    parallel: bool,
    progress: &ProgressBar,
) -> Result<(Vec<DocumentRecord>, RunReport)> {
    let mut report = RunReport::default();

    if !parallel {
        let mut seen = SeenNames::new();
        let mut records = Vec::new();
        for (i, template) in url_templates.iter().enumerate() {
            let session_id = format!("section-{}", i);
            let (section_records, section_report) =
                run_section(&pipeline, template, &session_id, options, &mut seen, progress)
                    .await;
            records.extend(section_records);
            report.absorb(section_report);
        }
        return Ok((records, report));
    }

    let mut handles = Vec::with_capacity(url_templates.len());
    for (i, template) in url_templates.iter().enumerate() {
        let pipeline = Arc::clone(&pipeline);
        let template = template.clone();
        let progress = progress.clone();
        handles.push(tokio::spawn(async move {
            let session_id = format!("section-{}", i);
            let mut seen = SeenNames::new();
            run_section(&pipeline, &template, &session_id, options, &mut seen, &progress).await
        }));
    }

    let mut per_section = Vec::with_capacity(handles.len());
    for handle in handles {
        let (section_records, section_report) = handle.await.context("section task failed")?;
        per_section.push(section_records);
        report.absorb(section_report);
    }

    let (records, duplicates) = merge_sections(per_section);
    report.merge_duplicates = duplicates;
    report.accepted = records.len();
    Ok((records, report))
}

/// Concatenate per-section records in order, keeping the first record per name.
pub fn merge_sections(sections: Vec<Vec<DocumentRecord>>) -> (Vec<DocumentRecord>, usize) {
    let mut seen = SeenNames::new();
    let mut merged = Vec::new();
    let mut duplicates = 0;
    for rec in sections.into_iter().flatten() {
        if seen.insert_if_new(&rec.document_name) {
            merged.push(rec);
        } else {
            duplicates += 1;
        }
    }
    (merged, duplicates)
}

pub fn write_output(path: &Path, records: &[DocumentRecord]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} documents to {}", records.len(), path.display());
    Ok(())
}
