mod config;
mod error;
mod extract;
mod fetch;
mod html;
mod pipeline;
mod record;
mod run;
mod terminator;
mod urls;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::extract::{Extractor, GroqExtractor};
use crate::fetch::{Fetcher, HttpFetcher, SpiderFetcher};
use crate::pipeline::{PageExtractionPipeline, PageFailure, PipelineConfig};
use crate::record::{DocumentRecord, SeenNames};
use crate::run::{RunOptions, RunReport};

#[derive(Parser)]
#[command(
    name = "cert_scraper",
    about = "Collect certification document links from paginated listings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl listing pages until the no-results marker and write documents as JSON
    Run {
        /// Listing URL per site section; `{page}` marks the page number
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,
        /// First page number
        #[arg(long, default_value = "1")]
        start_page: u32,
        /// Max pages per section (default: until no results)
        #[arg(short = 'n', long)]
        max_pages: Option<u32>,
        /// Abandon a section after this many pages in a row without extracted items (0: never)
        #[arg(long, default_value_t = run::DEFAULT_MAX_EMPTY_PAGES)]
        max_empty_pages: u32,
        /// Output JSON file
        #[arg(short, long, default_value = "documents.json")]
        output: PathBuf,
        /// Crawl sections concurrently
        #[arg(long)]
        parallel: bool,
        #[command(flatten)]
        extraction: ExtractionArgs,
    },
    /// Extract documents from one page and print them
    Page {
        /// Page URL
        url: String,
        #[command(flatten)]
        extraction: ExtractionArgs,
    },
}

#[derive(Args)]
struct ExtractionArgs {
    /// CSS selector for the region holding the document links
    #[arg(short, long, default_value = "body")]
    css_selector: String,
    /// Text that marks the end of the result list
    #[arg(long, default_value = terminator::DEFAULT_MARKER)]
    marker: String,
    /// Extraction task; `{base_url}` is replaced with the page's base URL
    #[arg(long)]
    instruction: Option<String>,
}

impl ExtractionArgs {
    fn pipeline_config(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            css_selector: self.css_selector,
            no_results_marker: self.marker,
            task: self.instruction.unwrap_or(defaults.task),
            required_fields: defaults.required_fields,
        }
    }
}

fn build_pipeline(cfg: &AppConfig, pipeline_config: PipelineConfig) -> Result<PageExtractionPipeline> {
    let fetcher: Arc<dyn Fetcher> = match &cfg.credentials.spider_api_key {
        Some(key) => {
            info!("Fetching pages via spider.cloud");
            Arc::new(SpiderFetcher::new(key.clone())?)
        }
        None => {
            info!("{} not set, fetching pages over plain HTTP", config::SPIDER_API_KEY);
            Arc::new(HttpFetcher::new(cfg.settings.timeout())?)
        }
    };
    let extractor: Arc<dyn Extractor> = Arc::new(GroqExtractor::new(
        cfg.credentials.groq_api_key.clone(),
        &cfg.settings.api_base,
        &cfg.settings.model,
        cfg.settings.timeout(),
    )?);
    Ok(PageExtractionPipeline::new(fetcher, extractor, pipeline_config))
}

/// Load configuration, build the pipeline from it, then crawl every section.
/// A configuration error returns before the pipeline exists.
async fn crawl(
    load: impl FnOnce() -> Result<AppConfig, ConfigError>,
    build: impl FnOnce(&AppConfig) -> Result<PageExtractionPipeline>,
    urls: &[String],
    options: RunOptions,
    parallel: bool,
    progress: &ProgressBar,
) -> Result<(Vec<DocumentRecord>, RunReport)> {
    let cfg = load()?;
    info!(model = %cfg.settings.model, "Configuration loaded");
    let pipeline = Arc::new(build(&cfg)?);
    run::run_sections(pipeline, urls, options, parallel, progress).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            urls,
            start_page,
            max_pages,
            max_empty_pages,
            output,
            parallel,
            extraction,
        } => {
            let options = RunOptions {
                start_page,
                max_pages,
                max_empty_pages,
            };

            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} pages  {msg}")?,
            );
            pb.enable_steady_tick(Duration::from_millis(120));

            let (records, report) = crawl(
                AppConfig::from_env,
                |cfg| build_pipeline(cfg, extraction.pipeline_config()),
                &urls,
                options,
                parallel,
                &pb,
            )
            .await?;
            pb.finish_and_clear();

            run::write_output(&output, &records)?;
            println!("Done: {}", report.summary());
            println!("Saved {} documents to {}", records.len(), output.display());
        }
        Commands::Page { url, extraction } => {
            let cfg = AppConfig::from_env()?;
            info!(model = %cfg.settings.model, "Configuration loaded");
            let pipeline = build_pipeline(&cfg, extraction.pipeline_config())?;
            let mut seen = SeenNames::new();
            let outcome = pipeline.process_page(&url, "single", &mut seen).await;

            match &outcome.failure {
                Some(PageFailure::Fetch(e)) => println!("Fetch failed: {}", e.message),
                Some(PageFailure::Extraction(e)) => println!("Extraction failed: {}", e),
                None => {}
            }
            println!("{}", serde_json::to_string_pretty(&outcome.records)?);
            println!(
                "{} documents, more pages: {}",
                outcome.records.len(),
                outcome.more_pages
            );
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
