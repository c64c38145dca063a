#![forbid(unsafe_code)]

//! Command-line entry point: scrape a user's uploads into the spreadsheet and
//! download whatever is not on disk yet.
//!
//! Run modes, in order of evaluation:
//! * `--clean-subfolders` wipes leftover folders in the download directory.
//! * `--download-switch false` only scrapes and writes the spreadsheet.
//! * `--check-downloaded false` re-scrapes, overwrites the spreadsheet, then
//!   downloads.
//! * otherwise the existing spreadsheet is trusted (scraped only when absent)
//!   and missing ids are downloaded.

use anyhow::{Context, Result};
use bup_scan_tools::cleanup::clean_subfolders;
use bup_scan_tools::client::{JsonFetcher, UreqFetcher};
use bup_scan_tools::config::{ConfigOverrides, ScrapeConfig, resolve_config};
use bup_scan_tools::downloads::{Downloader, download_all, partition_downloaded};
use bup_scan_tools::listing::{VideoRecord, fetch_videos};
use bup_scan_tools::spreadsheet::{read_bvids, write_records};
use bup_scan_tools::user_agent::{UserAgentSource, user_agent_source};
use clap::Parser;
use clap::builder::BoolishValueParser;
use env_logger::Env;
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "scan_uploads",
    about = "Scrape a bilibili user's uploads and download the missing ones"
)]
struct Cli {
    /// Env file with BUP_* defaults.
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Spreadsheet (CSV) holding the scraped metadata.
    #[arg(long)]
    spreadsheet_path: Option<PathBuf>,
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Trust the existing spreadsheet instead of re-scraping.
    #[arg(long, value_parser = BoolishValueParser::new())]
    check_downloaded: Option<bool>,
    #[arg(long, value_parser = BoolishValueParser::new())]
    use_random_ua: Option<bool>,
    /// Remove subfolders of the download directory before starting.
    #[arg(long, value_parser = BoolishValueParser::new())]
    clean_subfolders: Option<bool>,
    /// Set to false to scrape metadata without downloading.
    #[arg(long, value_parser = BoolishValueParser::new())]
    download_switch: Option<bool>,
    /// Only keep uploads created on or after this date (YYYY-MM-DD).
    #[arg(long)]
    start_date: Option<String>,
    /// bilibili user id.
    #[arg(long)]
    mid: Option<String>,
    /// Seconds to wait between page requests.
    #[arg(long)]
    delay: Option<f64>,
    #[arg(long)]
    start_page: Option<u32>,
    #[arg(long)]
    max_pages: Option<u32>,
    /// Concurrent downloader processes.
    #[arg(long)]
    max_workers: Option<usize>,
    /// Session cookie sent with listing requests.
    #[arg(long)]
    cookie: Option<String>,
    /// Downloader executable.
    #[arg(long)]
    downloader: Option<PathBuf>,
}

impl Cli {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            spreadsheet_path: self.spreadsheet_path,
            download_dir: self.download_dir,
            check_downloaded: self.check_downloaded,
            use_random_ua: self.use_random_ua,
            clean_subfolders: self.clean_subfolders,
            download_switch: self.download_switch,
            start_date: self.start_date,
            mid: self.mid,
            delay: self.delay,
            start_page: self.start_page,
            max_pages: self.max_pages,
            max_workers: self.max_workers,
            cookie: self.cookie,
            downloader: self.downloader,
            env_path: self.env_file,
        }
    }
}

/// Collaborators shared by every step of a run.
#[derive(Clone)]
struct Services {
    fetcher: Arc<dyn JsonFetcher>,
    user_agents: Arc<dyn UserAgentSource>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = resolve_config(Cli::parse().into_overrides())?;
    let services = Services {
        fetcher: Arc::new(UreqFetcher::new()),
        user_agents: Arc::from(user_agent_source(config.use_random_ua)),
    };
    run(&config, &services).await
}

async fn run(config: &ScrapeConfig, services: &Services) -> Result<()> {
    info!("user id: {}", config.mid);
    info!("spreadsheet: {}", config.spreadsheet_path.display());
    info!("download directory: {}", config.download_dir.display());

    if config.clean_subfolders {
        let removed = clean_subfolders(&config.download_dir)?;
        info!("removed {} subfolders", removed.len());
    }

    if !config.download_switch {
        return scrape_and_save(config, services).await;
    }
    if !config.check_downloaded {
        scrape_and_save(config, services).await?;
    }
    check_and_download(config, services).await
}

/// Runs the blocking scrape off the async runtime.
async fn scrape(config: &ScrapeConfig, services: &Services) -> Result<Vec<VideoRecord>> {
    let config = config.clone();
    let services = services.clone();
    tokio::task::spawn_blocking(move || {
        fetch_videos(&*services.fetcher, &*services.user_agents, &config)
    })
    .await
    .context("scrape task failed")
}

async fn scrape_and_save(config: &ScrapeConfig, services: &Services) -> Result<()> {
    let videos = scrape(config, services).await?;
    if videos.is_empty() && config.spreadsheet_path.exists() {
        warn!(
            "scrape returned no videos, keeping existing {}",
            config.spreadsheet_path.display()
        );
        return Ok(());
    }
    write_records(&config.spreadsheet_path, &videos)?;
    info!(
        "saved {} videos to {}",
        videos.len(),
        config.spreadsheet_path.display()
    );
    Ok(())
}

async fn check_and_download(config: &ScrapeConfig, services: &Services) -> Result<()> {
    if !config.spreadsheet_path.exists() {
        info!(
            "{} does not exist, scraping first",
            config.spreadsheet_path.display()
        );
        scrape_and_save(config, services).await?;
    }

    let bvids = read_bvids(&config.spreadsheet_path)?;
    info!(
        "read {} ids from {}",
        bvids.len(),
        config.spreadsheet_path.display()
    );

    let status = partition_downloaded(&bvids, &config.download_dir)?;
    info!("already downloaded: {}", status.existing.len());
    info!("missing: {}", status.missing.len());
    if status.missing.is_empty() {
        return Ok(());
    }
    info!("missing ids: {}", status.missing.join(", "));

    fs::create_dir_all(&config.download_dir)
        .with_context(|| format!("creating {}", config.download_dir.display()))?;
    let downloader = Arc::new(Downloader::new(
        config.downloader.clone(),
        config.download_dir.clone(),
        Arc::clone(&services.user_agents),
    ));
    let summary = download_all(downloader, status.missing, config.max_workers).await;
    info!(
        "downloads finished: {} succeeded, {} failed",
        summary.succeeded.len(),
        summary.failed.len()
    );
    if !summary.failed.is_empty() {
        warn!("failed ids: {}", summary.failed.join(", "));
    }
    Ok(())
}
