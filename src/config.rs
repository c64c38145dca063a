#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use log::warn;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_SPREADSHEET_PATH: &str = "bilibili_videos.csv";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_MID: &str = "356010767";
pub const DEFAULT_DELAY_SECS: f64 = 0.5;
pub const DEFAULT_START_PAGE: u32 = 1;
pub const DEFAULT_MAX_PAGES: u32 = 100;
pub const DEFAULT_MAX_WORKERS: usize = 2;
pub const DEFAULT_DOWNLOADER: &str = "BBDown";

/// Everything a single scrape-and-download run needs. Built once at startup
/// and handed around by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeConfig {
    pub spreadsheet_path: PathBuf,
    pub download_dir: PathBuf,
    pub check_downloaded: bool,
    pub use_random_ua: bool,
    pub clean_subfolders: bool,
    pub download_switch: bool,
    /// Raw `YYYY-MM-DD` text; validated when the scrape starts.
    pub start_date: Option<String>,
    pub mid: String,
    pub delay: Duration,
    pub start_page: u32,
    pub max_pages: u32,
    pub max_workers: usize,
    pub cookie: Option<String>,
    pub downloader: PathBuf,
}

/// Values supplied on the command line. Anything left `None` falls through to
/// the environment, then the env file, then the built-in default.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub spreadsheet_path: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub check_downloaded: Option<bool>,
    pub use_random_ua: Option<bool>,
    pub clean_subfolders: Option<bool>,
    pub download_switch: Option<bool>,
    pub start_date: Option<String>,
    pub mid: Option<String>,
    pub delay: Option<f64>,
    pub start_page: Option<u32>,
    pub max_pages: Option<u32>,
    pub max_workers: Option<usize>,
    pub cookie: Option<String>,
    pub downloader: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<ScrapeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ScrapeConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<ScrapeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let spreadsheet_path = overrides
        .spreadsheet_path
        .or_else(|| lookup("BUP_SPREADSHEET_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SPREADSHEET_PATH));
    let download_dir = overrides
        .download_dir
        .or_else(|| lookup("BUP_DOWNLOAD_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));
    let check_downloaded = overrides
        .check_downloaded
        .or_else(|| lookup_parsed("BUP_CHECK_DOWNLOADED", &lookup, parse_bool))
        .unwrap_or(true);
    let use_random_ua = overrides
        .use_random_ua
        .or_else(|| lookup_parsed("BUP_RANDOM_UA", &lookup, parse_bool))
        .unwrap_or(true);
    let clean_subfolders = overrides
        .clean_subfolders
        .or_else(|| lookup_parsed("BUP_CLEAN_SUBFOLDERS", &lookup, parse_bool))
        .unwrap_or(true);
    let download_switch = overrides
        .download_switch
        .or_else(|| lookup_parsed("BUP_DOWNLOAD", &lookup, parse_bool))
        .unwrap_or(true);
    let start_date = non_blank(overrides.start_date).or_else(|| lookup("BUP_START_DATE"));
    let mid = non_blank(overrides.mid)
        .or_else(|| lookup("BUP_MID"))
        .unwrap_or_else(|| DEFAULT_MID.to_string());
    let delay_secs = overrides
        .delay
        .or_else(|| lookup_parsed("BUP_DELAY", &lookup, |value| value.parse().ok()))
        .unwrap_or(DEFAULT_DELAY_SECS);
    let delay = Duration::try_from_secs_f64(delay_secs)
        .with_context(|| format!("invalid request delay {delay_secs}"))?;
    let start_page = overrides
        .start_page
        .or_else(|| lookup_parsed("BUP_START_PAGE", &lookup, |value| value.parse().ok()))
        .unwrap_or(DEFAULT_START_PAGE);
    if start_page == 0 {
        bail!("start page must be 1 or greater");
    }
    let max_pages = overrides
        .max_pages
        .or_else(|| lookup_parsed("BUP_MAX_PAGES", &lookup, |value| value.parse().ok()))
        .unwrap_or(DEFAULT_MAX_PAGES);
    let max_workers = overrides
        .max_workers
        .or_else(|| lookup_parsed("BUP_MAX_WORKERS", &lookup, |value| value.parse().ok()))
        .unwrap_or(DEFAULT_MAX_WORKERS);
    if max_workers == 0 {
        bail!("max workers must be 1 or greater");
    }
    let cookie = non_blank(overrides.cookie).or_else(|| lookup("BUP_COOKIE"));
    let downloader = overrides
        .downloader
        .or_else(|| lookup("BUP_DOWNLOADER").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOADER));

    Ok(ScrapeConfig {
        spreadsheet_path,
        download_dir,
        check_downloaded,
        use_random_ua,
        clean_subfolders,
        download_switch,
        start_date,
        mid,
        delay,
        start_page,
        max_pages,
        max_workers,
        cookie,
        downloader,
    })
}

/// Accepts the usual spellings of a boolean switch.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn lookup_parsed<T>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!("ignoring unparsable value {raw:?} for {key}");
    }
    parsed
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
