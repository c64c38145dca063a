#![forbid(unsafe_code)]

//! Paginated scrape of a user's uploads from the space search endpoint.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, TimeZone};
use log::{debug, error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::client::JsonFetcher;
use crate::config::ScrapeConfig;
use crate::user_agent::UserAgentSource;
use crate::wbi::{self, KeyPair, RequestParams};

pub const SEARCH_URL: &str = "https://api.bilibili.com/x/space/wbi/arc/search";
pub const PAGE_SIZE: u32 = 50;
const SEARCH_REFERER: &str = "https://message.bilibili.com/";

/// One upload as returned by the listing API. Field order is also the
/// spreadsheet column order.
///
/// Only `bvid` and `created` are required. Counts the API hides (`"--"`) read
/// as 0 and `null` text reads as empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub play: i64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub comment: i64,
    #[serde(default, deserialize_with = "lenient_text")]
    pub author: String,
    /// Unix seconds.
    pub created: i64,
    #[serde(default, deserialize_with = "lenient_text")]
    pub length: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub video_review: i64,
    pub bvid: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub aid: i64,
    #[serde(default, deserialize_with = "lenient_text")]
    pub pic: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub mid: i64,
}

fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct PageOptions {
    pub mid: String,
    pub start_page: u32,
    pub max_pages: u32,
    pub delay: Duration,
    /// Keep only rows created at or after this Unix timestamp.
    pub since: Option<i64>,
    pub cookie: Option<String>,
}

impl PageOptions {
    pub fn from_config(config: &ScrapeConfig, since: Option<i64>) -> Self {
        Self {
            mid: config.mid.clone(),
            start_page: config.start_page,
            max_pages: config.max_pages,
            delay: config.delay,
            since,
            cookie: config.cookie.clone(),
        }
    }

    fn end_page(&self) -> u32 {
        self.start_page.saturating_add(self.max_pages)
    }
}

/// Walks the listing one page at a time. Each [`Paginator::run`] call starts
/// over from `start_page`.
pub struct Paginator<'a> {
    fetcher: &'a dyn JsonFetcher,
    user_agents: &'a dyn UserAgentSource,
    keys: KeyPair,
    options: PageOptions,
}

impl<'a> Paginator<'a> {
    pub fn new(
        fetcher: &'a dyn JsonFetcher,
        user_agents: &'a dyn UserAgentSource,
        keys: KeyPair,
        options: PageOptions,
    ) -> Self {
        Self {
            fetcher,
            user_agents,
            keys,
            options,
        }
    }

    pub fn run(&self) -> Vec<VideoRecord> {
        let mut videos = Vec::new();
        let mut page = self.options.start_page;

        while page < self.options.end_page() {
            let signed = wbi::sign(page_params(&self.options.mid, page), &self.keys);
            let url = format!("{SEARCH_URL}?{}", wbi::encode_query(&signed));

            let response = match self.fetch_page(&url) {
                Ok(response) => response,
                Err(err) => {
                    error!("request for page {page} failed: {err:#}");
                    break;
                }
            };

            let Some(rows) = listing_rows(&response) else {
                debug!("page {page} has no listing, stopping");
                break;
            };

            let before = videos.len();
            videos.extend(
                rows.iter()
                    .filter_map(decode_row)
                    .filter(|video| keep_row(video.created, self.options.since)),
            );
            info!(
                "page {page}: {} rows, {} kept",
                rows.len(),
                videos.len() - before
            );

            page += 1;
            if !self.options.delay.is_zero() {
                thread::sleep(self.options.delay);
            }
        }

        videos
    }

    fn fetch_page(&self, url: &str) -> Result<Value> {
        let user_agent = self.user_agents.user_agent();
        let mut headers = vec![("User-Agent", user_agent.as_str()), ("Referer", SEARCH_REFERER)];
        if let Some(cookie) = self.options.cookie.as_deref() {
            headers.push(("Cookie", cookie));
        }
        self.fetcher.get_json(url, &headers)
    }
}

/// Fixed query for one page of `mid`'s uploads, newest first.
pub fn page_params(mid: &str, page: u32) -> RequestParams {
    [
        ("mid", mid.to_string()),
        ("ps", PAGE_SIZE.to_string()),
        ("tid", "0".to_string()),
        ("pn", page.to_string()),
        ("order", "pubdate".to_string()),
        ("platform", "web".to_string()),
        ("web_location", "1550101".to_string()),
        ("order_avoided", "true".to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

/// Returns `data.list.vlist`, or `None` once the listing is missing or empty.
pub fn listing_rows(response: &Value) -> Option<&[Value]> {
    response
        .pointer("/data/list/vlist")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .filter(|rows| !rows.is_empty())
}

fn decode_row(row: &Value) -> Option<VideoRecord> {
    match VideoRecord::deserialize(row) {
        Ok(video) => Some(video),
        Err(err) => {
            let bvid = row.get("bvid").and_then(Value::as_str).unwrap_or("?");
            warn!("skipping listing row {bvid}: {err}");
            None
        }
    }
}

pub fn keep_row(created: i64, since: Option<i64>) -> bool {
    since.is_none_or(|since| created >= since)
}

/// Local midnight of a `YYYY-MM-DD` date, as Unix seconds.
pub fn parse_start_date(value: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid start date {value:?}, expected YYYY-MM-DD"))?;
    let midnight = date.and_hms_opt(0, 0, 0).context("invalid start date")?;
    let local = Local
        .from_local_datetime(&midnight)
        .earliest()
        .with_context(|| format!("start date {value} does not exist in the local time zone"))?;
    Ok(local.timestamp())
}

/// Full scrape for `config.mid`. Key or date-filter problems are logged and
/// yield no records; a failed page ends the scrape with what was collected.
pub fn fetch_videos(
    fetcher: &dyn JsonFetcher,
    user_agents: &dyn UserAgentSource,
    config: &ScrapeConfig,
) -> Vec<VideoRecord> {
    let keys = match wbi::fetch_keys(fetcher, &user_agents.user_agent()) {
        Ok(keys) => keys,
        Err(err) => {
            error!("could not obtain wbi keys, aborting scrape: {err:#}");
            return Vec::new();
        }
    };

    let since = match config.start_date.as_deref().map(parse_start_date).transpose() {
        Ok(since) => since,
        Err(err) => {
            error!("{err:#}");
            return Vec::new();
        }
    };

    info!(
        "scraping uploads of {} from page {} (max {} pages)",
        config.mid, config.start_page, config.max_pages
    );
    let videos = Paginator::new(
        fetcher,
        user_agents,
        keys,
        PageOptions::from_config(config, since),
    )
    .run();
    info!("collected {} videos", videos.len());
    videos
}
