#![forbid(unsafe_code)]

//! wbi request signing.
//!
//! Anonymous calls to the space API must carry a `wts` timestamp and a
//! `w_rid` digest. The digest is salted with a "mixin key" derived from two
//! key fragments that the navigation endpoint publishes as image file names
//! and rotates periodically, so keys are fetched once at the start of a run.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use md5::{Digest, Md5};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::client::JsonFetcher;

pub const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";
const NAV_REFERER: &str = "https://www.bilibili.com/";

/// Character order used to derive the mixin key. Server-side constant.
pub const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

pub const MIXIN_KEY_LEN: usize = 32;

/// Removed from every value before the query is hashed.
const STRIPPED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

/// Matches Python's `quote_plus`: alphanumerics and `-._~` pass through, the
/// space is turned into `+` afterwards.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b' ');

/// Parameter name to stringified value, kept sorted by key.
pub type RequestParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub img_key: String,
    pub sub_key: String,
}

impl KeyPair {
    pub fn mixin_key(&self) -> String {
        mix_key(&self.img_key, &self.sub_key)
    }
}

/// Fetches the current key pair from the navigation endpoint.
pub fn fetch_keys(fetcher: &dyn JsonFetcher, user_agent: &str) -> Result<KeyPair> {
    let nav = fetcher
        .get_json(NAV_URL, &[("User-Agent", user_agent), ("Referer", NAV_REFERER)])
        .context("fetching wbi keys")?;
    keys_from_nav(&nav)
}

pub fn keys_from_nav(nav: &Value) -> Result<KeyPair> {
    let wbi_img = nav
        .pointer("/data/wbi_img")
        .context("navigation response has no data.wbi_img")?;
    let img_url = wbi_img
        .get("img_url")
        .and_then(Value::as_str)
        .context("navigation response has no img_url")?;
    let sub_url = wbi_img
        .get("sub_url")
        .and_then(Value::as_str)
        .context("navigation response has no sub_url")?;

    let img_key = key_from_url(img_url);
    let sub_key = key_from_url(sub_url);
    if img_key.is_empty() || sub_key.is_empty() {
        bail!("could not extract wbi keys from {img_url} and {sub_url}");
    }
    Ok(KeyPair {
        img_key: img_key.to_string(),
        sub_key: sub_key.to_string(),
    })
}

/// `https://i0.hdslb.com/bfs/wbi/7cd0...077c.png` -> `7cd0...077c`
fn key_from_url(url: &str) -> &str {
    let file_name = url.rsplit('/').next().unwrap_or(url);
    file_name.split('.').next().unwrap_or(file_name)
}

/// Permutes `img_key + sub_key` through [`MIXIN_KEY_ENC_TAB`] and keeps the
/// first 32 characters. Table positions past the end of a short input are
/// skipped.
pub fn mix_key(img_key: &str, sub_key: &str) -> String {
    let raw: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&index| raw.get(index))
        .take(MIXIN_KEY_LEN)
        .collect()
}

/// Signs `params` with the current Unix time.
pub fn sign(params: RequestParams, keys: &KeyPair) -> RequestParams {
    sign_at(params, keys, Utc::now().timestamp())
}

/// Signs `params` as if the request were made at `wts` (Unix seconds).
pub fn sign_at(params: RequestParams, keys: &KeyPair, wts: i64) -> RequestParams {
    let mixin_key = keys.mixin_key();
    let mut signed: RequestParams = params
        .into_iter()
        .map(|(key, value)| (key, strip_value(&value)))
        .collect();
    signed.insert("wts".to_string(), wts.to_string());

    let query = encode_query(&signed);
    let digest = Md5::digest(format!("{query}{mixin_key}").as_bytes());
    signed.insert("w_rid".to_string(), format!("{digest:x}"));
    signed
}

fn strip_value(value: &str) -> String {
    value.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect()
}

/// Serializes params as `application/x-www-form-urlencoded`, in map order.
pub fn encode_query(params: &RequestParams) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_COMPONENT)
        .to_string()
        .replace(' ', "+")
}
