#![forbid(unsafe_code)]

//! Thin HTTP layer. Everything that talks to the API goes through
//! [`JsonFetcher`] so the signer and paginator can be driven by canned
//! responses in tests.

use anyhow::{Context, Result};
use serde_json::Value;

/// A single request header, e.g. `("User-Agent", "...")`.
pub type Header<'a> = (&'a str, &'a str);

pub trait JsonFetcher: Send + Sync {
    /// Issues a GET request and decodes the body as JSON. Non-success
    /// statuses are errors.
    fn get_json(&self, url: &str, headers: &[Header<'_>]) -> Result<Value>;
}

/// Production fetcher backed by a shared `ureq` agent.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new(),
        }
    }
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFetcher for UreqFetcher {
    fn get_json(&self, url: &str, headers: &[Header<'_>]) -> Result<Value> {
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        let response = request
            .call()
            .with_context(|| format!("requesting {}", strip_query(url)))?;
        response
            .into_json::<Value>()
            .with_context(|| format!("decoding JSON from {}", strip_query(url)))
    }
}

/// Signed URLs are noisy; error messages only need the endpoint.
fn strip_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_query_keeps_endpoint() {
        assert_eq!(
            strip_query("https://api.bilibili.com/x/space/wbi/arc/search?mid=1&w_rid=abc"),
            "https://api.bilibili.com/x/space/wbi/arc/search"
        );
        assert_eq!(strip_query("https://example.com/nav"), "https://example.com/nav");
    }
}
