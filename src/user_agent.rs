#![forbid(unsafe_code)]

//! User-Agent strings sent to the API and handed to the downloader.

use rand_core::{OsRng, RngCore};

pub const BASE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

pub trait UserAgentSource: Send + Sync {
    fn user_agent(&self) -> String;
}

/// Always returns the same string.
#[derive(Debug, Clone)]
pub struct FixedUserAgent(pub String);

impl Default for FixedUserAgent {
    fn default() -> Self {
        Self(BASE_USER_AGENT.to_string())
    }
}

impl UserAgentSource for FixedUserAgent {
    fn user_agent(&self) -> String {
        self.0.clone()
    }
}

/// Varies the last component of the Chrome build number (`127.0.0.0`-`127.0.0.3`)
/// on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUserAgent;

impl UserAgentSource for RandomUserAgent {
    fn user_agent(&self) -> String {
        chrome_user_agent(OsRng.next_u32() % 4)
    }
}

pub fn chrome_user_agent(patch: u32) -> String {
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.{patch} Safari/537.36"
    )
}

pub fn user_agent_source(randomize: bool) -> Box<dyn UserAgentSource> {
    if randomize {
        Box::new(RandomUserAgent)
    } else {
        Box::new(FixedUserAgent::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_matches_base_string() {
        let source = user_agent_source(false);
        assert_eq!(source.user_agent(), BASE_USER_AGENT);
        assert_eq!(chrome_user_agent(0), BASE_USER_AGENT);
    }

    #[test]
    fn random_source_stays_within_known_builds() {
        let known: Vec<String> = (0..4).map(chrome_user_agent).collect();
        let source = user_agent_source(true);
        for _ in 0..32 {
            let agent = source.user_agent();
            assert!(known.contains(&agent), "unexpected user agent {agent}");
        }
    }
}
