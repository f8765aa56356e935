//! Extraction host interface.
//!
//! The extraction engine drives pages through two traits:
//!
//! - [`SessionProvider`]: opens one [`BrowserSession`] per job, configured with a
//!   [`ClientIdentity`]
//! - [`BrowserSession`]: navigate, wait for a selector, query elements, scroll, close
//!
//! Sessions are never shared between targets. The engine closes every session it
//! opens, whatever the outcome.
//!
//! [`http`] provides the production host (direct fetch or a render service).

pub mod http;

use crate::error::BrowserError;
use crate::models::Target;
use rand::{Rng, rng};
use std::time::Duration;

/// Desktop user agents rotated per session.
pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

const BASE_HEADERS: [(&str, &str); 2] = [
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.9"),
];

// Client hints a regular Chromium sends; headless clients usually omit them.
const STEALTH_HEADERS: [(&str, &str); 5] = [
    ("sec-ch-ua", "\"Chromium\";v=\"120\", \"Not_A Brand\";v=\"24\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("upgrade-insecure-requests", "1"),
    ("referer", "https://www.google.com/"),
];

/// How a session presents itself to the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_agent: &'static str,
    /// Lowercase header names.
    pub headers: Vec<(&'static str, &'static str)>,
    /// Ask the host to suppress automation signals (webdriver flag, empty
    /// plugin and language lists) where it is able to.
    pub stealth: bool,
}

impl ClientIdentity {
    /// Identity for one job against `target`, with a randomly rotated user agent.
    pub fn for_target(target: &Target) -> Self {
        let user_agent = USER_AGENTS[rng().random_range(0..USER_AGENTS.len())];
        let mut headers = BASE_HEADERS.to_vec();
        if target.stealth {
            headers.extend_from_slice(&STEALTH_HEADERS);
        }
        Self {
            user_agent,
            headers,
            stealth: target.stealth,
        }
    }
}

/// Snapshot of one matched DOM element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Trimmed text content with whitespace runs collapsed.
    pub text: String,
    /// The element's own `href`, or that of the nearest enclosing or contained anchor.
    pub href: Option<String>,
    /// Machine-readable `datetime` attribute, if present.
    pub datetime: Option<String>,
}

/// Opens browser sessions.
pub trait SessionProvider {
    type Session: BrowserSession;

    async fn open(&self, identity: &ClientIdentity) -> Result<Self::Session, BrowserError>;
}

/// One page, owned by one job.
pub trait BrowserSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Resolves once `selector` matches, or fails after `timeout`.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Element>, BrowserError>;

    /// Scroll the viewport by `step` pixels.
    async fn scroll_by(&mut self, step: i64) -> Result<(), BrowserError>;

    /// URL of the loaded document after redirects.
    fn current_url(&self) -> Option<&str>;

    async fn close(self) -> Result<(), BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn target(stealth: bool) -> Target {
        Target {
            stealth,
            ..Target::fixture("Reuters Business", Category::Business)
        }
    }

    #[test]
    fn test_identity_uses_pool_and_base_headers() {
        let identity = ClientIdentity::for_target(&target(false));
        assert!(USER_AGENTS.contains(&identity.user_agent));
        assert!(identity.headers.iter().any(|(k, _)| *k == "accept-language"));
        assert!(!identity.headers.iter().any(|(k, _)| *k == "referer"));
        assert!(!identity.stealth);
    }

    #[test]
    fn test_stealth_identity_adds_client_hints() {
        let identity = ClientIdentity::for_target(&target(true));
        assert!(identity.stealth);
        assert!(identity.headers.iter().any(|(k, _)| *k == "sec-ch-ua"));
        assert_eq!(identity.headers.len(), BASE_HEADERS.len() + STEALTH_HEADERS.len());
    }
}
