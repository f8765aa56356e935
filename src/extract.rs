//! Extraction engine: drives one browser session over one target and returns
//! the candidate headlines it finds.
//!
//! Per job:
//!
//! 1. open a fresh session with a rotated [`ClientIdentity`]
//! 2. navigate, pause, run the target's scroll steps if any
//! 3. wait for the readiness selector (best-effort)
//! 4. read titles with the first title selector that matches, dates likewise
//! 5. pair them into [`RawItem`]s, capped at `max_items`
//!
//! The whole drive runs under `job_timeout`. The session is closed on every
//! path, including timeouts.

use crate::browser::{BrowserSession, ClientIdentity, Element, SessionProvider};
use crate::error::{BrowserError, ExtractionError};
use crate::models::{DynamicContent, RawItem, Target};
use rand::{Rng, rng};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Produces raw candidates for a target.
pub trait Extract {
    async fn extract(&self, target: &Target) -> Result<Vec<RawItem>, ExtractionError>;
}

/// Timing and size limits for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
    pub job_timeout: Duration,
    /// Pause after the last scroll step.
    pub settle_delay: Duration,
    /// Pause after navigation, doubled for stealth targets and jittered.
    pub navigation_pause: Duration,
    pub max_items: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            selector_timeout: Duration::from_secs(20),
            job_timeout: Duration::from_secs(180),
            settle_delay: Duration::from_secs(1),
            navigation_pause: Duration::from_secs(2),
            max_items: 20,
        }
    }
}

/// [`Extract`] implementation over any [`SessionProvider`].
pub struct Extractor<P> {
    provider: P,
    options: ExtractOptions,
}

impl<P: SessionProvider> Extractor<P> {
    pub fn new(provider: P, options: ExtractOptions) -> Self {
        Self { provider, options }
    }

    async fn drive(
        &self,
        session: &mut P::Session,
        target: &Target,
    ) -> Result<Vec<RawItem>, BrowserError> {
        let nav_timeout = target
            .navigation_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.options.navigation_timeout);
        session.navigate(&target.url, nav_timeout).await?;
        self.pause_after_navigation(target.stealth).await;

        if let Some(dynamic) = &target.dynamic_content {
            scroll(&mut *session, dynamic).await;
            sleep(self.options.settle_delay).await;
        }

        if let Some(selector) = &target.wait_for_selector {
            match session
                .wait_for_selector(selector, self.options.selector_timeout)
                .await
            {
                Ok(()) => debug!(selector = %selector, "Readiness selector present"),
                Err(e) => {
                    warn!(selector = %selector, error = %e, "Readiness selector missing; extracting anyway")
                }
            }
        }

        let titles = first_match(&*session, &target.title_selectors).await;
        let dates = first_match(&*session, &target.date_selectors).await;
        let page_url = session
            .current_url()
            .unwrap_or(target.url.as_str())
            .to_string();

        let items = build_raw_items(target, &page_url, titles, &dates, self.options.max_items);
        info!(candidates = items.len(), dates = dates.len(), "Read candidates from page");
        Ok(items)
    }

    async fn pause_after_navigation(&self, stealth: bool) {
        let base = self.options.navigation_pause;
        if base.is_zero() {
            return;
        }
        let base = if stealth { base * 2 } else { base };
        let jitter_ms = rng().random_range(0..=base.as_millis() as u64 / 2);
        sleep(base + Duration::from_millis(jitter_ms)).await;
    }
}

impl<P: SessionProvider> Extract for Extractor<P> {
    #[instrument(level = "info", skip_all, fields(target = %target.name, url = %target.url))]
    async fn extract(&self, target: &Target) -> Result<Vec<RawItem>, ExtractionError> {
        let identity = ClientIdentity::for_target(target);
        debug!(user_agent = identity.user_agent, stealth = identity.stealth, "Opening session");
        let mut session = self
            .provider
            .open(&identity)
            .await
            .map_err(|e| ExtractionError::new(&target.name, e))?;

        let outcome = match timeout(self.options.job_timeout, self.drive(&mut session, target)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(BrowserError::Timeout {
                what: "extraction".to_string(),
                after: self.options.job_timeout,
            }),
        };

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close session");
        }

        outcome.map_err(|e| ExtractionError::new(&target.name, e))
    }
}

async fn scroll<S: BrowserSession>(session: &mut S, dynamic: &DynamicContent) {
    for step in 0..dynamic.scroll_count {
        if let Err(e) = session.scroll_by(dynamic.scroll_step).await {
            warn!(step, error = %e, "Scrolling failed; continuing with what is loaded");
            return;
        }
        sleep(Duration::from_millis(dynamic.scroll_delay_ms)).await;
    }
    debug!(steps = dynamic.scroll_count, "Finished scrolling");
}

/// Elements for the first selector with at least one match. Results from
/// different selectors are never merged.
async fn first_match<S: BrowserSession>(session: &S, selectors: &[String]) -> Vec<Element> {
    for selector in selectors {
        match session.query_all(selector).await {
            Ok(found) if !found.is_empty() => {
                debug!(selector = %selector, count = found.len(), "Selector matched");
                return found;
            }
            Ok(_) => debug!(selector = %selector, "Selector matched nothing"),
            Err(e) => warn!(selector = %selector, error = %e, "Selector query failed"),
        }
    }
    Vec::new()
}

/// Pair title elements with date elements by position.
///
/// A title without a positional date falls back to the first date element.
/// Titles with empty text are dropped after the cap is applied.
fn build_raw_items(
    target: &Target,
    page_url: &str,
    titles: Vec<Element>,
    dates: &[Element],
    max_items: usize,
) -> Vec<RawItem> {
    let base = Url::parse(page_url).ok();
    titles
        .into_iter()
        .take(max_items)
        .enumerate()
        .filter(|(_, el)| !el.text.is_empty())
        .map(|(i, el)| RawItem {
            url: resolve_href(base.as_ref(), el.href.as_deref(), page_url),
            raw_date: dates.get(i).or(dates.first()).map(date_text).unwrap_or_default(),
            title: el.text,
            source_name: target.name.clone(),
            category: target.category,
        })
        .collect()
}

fn date_text(el: &Element) -> String {
    match el.datetime.as_deref().map(str::trim) {
        Some(dt) if !dt.is_empty() => dt.to_string(),
        _ => el.text.clone(),
    }
}

/// Absolute http(s) URL for `href`, or the page URL when there is none.
fn resolve_href(base: Option<&Url>, href: Option<&str>, page_url: &str) -> String {
    let joined = match (base, href.map(str::trim)) {
        (Some(base), Some(href)) if !href.is_empty() => base.join(href).ok(),
        (None, Some(href)) => Url::parse(href).ok(),
        _ => None,
    };
    match joined {
        Some(url) if matches!(url.scheme(), "http" | "https") => url.to_string(),
        _ => page_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::http::HttpSessionProvider;
    use crate::models::Category;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
        scrolls: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct FakePage {
        elements: HashMap<String, Vec<Element>>,
        fail_navigation: bool,
        hang_navigation: bool,
        counters: Arc<Counters>,
    }

    struct FakeProvider(FakePage);

    struct FakeSession {
        page: FakePage,
        url: Option<String>,
    }

    impl SessionProvider for FakeProvider {
        type Session = FakeSession;

        async fn open(&self, _identity: &ClientIdentity) -> Result<FakeSession, BrowserError> {
            self.0.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                page: self.0.clone(),
                url: None,
            })
        }
    }

    impl BrowserSession for FakeSession {
        async fn navigate(&mut self, url: &str, after: Duration) -> Result<(), BrowserError> {
            if self.page.hang_navigation {
                sleep(Duration::from_secs(60)).await;
            }
            if self.page.fail_navigation {
                return Err(BrowserError::Timeout {
                    what: format!("navigation to {url}"),
                    after,
                });
            }
            self.url = Some(url.to_string());
            Ok(())
        }

        async fn wait_for_selector(&mut self, selector: &str, after: Duration) -> Result<(), BrowserError> {
            if self.page.elements.contains_key(selector) {
                Ok(())
            } else {
                Err(BrowserError::Timeout {
                    what: selector.to_string(),
                    after,
                })
            }
        }

        async fn query_all(&self, selector: &str) -> Result<Vec<Element>, BrowserError> {
            if selector == "broken[" {
                return Err(BrowserError::Selector(selector.to_string()));
            }
            Ok(self.page.elements.get(selector).cloned().unwrap_or_default())
        }

        async fn scroll_by(&mut self, _step: i64) -> Result<(), BrowserError> {
            self.page.counters.scrolls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn current_url(&self) -> Option<&str> {
            self.url.as_deref()
        }

        async fn close(self) -> Result<(), BrowserError> {
            self.page.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn el(text: &str, href: Option<&str>) -> Element {
        Element {
            text: text.to_string(),
            href: href.map(str::to_string),
            datetime: None,
        }
    }

    fn quick() -> ExtractOptions {
        ExtractOptions {
            navigation_timeout: Duration::from_secs(5),
            selector_timeout: Duration::from_millis(10),
            job_timeout: Duration::from_secs(5),
            settle_delay: Duration::ZERO,
            navigation_pause: Duration::ZERO,
            max_items: 20,
        }
    }

    fn page(entries: &[(&str, Vec<Element>)]) -> FakePage {
        FakePage {
            elements: entries
                .iter()
                .map(|(sel, els)| (sel.to_string(), els.clone()))
                .collect(),
            ..FakePage::default()
        }
    }

    fn target(titles: &[&str], dates: &[&str]) -> Target {
        Target {
            title_selectors: titles.iter().map(|s| s.to_string()).collect(),
            date_selectors: dates.iter().map(|s| s.to_string()).collect(),
            ..Target::fixture("FCA (UK)", Category::Regulatory)
        }
    }

    #[tokio::test]
    async fn test_first_matching_selector_wins() {
        let fake = page(&[
            ("h2", vec![el("First headline from h2", Some("/a"))]),
            ("a", vec![el("anchor one", None), el("anchor two", None)]),
        ]);
        let extractor = Extractor::new(FakeProvider(fake), quick());
        let items = extractor
            .extract(&target(&[".missing", "h2", "a"], &[]))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "First headline from h2");
        assert_eq!(items[0].url, "https://news.example.com/a");
        assert_eq!(items[0].raw_date, "");
    }

    #[tokio::test]
    async fn test_failing_selector_falls_through() {
        let fake = page(&[("h3", vec![el("Headline after broken selector", None)])]);
        let extractor = Extractor::new(FakeProvider(fake), quick());
        let items = extractor
            .extract(&target(&["broken[", "h3"], &[]))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://news.example.com/latest");
    }

    #[tokio::test]
    async fn test_dates_pair_by_position_then_first() {
        let mut stamped = el("06 May 2025", None);
        stamped.datetime = Some("2025-05-06T09:00:00Z".to_string());
        let fake = page(&[
            (
                "h2",
                vec![
                    el("Headline number one", None),
                    el("Headline number two", None),
                    el("Headline number three", None),
                ],
            ),
            (".date", vec![stamped, el("07 May 2025", None)]),
        ]);
        let extractor = Extractor::new(FakeProvider(fake), quick());
        let items = extractor.extract(&target(&["h2"], &[".date"])).await.unwrap();
        let dates: Vec<_> = items.iter().map(|i| i.raw_date.as_str()).collect();
        assert_eq!(dates, ["2025-05-06T09:00:00Z", "07 May 2025", "2025-05-06T09:00:00Z"]);
    }

    #[tokio::test]
    async fn test_caps_at_max_items() {
        let many: Vec<_> = (0..35).map(|i| el(&format!("Headline number {i}"), None)).collect();
        let fake = page(&[("h2", many)]);
        let extractor = Extractor::new(FakeProvider(fake), quick());
        let items = extractor.extract(&target(&["h2"], &[])).await.unwrap();
        assert_eq!(items.len(), 20);
        assert_eq!(items[19].title, "Headline number 19");
    }

    #[tokio::test]
    async fn test_session_closed_on_navigation_failure() {
        let mut fake = page(&[]);
        fake.fail_navigation = true;
        let counters = fake.counters.clone();
        let extractor = Extractor::new(FakeProvider(fake), quick());
        let err = extractor.extract(&target(&["h2"], &[])).await.unwrap_err();
        assert_eq!(err.target, "FCA (UK)");
        assert!(matches!(err.cause, BrowserError::Timeout { .. }));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_timeout_still_closes_session() {
        let mut fake = page(&[]);
        fake.hang_navigation = true;
        let counters = fake.counters.clone();
        let options = ExtractOptions {
            job_timeout: Duration::from_millis(20),
            ..quick()
        };
        let extractor = Extractor::new(FakeProvider(fake), options);
        let err = extractor.extract(&target(&["h2"], &[])).await.unwrap_err();
        assert!(matches!(err.cause, BrowserError::Timeout { ref what, .. } if what == "extraction"));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_readiness_selector_is_not_fatal() {
        let fake = page(&[("h2", vec![el("Headline without readiness marker", None)])]);
        let counters = fake.counters.clone();
        let extractor = Extractor::new(FakeProvider(fake), quick());
        let t = Target {
            wait_for_selector: Some(".feed-loaded".to_string()),
            dynamic_content: Some(DynamicContent {
                scroll_count: 3,
                scroll_delay_ms: 0,
                scroll_step: 800,
            }),
            ..target(&["h2"], &[])
        };
        let items = extractor.extract(&t).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(counters.scrolls.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_href_variants() {
        let base = Url::parse("https://www.sec.gov/news/pressreleases").unwrap();
        let page = base.as_str();
        assert_eq!(
            resolve_href(Some(&base), Some("/news/press-release/2025-71"), page),
            "https://www.sec.gov/news/press-release/2025-71"
        );
        assert_eq!(
            resolve_href(Some(&base), Some("https://other.example/x"), page),
            "https://other.example/x"
        );
        assert_eq!(resolve_href(Some(&base), Some("javascript:void(0)"), page), page);
        assert_eq!(resolve_href(Some(&base), None, page), page);
    }

    #[tokio::test]
    async fn test_fixture_page_falls_back_to_h2() {
        let server = MockServer::start().await;
        let html = r#"<html><body>
            <h2>Central bank publishes new guidance</h2>
            <h2>Exchange fined for reporting failures</h2>
            <h2>Consultation opens on stablecoin rules</h2>
        </body></html>"#;
        Mock::given(method("GET"))
            .and(path("/press"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let t = Target {
            url: format!("{}/press", server.uri()),
            ..target(&["h2", "a"], &[])
        };
        let extractor = Extractor::new(HttpSessionProvider::direct(), quick());
        let items = extractor.extract(&t).await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.url == t.url));
        assert_eq!(items[2].title, "Consultation opens on stablecoin rules");
    }
}
