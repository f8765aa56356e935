//! HTTP-backed browser sessions.
//!
//! Pages are fetched with `reqwest`, either directly or through a
//! Browserless-compatible render service (`POST {endpoint}/content`) that
//! returns the HTML after the page's scripts ran. Queries run against the
//! loaded document with `scraper`.
//!
//! Documents are static once loaded, so `scroll_by` only records the offset and
//! `wait_for_selector` checks the loaded document once.

use super::{BrowserSession, ClientIdentity, Element, SessionProvider};
use crate::error::BrowserError;
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument};

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Extra time granted to the render service on top of the page's own budget.
const RENDER_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct RenderService {
    endpoint: String,
    token: Option<String>,
}

/// Opens [`HttpSession`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpSessionProvider {
    render: Option<RenderService>,
}

impl HttpSessionProvider {
    /// Fetch pages directly from the site.
    pub fn direct() -> Self {
        Self { render: None }
    }

    /// Fetch pages through a render service at `endpoint`.
    pub fn rendered(endpoint: &str, token: Option<String>) -> Self {
        Self {
            render: Some(RenderService {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                token,
            }),
        }
    }
}

impl SessionProvider for HttpSessionProvider {
    type Session = HttpSession;

    async fn open(&self, identity: &ClientIdentity) -> Result<HttpSession, BrowserError> {
        let mut headers = HeaderMap::new();
        for &(name, value) in &identity.headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        let client = Client::builder()
            .user_agent(identity.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(HttpSession {
            client,
            render: self.render.clone(),
            stealth: identity.stealth,
            page: None,
            scroll_offset: 0,
        })
    }
}

#[derive(Debug)]
struct LoadedPage {
    url: String,
    html: String,
}

/// One page loaded over HTTP.
#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    render: Option<RenderService>,
    stealth: bool,
    page: Option<LoadedPage>,
    scroll_offset: i64,
}

impl HttpSession {
    async fn fetch_direct(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<LoadedPage, BrowserError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| BrowserError::from_reqwest(url, e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BrowserError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = resp.url().to_string();
        let html = resp
            .text()
            .await
            .map_err(|e| BrowserError::from_reqwest(url, e, timeout))?;
        Ok(LoadedPage {
            url: final_url,
            html,
        })
    }

    async fn fetch_rendered(
        &self,
        render: &RenderService,
        url: &str,
        timeout: Duration,
    ) -> Result<LoadedPage, BrowserError> {
        let mut params = Vec::new();
        if let Some(token) = &render.token {
            params.push(format!("token={}", urlencoding::encode(token)));
        }
        if self.stealth {
            params.push("stealth=true".to_string());
        }
        let mut endpoint = format!("{}/content", render.endpoint);
        if !params.is_empty() {
            endpoint.push('?');
            endpoint.push_str(&params.join("&"));
        }

        let body = serde_json::json!({
            "url": url,
            "gotoOptions": {
                "waitUntil": "domcontentloaded",
                "timeout": timeout.as_millis() as u64,
            },
        });

        let resp = self
            .client
            .post(&endpoint)
            .timeout(timeout + RENDER_GRACE)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrowserError::from_reqwest(url, e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserError::Render {
                status: status.as_u16(),
                message: truncate_for_log(&message, 200),
            });
        }

        let html = resp
            .text()
            .await
            .map_err(|e| BrowserError::from_reqwest(url, e, timeout))?;
        Ok(LoadedPage {
            url: url.to_string(),
            html,
        })
    }

    fn loaded(&self) -> Result<&LoadedPage, BrowserError> {
        self.page.as_ref().ok_or(BrowserError::NoPage)
    }
}

impl BrowserSession for HttpSession {
    #[instrument(level = "debug", skip(self, timeout))]
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let page = match &self.render {
            Some(render) => self.fetch_rendered(render, url, timeout).await?,
            None => self.fetch_direct(url, timeout).await?,
        };
        debug!(final_url = %page.url, bytes = page.html.len(), "Loaded page");
        self.page = Some(page);
        self.scroll_offset = 0;
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let found = !self.query_all(selector).await?.is_empty();
        if found {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: format!("selector {selector:?}"),
                after: timeout,
            })
        }
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Element>, BrowserError> {
        let page = self.loaded()?;
        let parsed =
            Selector::parse(selector).map_err(|_| BrowserError::Selector(selector.to_string()))?;
        let document = Html::parse_document(&page.html);
        Ok(document.select(&parsed).map(snapshot).collect())
    }

    async fn scroll_by(&mut self, step: i64) -> Result<(), BrowserError> {
        self.loaded()?;
        self.scroll_offset += step;
        debug!(offset = self.scroll_offset, "Scrolled static document");
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.page.as_ref().map(|p| p.url.as_str())
    }

    async fn close(self) -> Result<(), BrowserError> {
        debug!(url = ?self.current_url(), "Closing HTTP session");
        Ok(())
    }
}

fn snapshot(el: ElementRef<'_>) -> Element {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Element {
        text,
        href: anchor_href(el),
        datetime: el.value().attr("datetime").map(str::to_string),
    }
}

fn anchor_href(el: ElementRef<'_>) -> Option<String> {
    if el.value().name() == "a" {
        if let Some(href) = el.value().attr("href") {
            return Some(href.to_string());
        }
    }
    if let Some(inner) = el.select(&ANCHOR).next() {
        return inner.value().attr("href").map(str::to_string);
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "a")
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}
