//! Google search and page text extraction backing [`crate::research`].

use crate::research::{PageFetcher, SearchProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const GOOGLE_BASE_URL: &str = "https://www.google.com";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
const SKIPPED_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

/// Result links from a Google results page, in page order.
///
/// `/url?q=` redirects are unwrapped, only https links survive, and repeats
/// are dropped.
pub fn extract_result_urls(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("#search a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut urls: Vec<String> = Vec::new();
    for href in document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
    {
        let Some(url) = unwrap_redirect(href) else {
            continue;
        };
        if url.starts_with("https") && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

fn unwrap_redirect(href: &str) -> Option<String> {
    if !href.starts_with("/url?") {
        return Some(href.to_string());
    }
    let parsed = Url::parse(GOOGLE_BASE_URL).ok()?.join(href).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "q" || key == "url")
        .map(|(_, value)| value.into_owned())
}

/// Visible text of an HTML document, one whitespace-collapsed line per text
/// node. Script and style content is left out.
pub fn extract_page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_TEXT_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }

    lines.join("\n")
}

/// Scrapes Google's HTML results page.
pub struct GoogleSearch {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleSearch {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: GOOGLE_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let quoted = format!("\"{}\"", query);
        Url::parse_with_params(
            &format!("{}/search", self.base_url.trim_end_matches('/')),
            &[("q", quoted.as_str())],
        )
        .context("Invalid search URL")
    }

    async fn try_search(&self, query: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.search_url(query)?)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(extract_result_urls(&body))
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(&self, query: &str) -> Vec<String> {
        match self.try_search(query).await {
            Ok(urls) => {
                debug!("Search found {} result link(s)", urls.len());
                urls
            }
            Err(err) => {
                warn!("Web search failed: {:#}", err);
                Vec::new()
            }
        }
    }
}

/// Plain GET plus text extraction.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()?;
        let body = response.text().await.context("Failed to read page body")?;

        let text = extract_page_text(&body);
        if text.is_empty() {
            anyhow::bail!("no readable text at {}", url);
        }
        Ok(text)
    }
}
