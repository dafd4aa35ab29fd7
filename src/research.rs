//! Research escalation
//!
//! When the same failure keeps coming back, ask the model for a search query,
//! run it, and fold the text of the top results into the next repair prompt.

use crate::error::RepairError;
use crate::llm::{ChatMessage, LanguageModel};
use crate::prompts::SEARCH_QUERY_SYSTEM;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Turns a query into candidate https URLs, best first. Empty is a valid answer.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Vec<String>;
}

/// Retrieves the readable text of one page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

fn query_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"search_query:\s*"(.*?)""#).expect("query pattern is valid")
    })
}

/// Pull the query out of a `search_query: "..."` reply.
pub fn parse_search_query(reply: &str) -> Result<String, RepairError> {
    query_pattern()
        .captures(reply)
        .map(|caps| caps[1].trim().to_string())
        .filter(|query| !query.is_empty())
        .ok_or_else(|| RepairError::QueryParse {
            preview: crate::util::truncate(reply.trim(), 120),
        })
}

/// What one escalation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Research {
    pub query: String,
    /// URLs whose text made it into `content`, in search order
    pub sources: Vec<String>,
    /// Ready-to-embed block; empty when nothing was retrieved
    pub content: String,
}

impl Research {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

pub struct ResearchEscalator {
    search: Box<dyn SearchProvider>,
    fetcher: Box<dyn PageFetcher>,
    num_urls: usize,
}

impl ResearchEscalator {
    pub fn new(
        search: Box<dyn SearchProvider>,
        fetcher: Box<dyn PageFetcher>,
        num_urls: usize,
    ) -> Self {
        Self {
            search,
            fetcher,
            num_urls,
        }
    }

    /// Run one escalation against the plain (research-free) prompt.
    ///
    /// Model and query-parse failures propagate. Search and fetch problems
    /// only shrink the result.
    pub async fn research(
        &self,
        model: &dyn LanguageModel,
        prompt: &str,
    ) -> Result<Research, RepairError> {
        let reply = model
            .generate(&[ChatMessage::user(prompt)], Some(SEARCH_QUERY_SYSTEM))
            .await?;
        let query = parse_search_query(&reply)?;
        info!("Search query: {}", query);

        let urls = self.search.search(&query).await;
        if urls.is_empty() {
            warn!("Search returned no results for {:?}", query);
        }

        let limit = self.num_urls.max(1);
        let pages: Vec<(&str, anyhow::Result<String>)> = stream::iter(urls.iter().take(self.num_urls))
            .map(|url| async move { (url.as_str(), self.fetcher.fetch(url).await) })
            .buffered(limit)
            .collect()
            .await;

        let mut research = Research {
            query,
            ..Research::default()
        };
        for (url, page) in pages {
            match page {
                Ok(text) => {
                    research
                        .content
                        .push_str(&format!("### CONTENT FROM: {}\n{}\n\n", url, text));
                    research.sources.push(url.to_string());
                }
                Err(err) => warn!("Skipping {}: {:#}", url, err),
            }
        }

        info!(
            "Retrieved {} of {} page(s) for research",
            research.sources.len(),
            urls.len().min(self.num_urls)
        );
        Ok(research)
    }
}
