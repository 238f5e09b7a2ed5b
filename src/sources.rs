use std::sync::Arc;

use anyhow::{Result, bail};

use crate::ai_client::AiClient;
use crate::browser::BrowserPool;
use crate::config::SOURCE_TYPES;
use crate::extractor::ContentExtractor;
use crate::extractor_memory::DomainMemory;
use crate::fetch_rss::RssFetcher;
use crate::fetch_telegram::TelegramFetcher;
use crate::http::HttpClient;
use crate::models::{NewItem, Source};
use crate::page_monitor::PageMonitor;

/// Shared collaborators handed to every fetcher the registry builds.
#[derive(Clone)]
pub struct FetcherDeps {
    pub http: Arc<HttpClient>,
    pub browser: Arc<BrowserPool>,
    pub memory: Arc<DomainMemory>,
    pub extractor: Option<Arc<ContentExtractor>>,
    pub ai: Option<Arc<AiClient>>,
    /// Domains eligible for Telegram full-content replacement.
    pub full_content_domains: Vec<String>,
}

/// Closed set of fetcher strategies; new source types extend the variant.
pub enum Fetcher {
    Rss(RssFetcher),
    Telegram(TelegramFetcher),
    PageMonitor(PageMonitor),
}

pub fn is_supported(source_type: &str) -> bool {
    SOURCE_TYPES.contains(&source_type)
}

/// Registry: instantiate the fetcher matching a source's type. Types
/// without a dedicated strategy are monitored as generic pages.
pub fn create_fetcher(source: &Source, deps: &FetcherDeps) -> Result<Fetcher> {
    let config: serde_json::Value = serde_json::from_str(&source.config).unwrap_or(serde_json::Value::Null);

    match source.source_type.as_str() {
        "rss" => Ok(Fetcher::Rss(RssFetcher::new(
            deps.http.clone(),
            source.name.clone(),
            source.url.clone(),
        ))),
        "telegram" => Ok(Fetcher::Telegram(TelegramFetcher::new(
            deps.http.clone(),
            deps.browser.clone(),
            deps.extractor.clone(),
            deps.ai.clone(),
            source.name.clone(),
            &source.url,
            deps.full_content_domains.clone(),
        )?)),
        "generic_page" | "reddit" | "twitter" | "news_api" | "custom" => {
            Ok(Fetcher::PageMonitor(PageMonitor::from_source(
                deps.http.clone(),
                deps.browser.clone(),
                deps.memory.clone(),
                deps.ai.clone(),
                source.name.clone(),
                source.url.clone(),
                &config,
            )))
        }
        other => bail!("unsupported source type: {other}"),
    }
}

impl Fetcher {
    pub async fn fetch_articles(&mut self, limit: Option<usize>) -> Result<Vec<NewItem>> {
        match self {
            Fetcher::Rss(f) => f.fetch_articles(limit).await,
            Fetcher::Telegram(f) => f.fetch_articles(limit).await,
            Fetcher::PageMonitor(f) => f.fetch_articles(limit).await,
        }
    }

    pub async fn test_connection(&self) -> bool {
        match self {
            Fetcher::Rss(f) => f.test_connection().await,
            Fetcher::Telegram(f) => f.test_connection().await,
            Fetcher::PageMonitor(f) => f.test_connection().await,
        }
    }

    /// Fetchers with persistent state (page snapshots) report an updated
    /// source config after a fetch.
    pub fn state_update(&self) -> Option<serde_json::Value> {
        match self {
            Fetcher::PageMonitor(f) => Some(f.state_json()),
            _ => None,
        }
    }
}
