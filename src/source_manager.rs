use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::SourceConfig;
use crate::models::{NewItem, Source};
use crate::sources::{self, Fetcher, FetcherDeps};
use crate::store;

/// Recent window for the Telegram-safe title dedup guard.
const TITLE_DEDUP_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub source_name: String,
    pub inserted: usize,
    pub error: Option<String>,
}

/// Owns the source registry and the persistence of fetched items:
/// per-source fetch with in-batch and database-level deduplication,
/// error-state bookkeeping, and the bounded all-sources sweep.
#[derive(Clone)]
pub struct SourceManager {
    pool: SqlitePool,
    deps: FetcherDeps,
    max_concurrent: usize,
}

impl SourceManager {
    pub fn new(pool: SqlitePool, deps: FetcherDeps, max_concurrent: usize) -> Self {
        Self {
            pool,
            deps,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn create_source(&self, config: &SourceConfig) -> Result<Source> {
        if !sources::is_supported(&config.source_type) {
            bail!("unsupported source type: {}", config.source_type);
        }
        if config.url.trim().is_empty() {
            bail!("source url must not be empty");
        }

        let source = store::get_or_create_source(&self.pool, config).await?;

        // A failing connection test disables the source up front
        let fetcher = sources::create_fetcher(&source, &self.deps)?;
        if !fetcher.test_connection().await {
            warn!(source = %source.name, "connection test failed, disabling source");
            store::mark_fetch_error(&self.pool, source.id, "Failed connection test").await?;
            store::update_source_fields(&self.pool, source.id, None, None, Some(false), None, None).await?;
        }

        store::get_source_by_id(&self.pool, source.id)
            .await?
            .context("source disappeared after creation")
    }

    pub async fn get_sources(&self, enabled_only: bool) -> Result<Vec<Source>> {
        store::get_sources(&self.pool, enabled_only).await
    }

    pub async fn get_sources_due_for_fetch(&self) -> Result<Vec<Source>> {
        store::get_sources_due_for_fetch(&self.pool).await
    }

    pub async fn delete_source(&self, id: i64, delete_articles: bool) -> Result<bool> {
        store::delete_source(&self.pool, id, delete_articles).await
    }

    pub async fn test_source_connection(&self, id: i64) -> Result<bool> {
        let Some(source) = store::get_source_by_id(&self.pool, id).await? else {
            return Ok(false);
        };
        let fetcher = sources::create_fetcher(&source, &self.deps)?;
        let connected = fetcher.test_connection().await;

        if connected {
            store::mark_fetch_success(&self.pool, id, Utc::now()).await?;
        } else {
            store::mark_fetch_error(&self.pool, id, "Connection test failed").await?;
        }
        Ok(connected)
    }

    /// Fetch one source and persist its new items. Returns inserted ids.
    pub async fn fetch_from_source(&self, source: &Source, limit: Option<usize>) -> Result<Vec<i64>> {
        store::mark_fetch_started(&self.pool, source.id, Utc::now()).await?;

        let mut fetcher = sources::create_fetcher(source, &self.deps)?;
        let items = match fetcher.fetch_articles(limit).await {
            Ok(items) => items,
            Err(e) => {
                store::mark_fetch_error(&self.pool, source.id, &e.to_string()).await?;
                return Err(e).with_context(|| format!("fetching from source {}", source.name));
            }
        };

        let inserted = persist_new_items(&self.pool, source.id, &items).await?;

        // Page monitors carry their snapshot in the source config
        if let Some(state) = fetcher.state_update() {
            let config_json = state.to_string();
            store::update_source_fields(&self.pool, source.id, None, None, None, None, Some(&config_json)).await?;
        }

        store::mark_fetch_success(&self.pool, source.id, Utc::now()).await?;
        info!(source = %source.name, fetched = items.len(), inserted = inserted.len(), "source fetch complete");
        Ok(inserted)
    }

    /// Fetch every enabled source with bounded concurrency. A failed
    /// source records its error and does not fail the cycle.
    pub async fn fetch_from_all_sources(&self) -> Result<Vec<FetchOutcome>> {
        let sources = self.get_sources(true).await?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let manager = self.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(p) => p,
                    Err(_) => return FetchOutcome {
                        source_name: source.name,
                        inserted: 0,
                        error: Some("semaphore closed".to_string()),
                    },
                };
                match manager.fetch_from_source(&source, None).await {
                    Ok(inserted) => FetchOutcome {
                        source_name: source.name,
                        inserted: inserted.len(),
                        error: None,
                    },
                    Err(e) => {
                        error!(source = %source.name, error = %e, "source fetch failed");
                        FetchOutcome {
                            source_name: source.name,
                            inserted: 0,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "fetch task panicked"),
            }
        }
        Ok(outcomes)
    }
}

/// Deduplicate and persist a batch of fetched items.
///
/// In-batch dedup tracks every URL variant (primary, Telegram permalink,
/// original link) and normalized titles; database dedup checks the URL
/// variants with one IN-query plus the recent same-source title guard.
pub async fn persist_new_items(pool: &SqlitePool, source_id: i64, items: &[NewItem]) -> Result<Vec<i64>> {
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut inserted = Vec::new();

    for item in items {
        let urls = item.dedup_urls();
        if urls.iter().any(|u| seen_urls.contains(*u)) {
            debug!(url = %item.url, "skipping in-batch URL duplicate");
            continue;
        }

        let normalized_title = item.title.trim().to_lowercase();
        if !normalized_title.is_empty() && seen_titles.contains(&normalized_title) {
            debug!(title = %item.title, "skipping in-batch title duplicate");
            continue;
        }

        if store::any_article_url_exists(pool, &urls).await? {
            continue;
        }
        if !normalized_title.is_empty()
            && store::recent_title_exists(pool, source_id, &item.title, TITLE_DEDUP_WINDOW_DAYS).await?
        {
            debug!(title = %item.title, "skipping near-duplicate title in recent window");
            continue;
        }

        let hash = content_hash(&item.title, &item.url);
        if let Some(id) = store::insert_article(pool, source_id, item, &hash).await? {
            inserted.push(id);
        }

        for url in urls {
            seen_urls.insert(url.to_string());
        }
        if !normalized_title.is_empty() {
            seen_titles.insert(normalized_title);
        }
    }

    Ok(inserted)
}

fn content_hash(title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b":");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::AdVerdict;

    async fn seeded_source(pool: &SqlitePool, name: &str) -> i64 {
        store::upsert_source(
            pool,
            &SourceConfig {
                name: name.to_string(),
                source_type: "rss".to_string(),
                url: format!("https://example.com/{name}.xml"),
                fetch_interval: "30m".to_string(),
                enabled: true,
                config: serde_json::Value::Null,
            },
        )
        .await
        .unwrap()
    }

    fn item(url: &str, title: &str) -> NewItem {
        NewItem {
            title: title.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn batch_dedup_by_url_and_title() {
        let pool = db::test_pool().await;
        let source_id = seeded_source(&pool, "a").await;

        let items = vec![
            item("https://ex.com/1", "Headline one about events"),
            item("https://ex.com/1", "Same url again"),
            item("https://ex.com/2", "headline ONE about events"),
            item("https://ex.com/3", "A distinct second headline"),
        ];
        let inserted = persist_new_items(&pool, source_id, &items).await.unwrap();
        assert_eq!(inserted.len(), 2, "url dup and title dup are both skipped");
    }

    #[tokio::test]
    async fn dedup_across_url_variants() {
        let pool = db::test_pool().await;
        let source_id = seeded_source(&pool, "a").await;

        // A Telegram message whose primary URL is the external article
        let mut tg = item("https://news.rs/article", "Story from the channel");
        tg.raw.telegram_url = Some("https://t.me/ch/123".to_string());
        tg.raw.original_link = Some("https://news.rs/article".to_string());
        let first = persist_new_items(&pool, source_id, &[tg]).await.unwrap();
        assert_eq!(first.len(), 1);

        // A later RSS run carries the same article URL: nothing inserted
        let rss = item("https://news.rs/article", "Story headline from the feed");
        let second = persist_new_items(&pool, source_id, &[rss]).await.unwrap();
        assert!(second.is_empty(), "variant already known via the Telegram item");

        // And the Telegram permalink itself is also blocked
        let permalink = item("https://t.me/ch/123", "Permalink duplicate title");
        let third = persist_new_items(&pool, source_id, &[permalink]).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn second_identical_run_inserts_nothing() {
        let pool = db::test_pool().await;
        let source_id = seeded_source(&pool, "a").await;

        let items = vec![
            item("https://ex.com/1", "First story of the day"),
            item("https://ex.com/2", "Second story of the day"),
        ];
        let first = persist_new_items(&pool, source_id, &items).await.unwrap();
        assert_eq!(first.len(), 2);

        let second = persist_new_items(&pool, source_id, &items).await.unwrap();
        assert!(second.is_empty(), "idempotent over unchanged source output");
    }

    #[tokio::test]
    async fn telegram_ad_verdict_persisted_at_insert() {
        let pool = db::test_pool().await;
        let source_id = seeded_source(&pool, "a").await;

        let mut ad = item("https://t.me/ch/5", "Только сегодня! Купи со скидкой");
        ad.raw.advertising = Some(AdVerdict {
            is_advertisement: true,
            confidence: 0.85,
            ad_type: Some("product_promotion".to_string()),
            reasoning: "direct sales pitch".to_string(),
            markers: vec!["call_to_action".to_string()],
        });
        let inserted = persist_new_items(&pool, source_id, &[ad]).await.unwrap();

        let article = store::get_article_by_id(&pool, inserted[0]).await.unwrap().unwrap();
        assert!(article.is_advertisement);
        assert!(article.ad_processed, "Telegram path marks ads as processed");
        assert!((article.ad_confidence - 0.85).abs() < 1e-9);
        assert!(!article.summary_processed, "other flags stay pending");
    }

    #[tokio::test]
    async fn content_hash_is_stable() {
        assert_eq!(content_hash("t", "u"), content_hash("t", "u"));
        assert_ne!(content_hash("t", "u"), content_hash("t", "v"));
    }
}
