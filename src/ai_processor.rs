use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::ai_client::AiClient;
use crate::error::AiError;
use crate::extractor::ContentExtractor;
use crate::models::Article;
use crate::store;

/// Batch ceiling per enrichment pass.
pub const ENRICHMENT_BATCH_SIZE: i64 = 50;
/// Fallback pause when a 429 carries no Retry-After.
const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(30);
const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default)]
pub struct EnrichmentStats {
    pub processed: usize,
    pub summarized: usize,
    pub categorized: usize,
    pub api_calls: usize,
    pub errors: Vec<String>,
    pub rate_limited: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReprocessStats {
    pub candidates: usize,
    pub reset: usize,
    pub reextracted: usize,
    pub enrichment: Option<String>,
}

/// Drives per-article AI enrichment: summary, multi-label categories,
/// and the advertising verdict, each gated by its processing flag and
/// committed atomically per article.
pub struct AiProcessor {
    pool: SqlitePool,
    ai: Arc<AiClient>,
    extractor: Arc<ContentExtractor>,
}

impl AiProcessor {
    pub fn new(pool: SqlitePool, ai: Arc<AiClient>, extractor: Arc<ContentExtractor>) -> Self {
        Self { pool, ai, extractor }
    }

    /// Enrich up to `limit` unprocessed articles. Individual failures are
    /// recorded and skipped; a rate limit pauses, then continues.
    pub async fn process_unprocessed(&self, limit: i64) -> Result<EnrichmentStats> {
        let mut stats = EnrichmentStats::default();
        let articles = store::get_unprocessed_articles(&self.pool, limit.min(ENRICHMENT_BATCH_SIZE)).await?;
        if articles.is_empty() {
            return Ok(stats);
        }
        info!(count = articles.len(), "processing unprocessed articles");

        for article in articles {
            let source_type = self.infer_source_type(&article).await;
            debug!(id = article.id, source_type = %source_type, "enriching article");

            let content_for_analysis = article
                .content
                .as_deref()
                .or(article.summary.as_deref())
                .unwrap_or(&article.title);

            // Counts cache hits too; the counter tracks analysis requests
            stats.api_calls += 1;

            let analysis = match self
                .ai
                .analyze_article_complete(&article.title, content_for_analysis, &article.url)
                .await
            {
                Ok(analysis) => analysis,
                Err(AiError::RateLimited { retry_after }) => {
                    let pause = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_RATE_LIMIT_PAUSE)
                        .min(MAX_RATE_LIMIT_PAUSE);
                    warn!(pause_secs = pause.as_secs(), "AI rate limited, pausing enrichment");
                    stats.rate_limited = true;
                    tokio::time::sleep(pause).await;
                    continue;
                }
                Err(e) => {
                    warn!(id = article.id, error = %e, "article analysis failed");
                    stats.errors.push(format!("article {}: {e}", article.id));
                    continue;
                }
            };

            let title_update = analysis
                .optimized_title
                .as_deref()
                .filter(|t| t.chars().count() > article.title.chars().count());

            let summary_update = if article.summary_processed {
                None
            } else {
                analysis.summary.as_deref()
            };

            let category_rows: Vec<(String, f64)> = analysis
                .categories
                .iter()
                .map(|c| (c.ai_category.clone(), c.confidence))
                .collect();
            let categories_update = if article.category_processed || category_rows.is_empty() {
                None
            } else {
                Some(category_rows.as_slice())
            };

            let ad_update = if article.ad_processed { None } else { Some(&analysis.ad) };

            if let Err(e) = store::apply_enrichment(
                &self.pool,
                article.id,
                title_update,
                summary_update,
                categories_update,
                ad_update,
            )
            .await
            {
                warn!(id = article.id, error = %e, "failed to persist enrichment");
                stats.errors.push(format!("article {}: {e}", article.id));
                continue;
            }

            if summary_update.is_some() {
                stats.summarized += 1;
            }
            if categories_update.is_some() {
                stats.categorized += 1;
            }
            stats.processed += 1;
        }

        info!(
            processed = stats.processed,
            summarized = stats.summarized,
            categorized = stats.categorized,
            errors = stats.errors.len(),
            "enrichment pass complete"
        );
        Ok(stats)
    }

    /// Operator sweep over articles whose extraction likely collapsed
    /// (title equals summary, or thin content): reset all three flags,
    /// optionally re-extract, then re-run enrichment with the flags
    /// guaranteed to re-fire.
    pub async fn reprocess_failed_extractions(&self, limit: i64, reextract: bool) -> Result<ReprocessStats> {
        let mut stats = ReprocessStats::default();
        let candidates = store::get_failed_extraction_candidates(&self.pool, limit).await?;
        stats.candidates = candidates.len();
        if candidates.is_empty() {
            return Ok(stats);
        }
        info!(count = candidates.len(), reextract, "reprocessing failed extractions");

        for article in &candidates {
            store::reset_processing_flags(&self.pool, article.id).await?;
            stats.reset += 1;

            if reextract {
                match self.extractor.extract(&article.url).await {
                    Ok(Some(content)) => {
                        store::set_article_content(&self.pool, article.id, &content).await?;
                        stats.reextracted += 1;
                    }
                    Ok(None) => debug!(id = article.id, "re-extraction found no content"),
                    Err(e) => debug!(id = article.id, error = %e, "re-extraction failed"),
                }
            }
        }

        let enrichment = self.process_unprocessed(limit).await?;
        stats.enrichment = Some(format!(
            "{} processed, {} errors",
            enrichment.processed,
            enrichment.errors.len()
        ));
        Ok(stats)
    }

    /// Source type from the relation when present, else URL heuristics.
    async fn infer_source_type(&self, article: &Article) -> String {
        if let Some(source_id) = article.source_id
            && let Ok(Some(source)) = store::get_source_by_id(&self.pool, source_id).await
        {
            return source.source_type;
        }

        let host = crate::extractor::domain_of(&article.url);
        if host.contains("t.me") || host.contains("telegram.me") {
            "telegram".to_string()
        } else if host.contains("reddit.com") || host.contains("redd.it") {
            "reddit".to_string()
        } else {
            "rss".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::db;
    use crate::models::{AdVerdict, NewItem};

    async fn seed_article(pool: &SqlitePool, url: &str, title: &str) -> i64 {
        let source_id = store::upsert_source(
            pool,
            &SourceConfig {
                name: "seed".to_string(),
                source_type: "rss".to_string(),
                url: "https://example.com/feed.xml".to_string(),
                fetch_interval: "30m".to_string(),
                enabled: true,
                config: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        store::insert_article(
            pool,
            source_id,
            &NewItem {
                title: title.to_string(),
                url: url.to_string(),
                ..Default::default()
            },
            "hash",
        )
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn enrichment_flags_flip_atomically() {
        let pool = db::test_pool().await;
        let id = seed_article(&pool, "https://ex.com/a1", "Apple earnings up").await;

        let verdict = AdVerdict::default();
        store::apply_enrichment(
            &pool,
            id,
            None,
            Some("Компания сообщила о росте выручки по итогам квартала."),
            Some(&[("Business".to_string(), 0.9)]),
            Some(&verdict),
        )
        .await
        .unwrap();

        let article = store::get_article_by_id(&pool, id).await.unwrap().unwrap();
        assert!(article.summary_processed);
        assert!(article.category_processed);
        assert!(article.ad_processed);
        assert!(!article.is_advertisement);

        let categories = store::get_article_categories(&pool, &[id]).await.unwrap();
        assert_eq!(categories.get(&id).unwrap()[0].ai_category, "Business");
    }

    #[tokio::test]
    async fn flags_monotonic_until_force_reset() {
        let pool = db::test_pool().await;
        let id = seed_article(&pool, "https://ex.com/a1", "Title").await;

        store::apply_enrichment(&pool, id, None, Some("Русское содержание статьи достаточной длины."), None, None)
            .await
            .unwrap();
        let article = store::get_article_by_id(&pool, id).await.unwrap().unwrap();
        assert!(article.summary_processed);

        // Only the explicit operator path resets the flags
        store::reset_processing_flags(&pool, id).await.unwrap();
        let article = store::get_article_by_id(&pool, id).await.unwrap().unwrap();
        assert!(!article.summary_processed);
        assert!(!article.category_processed);
        assert!(!article.ad_processed);
    }

    #[tokio::test]
    async fn failed_extraction_candidates_found() {
        let pool = db::test_pool().await;

        // Collapsed extraction: title equals summary
        let id = seed_article(&pool, "https://ex.com/bad", "Collapsed headline").await;
        store::set_article_summary(&pool, id, "Collapsed headline").await.unwrap();
        store::set_article_title(&pool, id, "Collapsed headline").await.unwrap();

        // Thin content
        let id2 = seed_article(&pool, "https://ex.com/thin", "Thin article").await;
        store::set_article_content(&pool, id2, "tiny").await.unwrap();

        let candidates = store::get_failed_extraction_candidates(&pool, 50).await.unwrap();
        let urls: Vec<&str> = candidates.iter().map(|a| a.url.as_str()).collect();
        assert!(urls.contains(&"https://ex.com/bad"));
        assert!(urls.contains(&"https://ex.com/thin"));
    }
}
