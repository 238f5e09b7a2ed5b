use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::ai_processor::{AiProcessor, ENRICHMENT_BATCH_SIZE};
use crate::dbqueue::DatabaseQueue;
use crate::digest::DigestBuilder;
use crate::source_manager::SourceManager;
use crate::store;
use crate::telegram_bot::TelegramBot;

/// Delay between the parts of a split digest.
const INTER_PART_DELAY: Duration = Duration::from_secs(1);
/// Digest generation involves AI round trips; give the queue task room.
const DIGEST_TASK_TIMEOUT: Duration = Duration::from_secs(300);
/// How many sample error messages a cycle report keeps.
const MAX_ERROR_SAMPLES: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub started_at: String,
    pub sources_fetched: usize,
    pub articles_fetched: usize,
    pub articles_processed: usize,
    pub articles_summarized: usize,
    pub articles_categorized: usize,
    pub api_calls_made: usize,
    pub errors_count: usize,
    pub error_samples: Vec<String>,
    pub fetch_duration_secs: f64,
    pub processing_duration_secs: f64,
    pub total_duration_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DigestOutcome {
    pub success: bool,
    pub parts_sent: usize,
    pub parts_total: usize,
    pub detail: String,
}

/// Drives one full cycle — fetch, enrich, record stats — and the digest
/// dispatch path.
pub struct Orchestrator {
    pool: SqlitePool,
    queue: Arc<DatabaseQueue>,
    source_manager: SourceManager,
    processor: Arc<AiProcessor>,
    digest_builder: Arc<DigestBuilder>,
    bot: Arc<TelegramBot>,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        queue: Arc<DatabaseQueue>,
        source_manager: SourceManager,
        processor: Arc<AiProcessor>,
        digest_builder: Arc<DigestBuilder>,
        bot: Arc<TelegramBot>,
    ) -> Self {
        Self {
            pool,
            queue,
            source_manager,
            processor,
            digest_builder,
            bot,
        }
    }

    /// One full cycle: fetch from all sources, enrich one batch, upsert
    /// daily stats. Individual failures are recorded and isolated.
    pub async fn run_full_cycle(&self) -> Result<CycleStats> {
        let started = Instant::now();
        let mut stats = CycleStats {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };
        info!("starting full processing cycle");

        // Step 1: fetch
        let fetch_start = Instant::now();
        match self.source_manager.fetch_from_all_sources().await {
            Ok(outcomes) => {
                stats.sources_fetched = outcomes.len();
                stats.articles_fetched = outcomes.iter().map(|o| o.inserted).sum();
                for outcome in outcomes {
                    if let Some(error) = outcome.error {
                        stats.errors_count += 1;
                        if stats.error_samples.len() < MAX_ERROR_SAMPLES {
                            stats.error_samples.push(format!("{}: {error}", outcome.source_name));
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "source sweep failed");
                stats.errors_count += 1;
                stats.error_samples.push(e.to_string());
            }
        }
        stats.fetch_duration_secs = fetch_start.elapsed().as_secs_f64();
        info!(
            sources = stats.sources_fetched,
            fetched = stats.articles_fetched,
            secs = stats.fetch_duration_secs,
            "fetch stage complete"
        );

        // Step 2: enrichment
        let process_start = Instant::now();
        match self.processor.process_unprocessed(ENRICHMENT_BATCH_SIZE).await {
            Ok(enrichment) => {
                stats.articles_processed = enrichment.processed;
                stats.articles_summarized = enrichment.summarized;
                stats.articles_categorized = enrichment.categorized;
                stats.api_calls_made = enrichment.api_calls;
                stats.errors_count += enrichment.errors.len();
                for error in enrichment.errors.into_iter().take(MAX_ERROR_SAMPLES) {
                    if stats.error_samples.len() < MAX_ERROR_SAMPLES {
                        stats.error_samples.push(error);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "enrichment stage failed");
                stats.errors_count += 1;
                stats.error_samples.push(e.to_string());
            }
        }
        stats.processing_duration_secs = process_start.elapsed().as_secs_f64();
        stats.total_duration_secs = started.elapsed().as_secs_f64();

        // Step 3: daily stats upsert
        if let Err(e) = store::record_cycle_stats(
            &self.pool,
            Utc::now().date_naive(),
            stats.articles_fetched as i64,
            stats.articles_processed as i64,
            stats.api_calls_made as i64,
            stats.errors_count as i64,
            stats.total_duration_secs as i64,
        )
        .await
        {
            warn!(error = %e, "failed to record cycle stats");
        }

        info!(
            processed = stats.articles_processed,
            api_calls = stats.api_calls_made,
            errors = stats.errors_count,
            secs = stats.total_duration_secs,
            "cycle complete"
        );
        Ok(stats)
    }

    /// Ensure summaries exist for today, build the digest (through the
    /// read queue, like any other read-driven request), and dispatch it.
    /// Partial delivery is reported, not hidden.
    pub async fn send_telegram_digest(&self) -> DigestOutcome {
        if !self.bot.is_configured() {
            return DigestOutcome {
                detail: "telegram bot is not configured".to_string(),
                ..Default::default()
            };
        }

        let builder = self.digest_builder.clone();
        let today = Utc::now().date_naive();
        let parts = match self
            .queue
            .execute_read(
                move |_pool| async move { builder.build_digest(today).await },
                Some(DIGEST_TASK_TIMEOUT),
            )
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "digest build failed");
                return DigestOutcome {
                    detail: format!("digest build failed: {e}"),
                    ..Default::default()
                };
            }
        };

        if parts.is_empty() {
            return DigestOutcome {
                detail: "no content for today's digest".to_string(),
                ..Default::default()
            };
        }

        let total = parts.len();
        let mut sent = 0usize;
        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(INTER_PART_DELAY).await;
            }
            match self.bot.send_news(part).await {
                Ok(()) => sent += 1,
                Err(e) => error!(part = index + 1, error = %e, "digest part delivery failed"),
            }
        }

        let outcome = DigestOutcome {
            success: sent == total,
            parts_sent: sent,
            parts_total: total,
            detail: format!("{sent}/{total} parts delivered"),
        };
        info!(parts_sent = sent, parts_total = total, "digest dispatch finished");
        outcome
    }

    /// The maintenance task dispatched by the scheduler.
    pub async fn run_maintenance(&self, cache: &crate::cache::FileCache, memory: &crate::extractor_memory::DomainMemory) {
        match cache.sweep().await {
            Ok(removed) => info!(removed, "cache sweep complete"),
            Err(e) => warn!(error = %e, "cache sweep failed"),
        }
        if let Err(e) = memory.save().await {
            warn!(error = %e, "domain memory snapshot failed");
        }
    }
}
