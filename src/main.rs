mod ai_client;
mod ai_processor;
mod browser;
mod cache;
mod categories;
mod cleanup;
mod cli;
mod config;
mod daemon;
mod db;
mod dbqueue;
mod digest;
mod error;
mod extractor;
mod extractor_memory;
mod fetch_rss;
mod fetch_telegram;
mod http;
mod migrations;
mod models;
mod orchestrator;
mod page_monitor;
mod scheduler;
mod server;
mod source_manager;
mod sources;
mod store;
mod telegram_bot;
mod telegram_media;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::{load_config, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.vestnik.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");
    validate_config(&config).context("config validation failed")?;

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Cycle) => {
            let app = daemon::build_app(config).await?;
            let stats = app.orchestrator.run_full_cycle().await?;
            println!(
                "Cycle complete: {} fetched, {} processed, {} API calls, {} errors in {:.1}s",
                stats.articles_fetched,
                stats.articles_processed,
                stats.api_calls_made,
                stats.errors_count,
                stats.total_duration_secs
            );
            shutdown_oneshot(app).await;
        }
        Some(Commands::Digest { date }) => {
            let target = match date {
                Some(ref s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .with_context(|| format!("invalid --date '{s}', expected YYYY-MM-DD"))?,
                None => Utc::now().date_naive(),
            };

            let app = daemon::build_app(config).await?;
            let parts = app.digest_builder.build_digest(target).await?;
            if parts.is_empty() {
                println!("No content for {target} — digest skipped.");
            } else if !app.bot.is_configured() {
                println!("Telegram bot not configured; printing digest instead.\n");
                for part in &parts {
                    println!("{part}\n");
                }
            } else {
                let mut sent = 0;
                for (index, part) in parts.iter().enumerate() {
                    if index > 0 {
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                    match app.bot.send_news(part).await {
                        Ok(()) => sent += 1,
                        Err(e) => eprintln!("part {} failed: {e}", index + 1),
                    }
                }
                println!("Digest for {target}: {sent}/{} parts delivered.", parts.len());
            }
            shutdown_oneshot(app).await;
        }
        Some(Commands::Reprocess { limit, reextract }) => {
            let app = daemon::build_app(config).await?;
            let stats = app.processor.reprocess_failed_extractions(limit, reextract).await?;
            println!(
                "Reprocess: {} candidates, {} reset, {} re-extracted. {}",
                stats.candidates,
                stats.reset,
                stats.reextracted,
                stats.enrichment.unwrap_or_default()
            );
            shutdown_oneshot(app).await;
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}

/// Release resources after a one-shot subcommand.
async fn shutdown_oneshot(app: daemon::App) {
    app.queue.shutdown().await;
    app.browser.shutdown().await;
    let _ = app.memory.save().await;
    app.pool.close().await;
}
