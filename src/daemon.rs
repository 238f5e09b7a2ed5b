use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ai_client::AiClient;
use crate::ai_processor::AiProcessor;
use crate::browser::BrowserPool;
use crate::cache::FileCache;
use crate::cleanup;
use crate::config::Config;
use crate::db;
use crate::dbqueue::{DatabaseQueue, QueueConfig};
use crate::digest::DigestBuilder;
use crate::extractor::ContentExtractor;
use crate::extractor_memory::DomainMemory;
use crate::http::HttpClient;
use crate::orchestrator::Orchestrator;
use crate::scheduler;
use crate::server::{self, AppState};
use crate::source_manager::SourceManager;
use crate::sources::FetcherDeps;
use crate::store;
use crate::telegram_bot::TelegramBot;

/// Fully wired application: every component shares the same pool,
/// HTTP client, cache, browser, and domain memory.
pub struct App {
    pub config: Arc<Config>,
    pub pool: sqlx::SqlitePool,
    pub queue: Arc<DatabaseQueue>,
    pub cache: Arc<FileCache>,
    pub memory: Arc<DomainMemory>,
    pub browser: Arc<BrowserPool>,
    pub source_manager: SourceManager,
    pub processor: Arc<AiProcessor>,
    pub digest_builder: Arc<DigestBuilder>,
    pub bot: Arc<TelegramBot>,
    pub orchestrator: Arc<Orchestrator>,
}

pub async fn build_app(config: Config) -> Result<App> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    store::sync_config_to_db(&pool, &config)
        .await
        .context("syncing config to database")?;
    info!(sources = config.source.len(), "config synced to database");

    let queue = DatabaseQueue::new(pool.clone(), QueueConfig::default());

    let http = Arc::new(HttpClient::new(&config.http).context("building HTTP client")?);
    let cache_ttl = humantime::parse_duration(&config.cache.default_ttl).unwrap_or(Duration::from_secs(24 * 3600));
    let cache = Arc::new(FileCache::new(config.cache_dir(), cache_ttl).context("creating file cache")?);
    let memory = Arc::new(DomainMemory::load(config.extractor_memory_path()));
    let browser = Arc::new(BrowserPool::new(config.extractor.enable_browser));

    let ai = Arc::new(AiClient::new(http.clone(), cache.clone(), config.ai.clone()));
    let extractor = Arc::new(ContentExtractor::new(
        http.clone(),
        memory.clone(),
        browser.clone(),
        Some(ai.clone()),
        config.extractor.enable_learning,
    ));

    let deps = FetcherDeps {
        http: http.clone(),
        browser: browser.clone(),
        memory: memory.clone(),
        extractor: Some(extractor.clone()),
        ai: Some(ai.clone()),
        full_content_domains: config.telegram.full_content_domains.clone(),
    };
    let source_manager = SourceManager::new(pool.clone(), deps, config.vestnik.max_concurrent_fetches as usize);

    let processor = Arc::new(AiProcessor::new(pool.clone(), ai.clone(), extractor.clone()));
    let digest_builder = Arc::new(DigestBuilder::new(pool.clone(), ai.clone()));
    let bot = Arc::new(TelegramBot::new(http.clone(), &config.telegram));

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        queue.clone(),
        source_manager.clone(),
        processor.clone(),
        digest_builder.clone(),
        bot.clone(),
    ));

    Ok(App {
        config: Arc::new(config),
        pool,
        queue,
        cache,
        memory,
        browser,
        source_manager,
        processor,
        digest_builder,
        bot,
        orchestrator,
    })
}

pub async fn run(config: Config) -> Result<()> {
    let app = build_app(config).await?;
    let cancel = CancellationToken::new();

    // Background loops
    let scheduler_handle = tokio::spawn(scheduler::scheduler_loop(
        app.pool.clone(),
        app.orchestrator.clone(),
        app.digest_builder.clone(),
        app.cache.clone(),
        app.memory.clone(),
        cancel.clone(),
    ));
    let cleanup_handle = tokio::spawn(cleanup::cleanup_loop(
        app.pool.clone(),
        app.config.clone(),
        cancel.clone(),
    ));

    // HTTP server
    let state = AppState {
        pool: app.pool.clone(),
        queue: app.queue.clone(),
        orchestrator: app.orchestrator.clone(),
        digest_builder: app.digest_builder.clone(),
        processor: app.processor.clone(),
        memory: app.memory.clone(),
        source_manager: app.source_manager.clone(),
    };
    let router = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&app.config.vestnik.listen)
        .await
        .with_context(|| format!("binding to {}", app.config.vestnik.listen))?;
    info!(listen = %app.config.vestnik.listen, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    let shutdown_timeout = Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = scheduler_handle.await;
        let _ = cleanup_handle.await;
        let _ = server_handle.await;
    })
    .await;

    app.queue.shutdown().await;
    app.browser.shutdown().await;
    let _ = app.memory.save().await;
    app.pool.close().await;
    info!("shutdown complete");

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
