use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::warn;

use crate::ai_processor::AiProcessor;
use crate::categories::{self, DisplayCategory, FIXED_CATEGORIES};
use crate::config::SourceConfig;
use crate::dbqueue::DatabaseQueue;
use crate::digest::DigestBuilder;
use crate::extractor_memory::DomainMemory;
use crate::models::Article;
use crate::orchestrator::Orchestrator;
use crate::source_manager::SourceManager;
use crate::store::{self, FeedParams, ScheduleUpdate};

/// Default lookback window for category counts.
const CATEGORY_COUNT_WINDOW_HOURS: i64 = 168;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub queue: Arc<DatabaseQueue>,
    pub orchestrator: Arc<Orchestrator>,
    pub digest_builder: Arc<DigestBuilder>,
    pub processor: Arc<AiProcessor>,
    pub memory: Arc<DomainMemory>,
    pub source_manager: SourceManager,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/feed", get(feed_handler))
        .route("/api/article/{id}", get(article_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/search", get(search_handler))
        .route("/api/process/run", post(process_run_handler))
        .route("/api/process/reprocess", post(reprocess_handler))
        .route("/api/telegram/send-digest", post(send_digest_handler))
        .route("/api/summaries/generate", post(generate_summaries_handler))
        .route("/api/schedule/settings", get(schedule_settings_handler))
        .route("/api/schedule/settings/{task_name}", put(schedule_update_handler))
        .route("/api/schedule/status", get(schedule_status_handler))
        .route("/api/stats/queue", get(stats_queue_handler))
        .route("/api/stats/extractor", get(stats_extractor_handler))
        .route("/api/stats/dashboard", get(stats_dashboard_handler))
        .route("/api/sources", get(sources_list_handler).post(sources_create_handler))
        .route(
            "/api/sources/{id}",
            put(sources_update_handler).delete(sources_delete_handler),
        )
        .route("/api/sources/{id}/test", post(sources_test_handler))
        .with_state(state)
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> Response {
    warn!(error = %e, context, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
}

/// Article JSON with mapped display categories.
async fn article_json(pool: &SqlitePool, article: &Article, include_content: bool) -> serde_json::Value {
    let rows = store::get_article_categories(pool, &[article.id]).await.unwrap_or_default();
    let labels: Vec<(String, f64)> = rows
        .get(&article.id)
        .map(|rows| rows.iter().map(|r| (r.ai_category.clone(), r.confidence)).collect())
        .unwrap_or_default();
    let display = categories::display_categories_for(pool, &labels).await;
    let primary = display
        .first()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| {
            categories::fallback_category(&article.title, article.summary.as_deref().unwrap_or("")).to_string()
        });

    let mut value = json!({
        "id": article.id,
        "source_id": article.source_id,
        "title": article.title,
        "url": article.url,
        "summary": article.summary,
        "image_url": article.image_url,
        "published_at": article.published_at,
        "fetched_at": article.fetched_at,
        "is_advertisement": article.is_advertisement,
        "ad_confidence": article.ad_confidence,
        "categories": display,
        "primary_category": primary,
    });
    if include_content {
        value["content"] = json!(article.content);
        value["media_files"] = serde_json::to_value(article.media_files()).unwrap_or_default();
        value["ad_type"] = json!(article.ad_type);
        value["ad_reasoning"] = json!(article.ad_reasoning);
    }
    value
}

// ── Feed / article / search ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FeedQuery {
    limit: Option<i64>,
    offset: Option<i64>,
    since_hours: Option<i64>,
    category: Option<String>,
    source: Option<i64>,
    hide_ads: Option<bool>,
}

async fn feed_handler(State(state): State<AppState>, Query(query): Query<FeedQuery>) -> Response {
    let params = FeedParams {
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
        since_hours: query.since_hours,
        source_id: query.source,
        hide_ads: query.hide_ads.unwrap_or(false),
    };

    let fetch_params = params.clone();
    let articles = match state
        .queue
        .execute_read(move |pool| async move { store::get_feed_articles(&pool, &fetch_params).await }, None)
        .await
    {
        Ok(articles) => articles,
        Err(e) => return internal_error("feed", e),
    };

    let mut items = Vec::with_capacity(articles.len());
    for article in &articles {
        let value = article_json(&state.pool, article, false).await;
        if let Some(ref wanted) = query.category {
            let matches = value["categories"]
                .as_array()
                .map(|cats| cats.iter().any(|c| c["name"] == wanted.as_str()))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        items.push(value);
    }

    Json(json!({
        "articles": items,
        "limit": params.limit,
        "offset": params.offset,
    }))
    .into_response()
}

async fn article_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let article = match state
        .queue
        .execute_read(move |pool| async move { store::get_article_by_id(&pool, id).await }, None)
        .await
    {
        Ok(Some(article)) => article,
        Ok(None) => return (StatusCode::NOT_FOUND, "Article not found").into_response(),
        Err(e) => return internal_error("article", e),
    };

    Json(article_json(&state.pool, &article, true).await).into_response()
}

#[derive(Debug, Deserialize)]
struct CategoriesQuery {
    since_hours: Option<i64>,
}

async fn categories_handler(State(state): State<AppState>, Query(query): Query<CategoriesQuery>) -> Response {
    let since_hours = query.since_hours.unwrap_or(CATEGORY_COUNT_WINDOW_HOURS);
    let params = FeedParams {
        limit: 200,
        offset: 0,
        since_hours: Some(since_hours),
        source_id: None,
        hide_ads: false,
    };
    let articles = match state
        .queue
        .execute_read(move |pool| async move { store::get_feed_articles(&pool, &params).await }, None)
        .await
    {
        Ok(articles) => articles,
        Err(e) => return internal_error("categories", e),
    };

    let mut counts: Vec<(String, String, String, i64)> = FIXED_CATEGORIES
        .iter()
        .map(|(name, display, color)| (name.to_string(), display.to_string(), color.to_string(), 0))
        .collect();

    for article in &articles {
        let value = article_json(&state.pool, article, false).await;
        if let Some(primary) = value["primary_category"].as_str()
            && let Some(entry) = counts.iter_mut().find(|(name, _, _, _)| name == primary)
        {
            entry.3 += 1;
        }
    }

    let ads = store::count_advertisements(&state.pool, Some(since_hours)).await.unwrap_or(0);

    let mut body: Vec<serde_json::Value> = counts
        .into_iter()
        .map(|(name, display_name, color, count)| {
            json!({"name": name, "display_name": display_name, "color": color, "count": count})
        })
        .collect();
    body.push(json!({
        "name": "advertisements",
        "display_name": "Реклама",
        "color": "#ff6b6b",
        "count": ads,
        "pseudo": true,
    }));

    Json(json!({"categories": body, "since_hours": since_hours})).into_response()
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<i64>,
    offset: Option<i64>,
    category: Option<String>,
    since_hours: Option<i64>,
    sort: Option<String>,
    hide_ads: Option<bool>,
}

/// Relevance: 3 per word hit in the title, 2 in the summary, 1 in the
/// content. Every word must match somewhere (AND-of-words).
fn relevance(article: &Article, words: &[String]) -> i64 {
    let title = article.title.to_lowercase();
    let summary = article.summary.as_deref().unwrap_or("").to_lowercase();
    let content = article.content.as_deref().unwrap_or("").to_lowercase();

    let mut score = 0;
    for word in words {
        if title.contains(word.as_str()) {
            score += 3;
        }
        if summary.contains(word.as_str()) {
            score += 2;
        }
        if content.contains(word.as_str()) {
            score += 1;
        }
    }
    score
}

async fn search_handler(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let words: Vec<String> = query.q.to_lowercase().split_whitespace().map(|w| w.to_string()).collect();
    if words.is_empty() {
        return (StatusCode::BAD_REQUEST, "q must not be empty").into_response();
    }

    let search_words = words.clone();
    let since_hours = query.since_hours;
    let hide_ads = query.hide_ads.unwrap_or(false);
    let mut articles = match state
        .queue
        .execute_read(
            move |pool| async move { store::search_articles(&pool, &search_words, since_hours, hide_ads, 500).await },
            None,
        )
        .await
    {
        Ok(articles) => articles,
        Err(e) => return internal_error("search", e),
    };

    match query.sort.as_deref().unwrap_or("relevance") {
        "date" => articles.sort_by(|a, b| {
            b.published_at
                .unwrap_or(b.fetched_at)
                .cmp(&a.published_at.unwrap_or(a.fetched_at))
        }),
        "title" => articles.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase())),
        _ => articles.sort_by_key(|a| std::cmp::Reverse(relevance(a, &words))),
    }

    let offset = query.offset.unwrap_or(0).max(0) as usize;
    let limit = query.limit.unwrap_or(50).clamp(1, 200) as usize;

    let mut items = Vec::new();
    for article in articles.iter() {
        let mut value = article_json(&state.pool, article, false).await;
        if let Some(ref wanted) = query.category {
            let matches = value["categories"]
                .as_array()
                .map(|cats| cats.iter().any(|c| c["name"] == wanted.as_str()))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        value["relevance"] = json!(relevance(article, &words));
        items.push(value);
    }

    let total = items.len();
    let page: Vec<_> = items.into_iter().skip(offset).take(limit).collect();

    Json(json!({"query": query.q, "total": total, "articles": page})).into_response()
}

// ── Operations ─────────────────────────────────────────────────────────

async fn process_run_handler(State(state): State<AppState>) -> Response {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_full_cycle().await {
            warn!(error = %e, "manual cycle failed");
        }
    });
    Json(json!({"status": "started"})).into_response()
}

#[derive(Debug, Deserialize)]
struct ReprocessQuery {
    limit: Option<i64>,
    reextract: Option<bool>,
}

async fn reprocess_handler(State(state): State<AppState>, Query(query): Query<ReprocessQuery>) -> Response {
    match state
        .processor
        .reprocess_failed_extractions(query.limit.unwrap_or(50), query.reextract.unwrap_or(false))
        .await
    {
        Ok(stats) => Json(json!({
            "candidates": stats.candidates,
            "reset": stats.reset,
            "reextracted": stats.reextracted,
            "enrichment": stats.enrichment,
        }))
        .into_response(),
        Err(e) => internal_error("reprocess", e),
    }
}

async fn send_digest_handler(State(state): State<AppState>) -> Response {
    let outcome = state.orchestrator.send_telegram_digest().await;
    Json(json!({
        "success": outcome.success,
        "parts_sent": outcome.parts_sent,
        "parts_total": outcome.parts_total,
        "detail": outcome.detail,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct SummariesQuery {
    date: Option<String>,
    force_regenerate: Option<bool>,
}

async fn generate_summaries_handler(State(state): State<AppState>, Query(query): Query<SummariesQuery>) -> Response {
    let date = match query.date {
        Some(ref s) => match chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => return (StatusCode::BAD_REQUEST, "date must be YYYY-MM-DD").into_response(),
        },
        None => Utc::now().date_naive(),
    };

    match state
        .digest_builder
        .ensure_daily_summaries(date, query.force_regenerate.unwrap_or(false))
        .await
    {
        Ok(count) => Json(json!({"date": date.to_string(), "categories": count})).into_response(),
        Err(e) => internal_error("summaries", e),
    }
}

// ── Schedule ───────────────────────────────────────────────────────────

async fn schedule_settings_handler(State(state): State<AppState>) -> Response {
    match state
        .queue
        .execute_read(move |pool| async move { store::get_schedule_settings(&pool).await }, None)
        .await
    {
        Ok(settings) => {
            let body: Vec<_> = settings.iter().map(schedule_json).collect();
            Json(json!({"settings": body})).into_response()
        }
        Err(e) => internal_error("schedule settings", e),
    }
}

fn schedule_json(setting: &crate::models::ScheduleSetting) -> serde_json::Value {
    json!({
        "task_name": setting.task_name,
        "enabled": setting.enabled,
        "schedule_type": setting.schedule_type,
        "hour": setting.hour,
        "minute": setting.minute,
        "weekdays": setting.weekdays(),
        "timezone": setting.timezone,
        "task_config": setting.task_config(),
        "last_run": setting.last_run,
        "next_run": setting.next_run,
        "is_running": setting.is_running,
    })
}

async fn schedule_update_handler(
    State(state): State<AppState>,
    Path(task_name): Path<String>,
    Json(update): Json<ScheduleUpdate>,
) -> Response {
    if let Some(ref schedule_type) = update.schedule_type
        && !matches!(schedule_type.as_str(), "daily" | "hourly" | "interval")
    {
        return (StatusCode::BAD_REQUEST, "schedule_type must be daily, hourly, or interval").into_response();
    }
    if let Some(hour) = update.hour
        && !(0..=23).contains(&hour)
    {
        return (StatusCode::BAD_REQUEST, "hour must be 0..23").into_response();
    }
    if let Some(minute) = update.minute
        && !(0..=59).contains(&minute)
    {
        return (StatusCode::BAD_REQUEST, "minute must be 0..59").into_response();
    }
    if let Some(ref weekdays) = update.weekdays
        && weekdays.iter().any(|d| !(1..=7).contains(d))
    {
        return (StatusCode::BAD_REQUEST, "weekdays must be within 1..7").into_response();
    }
    if let Some(ref tz) = update.timezone
        && tz.parse::<chrono_tz::Tz>().is_err()
    {
        return (StatusCode::BAD_REQUEST, "unknown timezone").into_response();
    }

    let result = state
        .queue
        .execute_write(
            move |pool| async move { store::update_schedule_setting(&pool, &task_name, &update).await },
            None,
        )
        .await;

    match result {
        Ok(Some(setting)) => Json(schedule_json(&setting)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Unknown task").into_response(),
        Err(e) => internal_error("schedule update", e),
    }
}

async fn schedule_status_handler(State(state): State<AppState>) -> Response {
    match store::get_schedule_settings(&state.pool).await {
        Ok(settings) => {
            let body: Vec<_> = settings
                .iter()
                .map(|s| {
                    json!({
                        "task_name": s.task_name,
                        "enabled": s.enabled,
                        "is_running": s.is_running,
                        "last_run": s.last_run,
                        "next_run": s.next_run,
                    })
                })
                .collect();
            Json(json!({"tasks": body})).into_response()
        }
        Err(e) => internal_error("schedule status", e),
    }
}

// ── Stats ──────────────────────────────────────────────────────────────

async fn stats_queue_handler(State(state): State<AppState>) -> Response {
    Json(state.queue.stats()).into_response()
}

async fn stats_extractor_handler(State(state): State<AppState>) -> Response {
    Json(state.memory.stats().await).into_response()
}

async fn stats_dashboard_handler(State(state): State<AppState>) -> Response {
    let stats = match store::get_recent_stats(&state.pool, 7).await {
        Ok(stats) => stats,
        Err(e) => return internal_error("dashboard", e),
    };
    let sources = store::get_sources(&state.pool, false).await.unwrap_or_default();
    let ads = store::count_advertisements(&state.pool, None).await.unwrap_or(0);

    let days: Vec<_> = stats
        .iter()
        .map(|s| {
            json!({
                "date": s.date,
                "articles_fetched": s.articles_fetched,
                "articles_processed": s.articles_processed,
                "api_calls_made": s.api_calls_made,
                "errors_count": s.errors_count,
                "processing_time_seconds": s.processing_time_seconds,
            })
        })
        .collect();

    Json(json!({
        "days": days,
        "sources_total": sources.len(),
        "sources_enabled": sources.iter().filter(|s| s.enabled).count(),
        "sources_with_errors": sources.iter().filter(|s| s.error_count > 0).count(),
        "advertisements_total": ads,
        "queue": state.queue.stats(),
    }))
    .into_response()
}

// ── Source CRUD contracts ──────────────────────────────────────────────

async fn sources_list_handler(State(state): State<AppState>) -> Response {
    match store::get_sources(&state.pool, false).await {
        Ok(sources) => {
            let body: Vec<_> = sources
                .iter()
                .map(|s| {
                    json!({
                        "id": s.id,
                        "name": s.name,
                        "source_type": s.source_type,
                        "url": s.url,
                        "enabled": s.enabled,
                        "fetch_interval_seconds": s.fetch_interval_seconds,
                        "last_fetch": s.last_fetch,
                        "last_success": s.last_success,
                        "last_error": s.last_error,
                        "error_count": s.error_count,
                    })
                })
                .collect();
            Json(json!({"sources": body})).into_response()
        }
        Err(e) => internal_error("sources list", e),
    }
}

async fn sources_create_handler(State(state): State<AppState>, Json(config): Json<SourceConfig>) -> Response {
    match state.source_manager.create_source(&config).await {
        Ok(source) => Json(json!({"id": source.id, "name": source.name, "enabled": source.enabled})).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SourceUpdateBody {
    name: Option<String>,
    url: Option<String>,
    enabled: Option<bool>,
    fetch_interval_seconds: Option<i64>,
    config: Option<serde_json::Value>,
}

async fn sources_update_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SourceUpdateBody>,
) -> Response {
    let config_json = body.config.as_ref().map(|c| c.to_string());
    match store::update_source_fields(
        &state.pool,
        id,
        body.name.as_deref(),
        body.url.as_deref(),
        body.enabled,
        body.fetch_interval_seconds,
        config_json.as_deref(),
    )
    .await
    {
        Ok(Some(source)) => Json(json!({"id": source.id, "name": source.name, "enabled": source.enabled})).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Source not found").into_response(),
        Err(e) => internal_error("source update", e),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    delete_articles: Option<bool>,
}

async fn sources_delete_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    match state
        .source_manager
        .delete_source(id, query.delete_articles.unwrap_or(false))
        .await
    {
        Ok(true) => Json(json!({"deleted": true})).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Source not found").into_response(),
        Err(e) => internal_error("source delete", e),
    }
}

async fn sources_test_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.source_manager.test_source_connection(id).await {
        Ok(connected) => Json(json!({"connected": connected})).into_response(),
        Err(e) => internal_error("source test", e),
    }
}
