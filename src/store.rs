use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::{Config, SourceConfig};
use crate::models::{
    AdVerdict, Article, ArticleCategoryRow, Category, CategoryMapping, DailySummary, NewItem, ProcessingStat,
    ScheduleSetting, Source,
};

/// All source columns in SELECT order (must match Source struct field order).
const SOURCE_COLUMNS: &str = "id, name, source_type, url, enabled, config, fetch_interval_seconds,
    last_fetch, last_success, last_error, error_count, created_at, updated_at";

/// All article columns in SELECT order (must match Article struct field order).
const ARTICLE_COLUMNS: &str = "id, source_id, title, url, content, summary, image_url, media_files,
    published_at, fetched_at, hash_content, summary_processed, category_processed, ad_processed,
    is_advertisement, ad_confidence, ad_type, ad_reasoning, ad_markers";

fn ts(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ── Sources ────────────────────────────────────────────────────────────

/// Upsert a source by name — insert or update if it already exists.
pub async fn upsert_source(pool: &SqlitePool, source: &SourceConfig) -> Result<i64> {
    let interval_secs = humantime::parse_duration(&source.fetch_interval)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(1800);
    let config_json = serde_json::to_string(&source.config).unwrap_or_else(|_| "{}".to_string());

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM sources WHERE name = ?")
        .bind(&source.name)
        .fetch_optional(pool)
        .await
        .context("checking for existing source")?;

    let id = if let Some((existing_id,)) = existing {
        sqlx::query(
            "UPDATE sources SET source_type = ?, url = ?, enabled = ?, config = ?, fetch_interval_seconds = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE id = ?",
        )
        .bind(&source.source_type)
        .bind(&source.url)
        .bind(source.enabled)
        .bind(&config_json)
        .bind(interval_secs)
        .bind(existing_id)
        .execute(pool)
        .await
        .context("updating source")?;

        debug!(name = %source.name, id = existing_id, "updated source");
        existing_id
    } else {
        let result = sqlx::query(
            "INSERT INTO sources (name, source_type, url, enabled, config, fetch_interval_seconds)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&source.name)
        .bind(&source.source_type)
        .bind(&source.url)
        .bind(source.enabled)
        .bind(&config_json)
        .bind(interval_secs)
        .execute(pool)
        .await
        .context("inserting source")?;

        let id = result.last_insert_rowid();
        debug!(name = %source.name, id, "created source");
        id
    };

    Ok(id)
}

/// Sync configured sources into the database at startup.
pub async fn sync_config_to_db(pool: &SqlitePool, config: &Config) -> Result<()> {
    for source in &config.source {
        upsert_source(pool, source).await?;
    }
    Ok(())
}

pub async fn get_sources(pool: &SqlitePool, enabled_only: bool) -> Result<Vec<Source>> {
    let query = if enabled_only {
        format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE enabled = 1 ORDER BY id")
    } else {
        format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id")
    };
    let sources = sqlx::query_as::<_, Source>(&query)
        .fetch_all(pool)
        .await
        .context("querying sources")?;
    Ok(sources)
}

pub async fn get_source_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Source>> {
    let query = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?");
    let source = sqlx::query_as::<_, Source>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("querying source by id")?;
    Ok(source)
}

/// Get-or-create by name: returns the existing source or inserts a new one.
pub async fn get_or_create_source(pool: &SqlitePool, config: &SourceConfig) -> Result<Source> {
    let id = upsert_source(pool, config).await?;
    get_source_by_id(pool, id)
        .await?
        .context("source disappeared after upsert")
}

pub async fn update_source_fields(
    pool: &SqlitePool,
    id: i64,
    name: Option<&str>,
    url: Option<&str>,
    enabled: Option<bool>,
    fetch_interval_seconds: Option<i64>,
    config_json: Option<&str>,
) -> Result<Option<Source>> {
    if get_source_by_id(pool, id).await?.is_none() {
        return Ok(None);
    }

    sqlx::query(
        "UPDATE sources SET
            name = COALESCE(?, name),
            url = COALESCE(?, url),
            enabled = COALESCE(?, enabled),
            fetch_interval_seconds = COALESCE(?, fetch_interval_seconds),
            config = COALESCE(?, config),
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?",
    )
    .bind(name)
    .bind(url)
    .bind(enabled)
    .bind(fetch_interval_seconds)
    .bind(config_json)
    .bind(id)
    .execute(pool)
    .await
    .context("updating source fields")?;

    get_source_by_id(pool, id).await
}

pub async fn delete_source(pool: &SqlitePool, id: i64, delete_articles: bool) -> Result<bool> {
    if get_source_by_id(pool, id).await?.is_none() {
        return Ok(false);
    }

    if delete_articles {
        sqlx::query("DELETE FROM articles WHERE source_id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("deleting source articles")?;
    } else {
        // Keep the articles but detach them from the doomed source
        sqlx::query("UPDATE articles SET source_id = NULL WHERE source_id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("detaching source articles")?;
    }

    sqlx::query("DELETE FROM sources WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("deleting source")?;
    Ok(true)
}

/// Enabled sources whose fetch interval has elapsed (or never fetched).
pub async fn get_sources_due_for_fetch(pool: &SqlitePool) -> Result<Vec<Source>> {
    let query = format!(
        "SELECT {SOURCE_COLUMNS} FROM sources
         WHERE enabled = 1
           AND (last_fetch IS NULL
                OR strftime('%s', 'now') - strftime('%s', last_fetch) >= fetch_interval_seconds)
         ORDER BY id"
    );
    let sources = sqlx::query_as::<_, Source>(&query)
        .fetch_all(pool)
        .await
        .context("querying sources due for fetch")?;
    Ok(sources)
}

pub async fn mark_fetch_started(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE sources SET last_fetch = ? WHERE id = ?")
        .bind(ts(now))
        .bind(id)
        .execute(pool)
        .await
        .context("marking fetch started")?;
    Ok(())
}

pub async fn mark_fetch_success(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE sources SET last_success = ?, error_count = 0, last_error = NULL WHERE id = ?")
        .bind(ts(now))
        .bind(id)
        .execute(pool)
        .await
        .context("marking fetch success")?;
    Ok(())
}

pub async fn mark_fetch_error(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE sources SET error_count = error_count + 1, last_error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await
        .context("marking fetch error")?;
    Ok(())
}

// ── Articles ───────────────────────────────────────────────────────────

/// Does any of the candidate URLs already exist in the articles table?
pub async fn any_article_url_exists(pool: &SqlitePool, urls: &[&str]) -> Result<bool> {
    if urls.is_empty() {
        return Ok(false);
    }
    let placeholders: Vec<&str> = urls.iter().map(|_| "?").collect();
    let query = format!(
        "SELECT id FROM articles WHERE url IN ({}) LIMIT 1",
        placeholders.join(", ")
    );
    let mut q = sqlx::query_as::<_, (i64,)>(&query);
    for url in urls {
        q = q.bind(url);
    }
    Ok(q.fetch_optional(pool).await.context("checking article urls")?.is_some())
}

/// Near-duplicate guard: same source, case-insensitive title, recent window.
pub async fn recent_title_exists(
    pool: &SqlitePool,
    source_id: i64,
    title: &str,
    window_days: i64,
) -> Result<bool> {
    let cutoff = ts(Utc::now() - chrono::Duration::days(window_days));
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM articles
         WHERE source_id = ? AND lower(title) = lower(?) AND fetched_at >= ?
         LIMIT 1",
    )
    .bind(source_id)
    .bind(title)
    .bind(cutoff)
    .fetch_optional(pool)
    .await
    .context("checking recent titles")?;
    Ok(row.is_some())
}

/// Insert a freshly-fetched item. Returns None when the URL is already
/// present (unique constraint races with concurrent fetches are expected).
pub async fn insert_article(
    pool: &SqlitePool,
    source_id: i64,
    item: &NewItem,
    hash_content: &str,
) -> Result<Option<i64>> {
    let media_json = serde_json::to_string(&item.media_files).unwrap_or_else(|_| "[]".to_string());
    let ad = item.raw.advertising.as_ref();
    let markers_json = ad
        .map(|a| serde_json::to_string(&a.markers).unwrap_or_else(|_| "[]".to_string()))
        .unwrap_or_else(|| "[]".to_string());

    let result = sqlx::query(
        "INSERT OR IGNORE INTO articles
            (source_id, title, url, content, summary, image_url, media_files, published_at,
             fetched_at, hash_content,
             is_advertisement, ad_confidence, ad_type, ad_reasoning, ad_markers, ad_processed)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(source_id)
    .bind(&item.title)
    .bind(&item.url)
    .bind(&item.content)
    .bind(&item.summary)
    .bind(&item.image_url)
    .bind(&media_json)
    .bind(item.published_at.map(ts))
    .bind(hash_content)
    .bind(ad.map(|a| a.is_advertisement).unwrap_or(false))
    .bind(ad.map(|a| a.confidence).unwrap_or(0.0))
    .bind(ad.and_then(|a| a.ad_type.clone()))
    .bind(ad.map(|a| a.reasoning.clone()))
    .bind(&markers_json)
    .bind(ad.is_some())
    .execute(pool)
    .await
    .context("inserting article")?;

    if result.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(result.last_insert_rowid()))
    }
}

pub async fn get_article_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Article>> {
    let query = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?");
    let article = sqlx::query_as::<_, Article>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("querying article by id")?;
    Ok(article)
}

/// Articles with at least one enrichment step still pending.
pub async fn get_unprocessed_articles(pool: &SqlitePool, limit: i64) -> Result<Vec<Article>> {
    let query = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles
         WHERE summary_processed = 0 OR category_processed = 0 OR ad_processed = 0
         ORDER BY id
         LIMIT ?"
    );
    let articles = sqlx::query_as::<_, Article>(&query)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("querying unprocessed articles")?;
    Ok(articles)
}

/// Likely failed extractions: title collapsed into the summary, or thin content.
pub async fn get_failed_extraction_candidates(pool: &SqlitePool, limit: i64) -> Result<Vec<Article>> {
    let query = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles
         WHERE (summary IS NOT NULL AND title = summary)
            OR (content IS NOT NULL AND length(content) < 1000)
         ORDER BY fetched_at DESC
         LIMIT ?"
    );
    let articles = sqlx::query_as::<_, Article>(&query)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("querying failed extraction candidates")?;
    Ok(articles)
}

pub async fn set_article_title(pool: &SqlitePool, id: i64, title: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET title = ? WHERE id = ?")
        .bind(title)
        .bind(id)
        .execute(pool)
        .await
        .context("updating article title")?;
    Ok(())
}

pub async fn set_article_content(pool: &SqlitePool, id: i64, content: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET content = ? WHERE id = ?")
        .bind(content)
        .bind(id)
        .execute(pool)
        .await
        .context("updating article content")?;
    Ok(())
}

pub async fn set_article_summary(pool: &SqlitePool, id: i64, summary: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET summary = ?, summary_processed = 1 WHERE id = ?")
        .bind(summary)
        .bind(id)
        .execute(pool)
        .await
        .context("updating article summary")?;
    Ok(())
}

pub async fn set_article_ad_verdict(pool: &SqlitePool, id: i64, verdict: &AdVerdict) -> Result<()> {
    let markers_json = serde_json::to_string(&verdict.markers).unwrap_or_else(|_| "[]".to_string());
    sqlx::query(
        "UPDATE articles SET is_advertisement = ?, ad_confidence = ?, ad_type = ?,
         ad_reasoning = ?, ad_markers = ?, ad_processed = 1
         WHERE id = ?",
    )
    .bind(verdict.is_advertisement)
    .bind(verdict.confidence)
    .bind(&verdict.ad_type)
    .bind(&verdict.reasoning)
    .bind(&markers_json)
    .bind(id)
    .execute(pool)
    .await
    .context("updating advertising verdict")?;
    Ok(())
}

/// One enrichment pass for one article commits atomically: title
/// optimization, summary, category rows, and the advertising verdict all
/// land in a single transaction, flipping only the flags whose data is
/// present.
pub async fn apply_enrichment(
    pool: &SqlitePool,
    article_id: i64,
    title: Option<&str>,
    summary: Option<&str>,
    categories: Option<&[(String, f64)]>,
    ad: Option<&AdVerdict>,
) -> Result<()> {
    let mut tx = pool.begin().await.context("starting enrichment transaction")?;

    if let Some(title) = title {
        sqlx::query("UPDATE articles SET title = ? WHERE id = ?")
            .bind(title)
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .context("updating optimized title")?;
    }

    if let Some(summary) = summary {
        sqlx::query("UPDATE articles SET summary = ?, summary_processed = 1 WHERE id = ?")
            .bind(summary)
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .context("updating summary")?;
    }

    if let Some(categories) = categories {
        sqlx::query("DELETE FROM article_categories WHERE article_id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .context("clearing categories")?;
        for (ai_category, confidence) in categories {
            if ai_category.trim().is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT INTO article_categories (article_id, category_id, ai_category, confidence)
                 VALUES (?, NULL, ?, ?)",
            )
            .bind(article_id)
            .bind(ai_category)
            .bind(confidence.clamp(0.0, 1.0))
            .execute(&mut *tx)
            .await
            .context("inserting category row")?;
        }
        sqlx::query("UPDATE articles SET category_processed = 1 WHERE id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .context("flipping category flag")?;
    }

    if let Some(verdict) = ad {
        let markers_json = serde_json::to_string(&verdict.markers).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "UPDATE articles SET is_advertisement = ?, ad_confidence = ?, ad_type = ?,
             ad_reasoning = ?, ad_markers = ?, ad_processed = 1
             WHERE id = ?",
        )
        .bind(verdict.is_advertisement)
        .bind(verdict.confidence)
        .bind(&verdict.ad_type)
        .bind(&verdict.reasoning)
        .bind(&markers_json)
        .bind(article_id)
        .execute(&mut *tx)
        .await
        .context("updating advertising fields")?;
    }

    tx.commit().await.context("committing enrichment")?;
    Ok(())
}

/// Operator force-reset: re-arm all three enrichment flags.
pub async fn reset_processing_flags(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE articles SET summary_processed = 0, category_processed = 0, ad_processed = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("resetting processing flags")?;
    Ok(())
}

/// Replace the AI category rows for an article and flip its flag, atomically.
pub async fn replace_article_categories(
    pool: &SqlitePool,
    article_id: i64,
    categories: &[(String, f64)],
) -> Result<()> {
    let mut tx = pool.begin().await.context("starting category transaction")?;

    sqlx::query("DELETE FROM article_categories WHERE article_id = ?")
        .bind(article_id)
        .execute(&mut *tx)
        .await
        .context("clearing article categories")?;

    for (ai_category, confidence) in categories {
        if ai_category.trim().is_empty() {
            continue;
        }
        sqlx::query(
            "INSERT INTO article_categories (article_id, category_id, ai_category, confidence)
             VALUES (?, NULL, ?, ?)",
        )
        .bind(article_id)
        .bind(ai_category)
        .bind(confidence.clamp(0.0, 1.0))
        .execute(&mut *tx)
        .await
        .context("inserting article category")?;
    }

    sqlx::query("UPDATE articles SET category_processed = 1 WHERE id = ?")
        .bind(article_id)
        .execute(&mut *tx)
        .await
        .context("flipping category flag")?;

    tx.commit().await.context("committing article categories")?;
    Ok(())
}

pub async fn get_article_categories(
    pool: &SqlitePool,
    article_ids: &[i64],
) -> Result<HashMap<i64, Vec<ArticleCategoryRow>>> {
    if article_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders: Vec<&str> = article_ids.iter().map(|_| "?").collect();
    let query = format!(
        "SELECT id, article_id, category_id, ai_category, confidence, created_at
         FROM article_categories WHERE article_id IN ({})
         ORDER BY confidence DESC",
        placeholders.join(", ")
    );
    let mut q = sqlx::query_as::<_, ArticleCategoryRow>(&query);
    for id in article_ids {
        q = q.bind(id);
    }
    let rows = q.fetch_all(pool).await.context("querying article categories")?;

    let mut map: HashMap<i64, Vec<ArticleCategoryRow>> = HashMap::new();
    for row in rows {
        map.entry(row.article_id).or_default().push(row);
    }
    Ok(map)
}

#[derive(Debug, Clone, Default)]
pub struct FeedParams {
    pub limit: i64,
    pub offset: i64,
    pub since_hours: Option<i64>,
    pub source_id: Option<i64>,
    pub hide_ads: bool,
}

pub async fn get_feed_articles(pool: &SqlitePool, params: &FeedParams) -> Result<Vec<Article>> {
    let mut conditions = Vec::new();
    if params.since_hours.is_some() {
        conditions.push("fetched_at >= ?");
    }
    if params.source_id.is_some() {
        conditions.push("source_id = ?");
    }
    if params.hide_ads {
        conditions.push("is_advertisement = 0");
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let query = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles {where_clause}
         ORDER BY COALESCE(published_at, fetched_at) DESC
         LIMIT ? OFFSET ?"
    );

    let mut q = sqlx::query_as::<_, Article>(&query);
    if let Some(hours) = params.since_hours {
        q = q.bind(ts(Utc::now() - chrono::Duration::hours(hours)));
    }
    if let Some(source_id) = params.source_id {
        q = q.bind(source_id);
    }
    q = q.bind(params.limit.clamp(1, 200)).bind(params.offset.max(0));

    let articles = q.fetch_all(pool).await.context("querying feed articles")?;
    Ok(articles)
}

/// Substring search candidates: every word must match title, summary, or
/// content. Relevance scoring happens at the call site.
pub async fn search_articles(
    pool: &SqlitePool,
    words: &[String],
    since_hours: Option<i64>,
    hide_ads: bool,
    limit: i64,
) -> Result<Vec<Article>> {
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let mut conditions = Vec::new();
    for _ in words {
        conditions.push("(title LIKE ? OR summary LIKE ? OR content LIKE ?)");
    }
    if since_hours.is_some() {
        conditions.push("fetched_at >= ?");
    }
    if hide_ads {
        conditions.push("is_advertisement = 0");
    }

    let query = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles WHERE {} LIMIT ?",
        conditions.join(" AND ")
    );

    let mut q = sqlx::query_as::<_, Article>(&query);
    for word in words {
        let pattern = format!("%{word}%");
        q = q.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
    }
    if let Some(hours) = since_hours {
        q = q.bind(ts(Utc::now() - chrono::Duration::hours(hours)));
    }
    q = q.bind(limit.clamp(1, 1000));

    let articles = q.fetch_all(pool).await.context("searching articles")?;
    Ok(articles)
}

pub async fn count_advertisements(pool: &SqlitePool, since_hours: Option<i64>) -> Result<i64> {
    let (query, bind_cutoff) = match since_hours {
        Some(_) => (
            "SELECT COUNT(*) AS n FROM articles WHERE is_advertisement = 1 AND fetched_at >= ?",
            true,
        ),
        None => ("SELECT COUNT(*) AS n FROM articles WHERE is_advertisement = 1", false),
    };
    let mut q = sqlx::query_as::<_, (i64,)>(query);
    if bind_cutoff {
        q = q.bind(ts(Utc::now() - chrono::Duration::hours(since_hours.unwrap())));
    }
    let (n,) = q.fetch_one(pool).await.context("counting advertisements")?;
    Ok(n)
}

/// Delete articles fetched before the cutoff. Returns deleted row count.
pub async fn delete_articles_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM articles WHERE fetched_at < ?")
        .bind(ts(cutoff))
        .execute(pool)
        .await
        .context("deleting old articles")?;
    Ok(result.rows_affected())
}

// ── Categories & mappings ──────────────────────────────────────────────

pub async fn get_categories(pool: &SqlitePool) -> Result<Vec<Category>> {
    let categories = sqlx::query_as::<_, Category>("SELECT id, name, display_name, color FROM categories ORDER BY id")
        .fetch_all(pool)
        .await
        .context("querying categories")?;
    Ok(categories)
}

pub async fn lookup_category_mapping(pool: &SqlitePool, ai_category: &str) -> Result<Option<CategoryMapping>> {
    let mapping = sqlx::query_as::<_, CategoryMapping>(
        "SELECT id, ai_category, fixed_category, confidence_threshold, is_active, usage_count, last_used
         FROM category_mappings
         WHERE ai_category = ? COLLATE NOCASE AND is_active = 1",
    )
    .bind(ai_category.trim())
    .fetch_optional(pool)
    .await
    .context("looking up category mapping")?;
    Ok(mapping)
}

pub async fn bump_mapping_usage(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE category_mappings SET usage_count = usage_count + 1,
         last_used = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("bumping mapping usage")?;
    Ok(())
}

// ── Schedule settings ──────────────────────────────────────────────────

const SCHEDULE_COLUMNS: &str = "id, task_name, enabled, schedule_type, hour, minute, weekdays,
    timezone, task_config, last_run, next_run, is_running";

pub async fn get_schedule_settings(pool: &SqlitePool) -> Result<Vec<ScheduleSetting>> {
    let query = format!("SELECT {SCHEDULE_COLUMNS} FROM schedule_settings ORDER BY id");
    let settings = sqlx::query_as::<_, ScheduleSetting>(&query)
        .fetch_all(pool)
        .await
        .context("querying schedule settings")?;
    Ok(settings)
}

pub async fn get_schedule_setting(pool: &SqlitePool, task_name: &str) -> Result<Option<ScheduleSetting>> {
    let query = format!("SELECT {SCHEDULE_COLUMNS} FROM schedule_settings WHERE task_name = ?");
    let setting = sqlx::query_as::<_, ScheduleSetting>(&query)
        .bind(task_name)
        .fetch_optional(pool)
        .await
        .context("querying schedule setting")?;
    Ok(setting)
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ScheduleUpdate {
    pub enabled: Option<bool>,
    pub schedule_type: Option<String>,
    pub hour: Option<i64>,
    pub minute: Option<i64>,
    pub weekdays: Option<Vec<u32>>,
    pub timezone: Option<String>,
    pub task_config: Option<serde_json::Value>,
}

pub async fn update_schedule_setting(
    pool: &SqlitePool,
    task_name: &str,
    update: &ScheduleUpdate,
) -> Result<Option<ScheduleSetting>> {
    if get_schedule_setting(pool, task_name).await?.is_none() {
        return Ok(None);
    }

    let weekdays_json = update.weekdays.as_ref().map(|w| serde_json::to_string(w).unwrap_or_default());
    let task_config_json = update.task_config.as_ref().map(|c| c.to_string());

    sqlx::query(
        "UPDATE schedule_settings SET
            enabled = COALESCE(?, enabled),
            schedule_type = COALESCE(?, schedule_type),
            hour = COALESCE(?, hour),
            minute = COALESCE(?, minute),
            weekdays = COALESCE(?, weekdays),
            timezone = COALESCE(?, timezone),
            task_config = COALESCE(?, task_config),
            next_run = NULL
         WHERE task_name = ?",
    )
    .bind(update.enabled)
    .bind(&update.schedule_type)
    .bind(update.hour)
    .bind(update.minute)
    .bind(weekdays_json)
    .bind(&update.timezone)
    .bind(task_config_json)
    .bind(task_name)
    .execute(pool)
    .await
    .context("updating schedule setting")?;

    get_schedule_setting(pool, task_name).await
}

pub async fn set_task_running(pool: &SqlitePool, task_name: &str, running: bool) -> Result<()> {
    sqlx::query("UPDATE schedule_settings SET is_running = ? WHERE task_name = ?")
        .bind(running)
        .bind(task_name)
        .execute(pool)
        .await
        .context("setting task running flag")?;
    Ok(())
}

pub async fn set_task_runtimes(
    pool: &SqlitePool,
    task_name: &str,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        "UPDATE schedule_settings SET
            last_run = COALESCE(?, last_run),
            next_run = ?
         WHERE task_name = ?",
    )
    .bind(last_run.map(ts))
    .bind(next_run.map(ts))
    .bind(task_name)
    .execute(pool)
    .await
    .context("setting task runtimes")?;
    Ok(())
}

// ── Processing stats ───────────────────────────────────────────────────

/// Additive daily upsert: counters only grow within a day.
pub async fn record_cycle_stats(
    pool: &SqlitePool,
    date: NaiveDate,
    fetched: i64,
    processed: i64,
    api_calls: i64,
    errors: i64,
    seconds: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO processing_stats (date, articles_fetched, articles_processed, api_calls_made, errors_count, processing_time_seconds)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(date) DO UPDATE SET
            articles_fetched = articles_fetched + excluded.articles_fetched,
            articles_processed = articles_processed + excluded.articles_processed,
            api_calls_made = api_calls_made + excluded.api_calls_made,
            errors_count = errors_count + excluded.errors_count,
            processing_time_seconds = processing_time_seconds + excluded.processing_time_seconds",
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .bind(fetched)
    .bind(processed)
    .bind(api_calls)
    .bind(errors)
    .bind(seconds)
    .execute(pool)
    .await
    .context("recording cycle stats")?;
    Ok(())
}

pub async fn get_processing_stat(pool: &SqlitePool, date: NaiveDate) -> Result<Option<ProcessingStat>> {
    let stat = sqlx::query_as::<_, ProcessingStat>(
        "SELECT id, date, articles_fetched, articles_processed, api_calls_made, errors_count, processing_time_seconds
         FROM processing_stats WHERE date = ?",
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .fetch_optional(pool)
    .await
    .context("querying processing stat")?;
    Ok(stat)
}

pub async fn get_recent_stats(pool: &SqlitePool, days: i64) -> Result<Vec<ProcessingStat>> {
    let cutoff = (Utc::now().date_naive() - chrono::Duration::days(days)).format("%Y-%m-%d").to_string();
    let stats = sqlx::query_as::<_, ProcessingStat>(
        "SELECT id, date, articles_fetched, articles_processed, api_calls_made, errors_count, processing_time_seconds
         FROM processing_stats WHERE date >= ? ORDER BY date DESC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("querying recent stats")?;
    Ok(stats)
}

// ── Daily summaries ────────────────────────────────────────────────────

pub async fn get_daily_summaries(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<DailySummary>> {
    let summaries = sqlx::query_as::<_, DailySummary>(
        "SELECT id, date, category, summary_text, articles_count, created_at
         FROM daily_summaries WHERE date = ?
         ORDER BY articles_count DESC",
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .fetch_all(pool)
    .await
    .context("querying daily summaries")?;
    Ok(summaries)
}

pub async fn upsert_daily_summary(
    pool: &SqlitePool,
    date: NaiveDate,
    category: &str,
    summary_text: &str,
    articles_count: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO daily_summaries (date, category, summary_text, articles_count)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(date, category) DO UPDATE SET
            summary_text = excluded.summary_text,
            articles_count = excluded.articles_count",
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .bind(category)
    .bind(summary_text)
    .bind(articles_count)
    .execute(pool)
    .await
    .context("upserting daily summary")?;
    Ok(())
}

pub async fn delete_daily_summaries(pool: &SqlitePool, date: NaiveDate) -> Result<u64> {
    let result = sqlx::query("DELETE FROM daily_summaries WHERE date = ?")
        .bind(date.format("%Y-%m-%d").to_string())
        .execute(pool)
        .await
        .context("deleting daily summaries")?;
    Ok(result.rows_affected())
}

/// Articles fetched on the given day, with their category rows.
pub async fn get_articles_for_date(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<Article>> {
    let start = format!("{}T00:00:00Z", date.format("%Y-%m-%d"));
    let end = format!(
        "{}T00:00:00Z",
        (date + chrono::Duration::days(1)).format("%Y-%m-%d")
    );
    let query = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles
         WHERE fetched_at >= ? AND fetched_at < ?
         ORDER BY fetched_at DESC"
    );
    let articles = sqlx::query_as::<_, Article>(&query)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await
        .context("querying articles for date")?;
    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn rss_source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            source_type: "rss".to_string(),
            url: format!("https://example.com/{name}.xml"),
            fetch_interval: "30m".to_string(),
            enabled: true,
            config: serde_json::Value::Null,
        }
    }

    fn item(url: &str, title: &str) -> NewItem {
        NewItem {
            title: title.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_source_is_idempotent() {
        let pool = db::test_pool().await;
        let id1 = upsert_source(&pool, &rss_source("a")).await.unwrap();
        let id2 = upsert_source(&pool, &rss_source("a")).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(get_sources(&pool, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_url_inserts_single_row() {
        let pool = db::test_pool().await;
        let source_id = upsert_source(&pool, &rss_source("a")).await.unwrap();

        let first = insert_article(&pool, source_id, &item("https://ex.com/a1", "One"), "h1")
            .await
            .unwrap();
        let second = insert_article(&pool, source_id, &item("https://ex.com/a1", "One again"), "h2")
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none(), "second insert with the same url is ignored");
    }

    #[tokio::test]
    async fn url_existence_covers_variants() {
        let pool = db::test_pool().await;
        let source_id = upsert_source(&pool, &rss_source("a")).await.unwrap();
        insert_article(&pool, source_id, &item("https://news.rs/article", "T"), "h")
            .await
            .unwrap();

        assert!(
            any_article_url_exists(&pool, &["https://t.me/ch/123", "https://news.rs/article"])
                .await
                .unwrap()
        );
        assert!(!any_article_url_exists(&pool, &["https://other.rs/x"]).await.unwrap());
    }

    #[tokio::test]
    async fn recent_title_dedup_is_case_insensitive() {
        let pool = db::test_pool().await;
        let source_id = upsert_source(&pool, &rss_source("a")).await.unwrap();
        insert_article(&pool, source_id, &item("https://ex.com/1", "Breaking News"), "h")
            .await
            .unwrap();

        assert!(recent_title_exists(&pool, source_id, "breaking news", 7).await.unwrap());
        assert!(!recent_title_exists(&pool, source_id, "other title", 7).await.unwrap());
    }

    #[tokio::test]
    async fn replace_categories_flips_flag_atomically() {
        let pool = db::test_pool().await;
        let source_id = upsert_source(&pool, &rss_source("a")).await.unwrap();
        let id = insert_article(&pool, source_id, &item("https://ex.com/1", "T"), "h")
            .await
            .unwrap()
            .unwrap();

        replace_article_categories(&pool, id, &[("Business".to_string(), 0.9), ("Tech".to_string(), 0.4)])
            .await
            .unwrap();

        let article = get_article_by_id(&pool, id).await.unwrap().unwrap();
        assert!(article.category_processed);

        let cats = get_article_categories(&pool, &[id]).await.unwrap();
        let rows = cats.get(&id).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.category_id.is_none()));
        assert_eq!(rows[0].ai_category, "Business");
    }

    #[tokio::test]
    async fn processing_stats_accumulate_within_day() {
        let pool = db::test_pool().await;
        let today = Utc::now().date_naive();

        record_cycle_stats(&pool, today, 5, 3, 2, 0, 10).await.unwrap();
        record_cycle_stats(&pool, today, 2, 1, 1, 1, 5).await.unwrap();

        let stat = get_processing_stat(&pool, today).await.unwrap().unwrap();
        assert_eq!(stat.articles_fetched, 7);
        assert_eq!(stat.articles_processed, 4);
        assert_eq!(stat.api_calls_made, 3);
        assert_eq!(stat.errors_count, 1);
        assert_eq!(stat.processing_time_seconds, 15);
    }

    #[tokio::test]
    async fn feed_hides_ads_when_asked() {
        let pool = db::test_pool().await;
        let source_id = upsert_source(&pool, &rss_source("a")).await.unwrap();

        insert_article(&pool, source_id, &item("https://ex.com/1", "News"), "h1")
            .await
            .unwrap();
        let mut ad_item = item("https://ex.com/2", "Buy now");
        ad_item.raw.advertising = Some(AdVerdict {
            is_advertisement: true,
            confidence: 0.85,
            ad_type: Some("product_promotion".to_string()),
            reasoning: "sales pitch".to_string(),
            markers: vec!["call_to_action".to_string()],
        });
        insert_article(&pool, source_id, &ad_item, "h2").await.unwrap();

        let all = get_feed_articles(
            &pool,
            &FeedParams {
                limit: 50,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(all.len(), 2);

        let clean = get_feed_articles(
            &pool,
            &FeedParams {
                limit: 50,
                hide_ads: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].url, "https://ex.com/1");

        assert_eq!(count_advertisements(&pool, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_requires_all_words() {
        let pool = db::test_pool().await;
        let source_id = upsert_source(&pool, &rss_source("a")).await.unwrap();

        let mut a = item("https://ex.com/1", "Apple earnings up");
        a.content = Some("Apple reported strong quarterly earnings".to_string());
        insert_article(&pool, source_id, &a, "h1").await.unwrap();

        let mut b = item("https://ex.com/2", "Banana prices");
        b.content = Some("Banana crops failed".to_string());
        insert_article(&pool, source_id, &b, "h2").await.unwrap();

        let hits = search_articles(
            &pool,
            &["apple".to_string(), "earnings".to_string()],
            None,
            false,
            100,
        )
        .await
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://ex.com/1");
    }

    #[tokio::test]
    async fn schedule_settings_update_and_read() {
        let pool = db::test_pool().await;

        let settings = get_schedule_settings(&pool).await.unwrap();
        assert_eq!(settings.len(), 4);

        let update = ScheduleUpdate {
            enabled: Some(true),
            hour: Some(7),
            minute: Some(30),
            ..Default::default()
        };
        let updated = update_schedule_setting(&pool, "telegram_digest", &update)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.enabled);
        assert_eq!(updated.hour, 7);
        assert_eq!(updated.minute, 30);

        assert!(
            update_schedule_setting(&pool, "no_such_task", &ScheduleUpdate::default())
                .await
                .unwrap()
                .is_none()
        );
    }
}
