use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub source_type: String,
    pub url: String,
    pub enabled: bool,
    /// Free-form per-source settings (JSON).
    pub config: String,
    pub fetch_interval_seconds: i64,
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Article {
    pub id: i64,
    /// Null once the owning source has been deleted with articles kept.
    pub source_id: Option<i64>,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    /// JSON list of MediaFile.
    pub media_files: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub hash_content: Option<String>,
    pub summary_processed: bool,
    pub category_processed: bool,
    pub ad_processed: bool,
    pub is_advertisement: bool,
    pub ad_confidence: f64,
    pub ad_type: Option<String>,
    pub ad_reasoning: Option<String>,
    /// JSON list of marker strings.
    pub ad_markers: String,
}

impl Article {
    pub fn media_files(&self) -> Vec<MediaFile> {
        serde_json::from_str(&self.media_files).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub color: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ArticleCategoryRow {
    pub id: i64,
    pub article_id: i64,
    pub category_id: Option<i64>,
    /// Raw label as produced by the model.
    pub ai_category: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryMapping {
    pub id: i64,
    pub ai_category: String,
    pub fixed_category: String,
    pub confidence_threshold: f64,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduleSetting {
    pub id: i64,
    pub task_name: String,
    pub enabled: bool,
    pub schedule_type: String,
    pub hour: i64,
    pub minute: i64,
    /// JSON set over 1..7 (Monday = 1).
    pub weekdays: String,
    pub timezone: String,
    /// JSON key/value task settings (e.g. interval_minutes).
    pub task_config: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub is_running: bool,
}

impl ScheduleSetting {
    pub fn weekdays(&self) -> Vec<u32> {
        serde_json::from_str(&self.weekdays).unwrap_or_default()
    }

    pub fn task_config(&self) -> serde_json::Value {
        serde_json::from_str(&self.task_config).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ProcessingStat {
    pub id: i64,
    pub date: NaiveDate,
    pub articles_fetched: i64,
    pub articles_processed: i64,
    pub api_calls_made: i64,
    pub errors_count: i64,
    pub processing_time_seconds: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DailySummary {
    pub id: i64,
    pub date: NaiveDate,
    pub category: String,
    pub summary_text: String,
    pub articles_count: i64,
    pub created_at: DateTime<Utc>,
}

/// One media attachment discovered in a message or article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaFile {
    pub media_type: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_data: Option<serde_json::Value>,
}

impl MediaFile {
    pub fn new(media_type: &str, url: String) -> Self {
        Self {
            media_type: media_type.to_string(),
            url,
            thumbnail: None,
            source_tag: None,
            duration: None,
            file_name: None,
            file_size: None,
            poll_data: None,
            location_data: None,
        }
    }
}

/// Advertising verdict, produced by the AI client or a fetcher-side detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdVerdict {
    pub is_advertisement: bool,
    pub confidence: f64,
    pub ad_type: Option<String>,
    pub reasoning: String,
    pub markers: Vec<String>,
}

/// Normalized item emitted by a fetcher, not yet persisted.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub media_files: Vec<MediaFile>,
    pub published_at: Option<DateTime<Utc>>,
    pub raw: RawData,
}

/// Side-channel data carried alongside a normalized item.
#[derive(Debug, Clone, Default)]
pub struct RawData {
    pub guid: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    /// Telegram message permalink (when the primary url is an external link).
    pub telegram_url: Option<String>,
    pub original_link: Option<String>,
    pub external_links: Vec<String>,
    pub hashtags: Vec<String>,
    pub forwarded_from: Option<String>,
    pub channel: Option<String>,
    /// Page-monitor classification: changelog | news | blog | general.
    pub content_kind: Option<String>,
    /// Advertising verdict already computed by the fetcher (Telegram path).
    pub advertising: Option<AdVerdict>,
}

impl NewItem {
    /// All URL variants that identify this item for deduplication.
    pub fn dedup_urls(&self) -> Vec<&str> {
        let mut urls = vec![self.url.as_str()];
        if let Some(ref u) = self.raw.telegram_url
            && !urls.contains(&u.as_str())
        {
            urls.push(u);
        }
        if let Some(ref u) = self.raw.original_link
            && !urls.contains(&u.as_str())
        {
            urls.push(u);
        }
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_urls_unique() {
        let mut item = NewItem {
            url: "https://t.me/ch/123".to_string(),
            ..Default::default()
        };
        item.raw.telegram_url = Some("https://t.me/ch/123".to_string());
        item.raw.original_link = Some("https://news.rs/article".to_string());

        let urls = item.dedup_urls();
        assert_eq!(urls, vec!["https://t.me/ch/123", "https://news.rs/article"]);
    }

    #[test]
    fn media_file_roundtrip() {
        let media = MediaFile::new("image", "https://cdn.example.com/a.jpg".to_string());
        let json = serde_json::to_string(&vec![media.clone()]).unwrap();
        let back: Vec<MediaFile> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![media]);
    }
}
