use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::ai_client::AiClient;
use crate::browser::BrowserPool;
use crate::extractor::{domain_of, sanitize_for_ai};
use crate::extractor_memory::DomainMemory;
use crate::http::{HttpClient, browser_headers};
use crate::models::NewItem;

const DEFAULT_ARTICLE_SELECTORS: &[&str] = &[
    "article",
    ".article",
    ".news-item",
    ".post",
    ".entry",
    ".changelog-item",
    ".update-item",
    ".release-note",
    ".content li",
    ".main li",
    "ul.updates li",
    "ul.news li",
    ".content > div",
    ".main > div",
    ".updates > div",
    r#"[class*="item"]"#,
    r#"[class*="post"]"#,
];

const DEFAULT_TITLE_SELECTORS: &[&str] = &[
    "h1", "h2", "h3", "h4", ".title", ".headline", ".heading", "a[href]", ".post-title", ".article-title",
];

const DEFAULT_LINK_SELECTORS: &[&str] = &["a[href]", ".link", ".read-more", ".permalink"];

const DEFAULT_DATE_SELECTORS: &[&str] = &[
    "time[datetime]",
    "time",
    "[datetime]",
    ".date",
    ".timestamp",
    ".published",
    ".post-date",
    ".article-date",
    ".entry-date",
    ".release-date",
    ".changelog-date",
    r#"[class*="date"]"#,
];

fn sel(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageMonitorSettings {
    pub article_selectors: Vec<String>,
    pub title_selectors: Vec<String>,
    pub link_selectors: Vec<String>,
    pub date_selectors: Vec<String>,
    pub min_title_length: usize,
    pub max_articles_per_check: usize,
    pub use_browser: bool,
    pub reanalyze_after_failures: u32,
}

impl Default for PageMonitorSettings {
    fn default() -> Self {
        Self {
            article_selectors: Vec::new(),
            title_selectors: Vec::new(),
            link_selectors: Vec::new(),
            date_selectors: Vec::new(),
            min_title_length: 10,
            max_articles_per_check: 20,
            use_browser: true,
            reanalyze_after_failures: 5,
        }
    }
}

/// Snapshot persisted between checks to detect new content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub content_hash: String,
    pub article_hashes: HashSet<String>,
    pub timestamp: DateTime<Utc>,
    pub selectors_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
    pub kind: String,
}

/// Adaptive monitor for pages without feeds. Extracts candidate items
/// with learned, configured, then default selectors; detects new content
/// by comparing per-item hashes against the previous snapshot; falls back
/// to AI structure study when the page defeats the selector sets.
pub struct PageMonitor {
    http: Arc<HttpClient>,
    browser: Arc<BrowserPool>,
    memory: Arc<DomainMemory>,
    ai: Option<Arc<AiClient>>,
    name: String,
    url: String,
    domain: String,
    settings: PageMonitorSettings,
    config: serde_json::Value,
    snapshot: Option<PageSnapshot>,
    failure_count: u32,
}

impl PageMonitor {
    pub fn from_source(
        http: Arc<HttpClient>,
        browser: Arc<BrowserPool>,
        memory: Arc<DomainMemory>,
        ai: Option<Arc<AiClient>>,
        name: String,
        url: String,
        config: &serde_json::Value,
    ) -> Self {
        let settings: PageMonitorSettings =
            serde_json::from_value(config.clone()).unwrap_or_default();
        let snapshot = config
            .get("snapshot")
            .and_then(|s| serde_json::from_value(s.clone()).ok());
        let failure_count = config.get("failure_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let domain = domain_of(&url);

        Self {
            http,
            browser,
            memory,
            ai,
            name,
            url,
            domain,
            settings,
            config: config.clone(),
            snapshot,
            failure_count,
        }
    }

    /// Updated source config carrying the snapshot and failure counter,
    /// to be written back by the source manager.
    pub fn state_json(&self) -> serde_json::Value {
        let mut config = if self.config.is_object() {
            self.config.clone()
        } else {
            serde_json::json!({})
        };
        if let Some(obj) = config.as_object_mut() {
            if let Some(ref snapshot) = self.snapshot {
                obj.insert("snapshot".to_string(), serde_json::to_value(snapshot).unwrap_or_default());
            }
            obj.insert("failure_count".to_string(), serde_json::json!(self.failure_count));
        }
        config
    }

    pub async fn fetch_articles(&mut self, limit: Option<usize>) -> Result<Vec<NewItem>> {
        let learned = self.memory.page_structure(&self.domain).await.unwrap_or_default();

        let html = match self.fetch_page().await {
            Ok(html) => html,
            Err(e) => {
                self.failure_count += 1;
                warn!(source = %self.name, failures = self.failure_count, error = %e, "page snapshot failed");
                if self.failure_count >= self.settings.reanalyze_after_failures {
                    // Nothing to analyze without a page; the counter keeps
                    // the forced re-analysis armed for the next good fetch.
                    debug!(source = %self.name, "re-analysis armed after repeated failures");
                }
                return Err(e);
            }
        };

        let force_reanalyze = self.failure_count >= self.settings.reanalyze_after_failures;
        self.failure_count = 0;

        let (mut items, mut selectors_used) =
            extract_items(&html, &learned.container_selectors, &self.settings, &self.url);

        let needs_study =
            force_reanalyze || is_list_page_fallback(&items, &self.url);
        if needs_study && let Some(proposal) = self.study_structure(&html).await {
            let (retried, retried_selectors) =
                extract_items(&html, &proposal, &self.settings, &self.url);
            if !retried.is_empty() {
                items = retried;
                selectors_used = retried_selectors;
            }
        }

        let new_snapshot = PageSnapshot {
            content_hash: hash_str(&html),
            article_hashes: items.iter().map(hash_item).collect(),
            timestamp: Utc::now(),
            selectors_used,
        };

        let new_items: Vec<PageItem> = match self.snapshot {
            // Only items whose hash was absent from the previous snapshot
            Some(ref previous) => items
                .into_iter()
                .filter(|item| !previous.article_hashes.contains(&hash_item(item)))
                .collect(),
            // First snapshot: everything is new
            None => {
                info!(source = %self.name, "first snapshot taken, all extracted items are new");
                items
            }
        };

        self.snapshot = Some(new_snapshot);

        let mut result: Vec<NewItem> = new_items.into_iter().map(|item| to_new_item(item)).collect();
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        info!(source = %self.name, count = result.len(), "page monitor found new items");
        Ok(result)
    }

    async fn fetch_page(&self) -> Result<String> {
        if self.settings.use_browser && self.browser.is_enabled() {
            match self.browser.render(&self.url).await {
                Ok(html) => return Ok(html),
                Err(e) => debug!(url = %self.url, error = %e, "browser snapshot failed, falling back to HTTP"),
            }
        }
        Ok(self.http.fetch_text(&self.url, Some(browser_headers())).await?)
    }

    /// AI structure study: propose container/title/date selectors for this
    /// page and persist them into the domain memory.
    async fn study_structure(&self, html: &str) -> Option<Vec<String>> {
        let ai = self.ai.as_ref()?;
        info!(source = %self.name, "list-page fallback detected, studying source structure");

        let sample = sanitize_for_ai(html, 8000);
        let proposal = match ai.discover_selectors(&self.url, &sample).await {
            Ok(Some(p)) => p,
            Ok(None) => return None,
            Err(e) => {
                warn!(source = %self.name, error = %e, "structure study failed");
                return None;
            }
        };

        if proposal.content_selectors.is_empty() {
            return None;
        }
        self.memory
            .record_page_structure(
                &self.domain,
                proposal.content_selectors.clone(),
                proposal.title_selectors.clone(),
                Vec::new(),
                proposal.date_selectors.clone(),
            )
            .await;
        let _ = self.memory.save().await;
        Some(proposal.content_selectors)
    }

    pub async fn test_connection(&self) -> bool {
        matches!(self.http.get(&self.url, Some(browser_headers())).await, Ok(r) if r.status == 200)
    }
}

fn to_new_item(item: PageItem) -> NewItem {
    let mut new_item = NewItem {
        title: item.title,
        url: item.link,
        content: if item.description.is_empty() { None } else { Some(item.description) },
        published_at: item.published.or_else(|| Some(Utc::now())),
        ..Default::default()
    };
    new_item.raw.content_kind = Some(item.kind);
    new_item
}

// ── Extraction (pure, no I/O) ──────────────────────────────────────────

/// Learned container selectors first, then configured overrides, then the
/// broad default list. Returns the extracted items and which selectors
/// produced them.
pub fn extract_items(
    html: &str,
    learned_containers: &[String],
    settings: &PageMonitorSettings,
    base_url: &str,
) -> (Vec<PageItem>, Vec<String>) {
    let doc = Html::parse_document(html);
    let now = Utc::now();

    let mut selector_sets: Vec<(Vec<String>, &str)> = Vec::new();
    if !learned_containers.is_empty() {
        selector_sets.push((learned_containers.to_vec(), "learned"));
    }
    if !settings.article_selectors.is_empty() {
        selector_sets.push((settings.article_selectors.clone(), "configured"));
    }
    selector_sets.push((
        DEFAULT_ARTICLE_SELECTORS.iter().map(|s| s.to_string()).collect(),
        "default",
    ));

    for (selectors, origin) in selector_sets {
        let mut items = Vec::new();
        let mut used = Vec::new();
        for selector in &selectors {
            let Some(parsed) = sel(selector) else { continue };
            let mut matched = false;
            for element in doc.select(&parsed) {
                if let Some(item) = extract_item(&element, settings, base_url, now) {
                    items.push(item);
                    matched = true;
                }
                if items.len() >= settings.max_articles_per_check * 2 {
                    break;
                }
            }
            if matched {
                used.push(selector.clone());
            }
            if items.len() >= settings.max_articles_per_check {
                break;
            }
        }

        let filtered = filter_items(items, settings);
        if !filtered.is_empty() {
            debug!(origin, count = filtered.len(), "page items extracted");
            return (filtered, used);
        }
    }

    (Vec::new(), Vec::new())
}

fn extract_item(
    element: &ElementRef,
    settings: &PageMonitorSettings,
    base_url: &str,
    now: DateTime<Utc>,
) -> Option<PageItem> {
    let title = extract_title(element, settings)?;
    let link = extract_link(element, settings, base_url)?;
    let description = element_text(element).chars().take(500).collect::<String>();
    let published = extract_date(element, settings, now);
    let kind = classify_content(&title, &description).to_string();

    Some(PageItem {
        title,
        link,
        description,
        published,
        kind,
    })
}

fn extract_title(element: &ElementRef, settings: &PageMonitorSettings) -> Option<String> {
    let selectors: Vec<&str> = if settings.title_selectors.is_empty() {
        DEFAULT_TITLE_SELECTORS.to_vec()
    } else {
        settings.title_selectors.iter().map(|s| s.as_str()).collect()
    };

    for selector in selectors {
        let Some(parsed) = sel(selector) else { continue };
        if let Some(found) = element.select(&parsed).next() {
            let text = element_text(&found);
            if !text.is_empty() {
                return Some(text.chars().take(300).collect());
            }
        }
    }

    // Fallback: the element's own first line
    let text = element_text(element);
    let first_line = text.lines().next()?.trim().to_string();
    if first_line.is_empty() { None } else { Some(first_line.chars().take(300).collect()) }
}

fn extract_link(element: &ElementRef, settings: &PageMonitorSettings, base_url: &str) -> Option<String> {
    let selectors: Vec<&str> = if settings.link_selectors.is_empty() {
        DEFAULT_LINK_SELECTORS.to_vec()
    } else {
        settings.link_selectors.iter().map(|s| s.as_str()).collect()
    };

    let base = url::Url::parse(base_url).ok()?;

    // The element itself may be the anchor
    if element.value().name() == "a"
        && let Some(href) = element.value().attr("href")
        && let Ok(absolute) = base.join(href)
    {
        return Some(absolute.to_string());
    }

    for selector in selectors {
        let Some(parsed) = sel(selector) else { continue };
        if let Some(anchor) = element.select(&parsed).next()
            && let Some(href) = anchor.value().attr("href")
            && let Ok(absolute) = base.join(href)
            && absolute.scheme().starts_with("http")
        {
            return Some(absolute.to_string());
        }
    }

    // Items without their own link belong to the page itself
    Some(base_url.to_string())
}

fn extract_date(element: &ElementRef, settings: &PageMonitorSettings, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let selectors: Vec<&str> = if settings.date_selectors.is_empty() {
        DEFAULT_DATE_SELECTORS.to_vec()
    } else {
        settings.date_selectors.iter().map(|s| s.as_str()).collect()
    };

    for selector in selectors {
        let Some(parsed) = sel(selector) else { continue };
        if let Some(found) = element.select(&parsed).next() {
            if let Some(datetime_attr) = found.value().attr("datetime")
                && let Some(parsed_date) = parse_page_date(datetime_attr, now)
            {
                return Some(parsed_date);
            }
            let text = element_text(&found);
            if let Some(parsed_date) = parse_page_date(&text, now) {
                return Some(parsed_date);
            }
        }
    }

    // Scan the element's own text for an embedded date
    let text: String = element_text(element).chars().take(300).collect();
    find_date_in_text(&text, now)
}

fn filter_items(items: Vec<PageItem>, settings: &PageMonitorSettings) -> Vec<PageItem> {
    let mut seen_titles = HashSet::new();
    let mut filtered = Vec::new();
    for item in items {
        if item.title.chars().count() < settings.min_title_length {
            continue;
        }
        if !seen_titles.insert(item.title.to_lowercase()) {
            continue;
        }
        filtered.push(item);
        if filtered.len() >= settings.max_articles_per_check {
            break;
        }
    }
    filtered
}

/// Candidate items that all point back at the page itself mean the
/// selectors grabbed a listing shell, not the entries.
pub fn is_list_page_fallback(items: &[PageItem], base_url: &str) -> bool {
    if items.len() <= 1 {
        return false;
    }
    let base = base_url.trim_end_matches('/');
    let base_links = items
        .iter()
        .filter(|item| item.link.trim_end_matches('/') == base)
        .count();
    if base_links as f64 / items.len() as f64 > 0.5 {
        return true;
    }
    let first = items[0].link.trim_end_matches('/');
    items.iter().all(|item| item.link.trim_end_matches('/') == first)
}

pub fn hash_item(item: &PageItem) -> String {
    let desc: String = item.description.chars().take(100).collect();
    hash_str(&format!("{}|{}|{}", item.title, item.link, desc))
}

fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classify by keyword patterns; at least two hits are required per class.
pub fn classify_content(title: &str, description: &str) -> &'static str {
    let text = format!("{title} {description}").to_lowercase();

    let classes: &[(&str, &[&str])] = &[
        (
            "changelog",
            &[
                r"\b(version|v\d+|\d+\.\d+)",
                r"\b(released?|updated?|fixed?|added?|improved?)",
                r"\b(feature|bug|improvement|enhancement)",
            ],
        ),
        (
            "news",
            &[
                r"\b(breaking|urgent|announced?|launched?)",
                r"\b(today|yesterday|this week|latest)",
                r"\b(update|news|press|release)",
            ],
        ),
        (
            "blog",
            &[
                r"\b(posted|published|written|authored)",
                r"\b(tutorial|guide|how.?to|tips)",
                r"\b(learn|understand|master)",
            ],
        ),
    ];

    for (kind, patterns) in classes {
        let matches = patterns
            .iter()
            .filter(|p| regex::Regex::new(p).map(|re| re.is_match(&text)).unwrap_or(false))
            .count();
        if matches >= 2 {
            return kind;
        }
    }
    "general"
}

// ── Date parsing ───────────────────────────────────────────────────────

/// Extended pattern table plus relative forms. Dates outside the
/// `[now − 2 years, now + 1 day]` window are rejected.
pub fn parse_page_date(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return accept(dt.with_timezone(&Utc), now);
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%d.%m.%Y %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return accept(naive.and_utc(), now);
        }
    }

    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%B %d, %Y",
        "%b %d, %Y",
        "%B %d %Y",
        "%b %d %Y",
        "%d %B %Y",
        "%d %b %Y",
        "%m/%d/%Y",
        "%d.%m.%Y",
        "%d-%m-%Y",
    ];
    for format in DATE_FORMATS {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, format) {
            return accept(date.and_hms_opt(0, 0, 0)?.and_utc(), now);
        }
    }

    // Month-only forms pin to the first day
    if let Ok(date) = chrono::NaiveDate::parse_from_str(&format!("{s} 1"), "%B %Y %d") {
        return accept(date.and_hms_opt(0, 0, 0)?.and_utc(), now);
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return accept(date.and_hms_opt(0, 0, 0)?.and_utc(), now);
    }

    parse_relative_date(s, now)
}

fn accept(candidate: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if candidate > now + Duration::days(1) {
        return None;
    }
    if candidate < now - Duration::days(730) {
        return None;
    }
    Some(candidate)
}

/// "2 days ago", "yesterday", "just now" and friends.
pub fn parse_relative_date(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = input.trim().to_lowercase();

    let re = regex::Regex::new(r"(\d+)\s+(second|minute|hour|day|week|month|year)s?\s+ago").expect("static regex");
    if let Some(caps) = re.captures(&s) {
        let number: i64 = caps[1].parse().ok()?;
        let delta = match &caps[2] {
            "second" => Duration::seconds(number),
            "minute" => Duration::minutes(number),
            "hour" => Duration::hours(number),
            "day" => Duration::days(number),
            "week" => Duration::weeks(number),
            "month" => Duration::days(number * 30),
            "year" => Duration::days(number * 365),
            _ => return None,
        };
        return accept(now - delta, now);
    }

    if s.contains("yesterday") {
        return Some(now - Duration::days(1));
    }
    if s.contains("today") || s.contains("just now") {
        return Some(now);
    }
    if s.contains("last week") {
        return Some(now - Duration::weeks(1));
    }
    if s.contains("last month") {
        return Some(now - Duration::days(30));
    }
    None
}

/// Look for the first parseable date embedded in free text.
fn find_date_in_text(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    const PATTERNS: &[&str] = &[
        r"\b\d{4}-\d{2}-\d{2}\b",
        r"\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}",
        r"\b(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2},?\s+\d{4}",
        r"\b\d{1,2}\s+(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{4}",
        r"\b\d{1,2}\s+(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{4}",
        r"\b\d{1,2}/\d{1,2}/\d{4}\b",
    ];
    for pattern in PATTERNS {
        let re = regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .ok()?;
        if let Some(found) = re.find(text)
            && let Some(date) = parse_page_date(found.as_str(), now)
        {
            return Some(date);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str) -> DateTime<Utc> {
        format!("{date}T12:00:00Z").parse().unwrap()
    }

    #[test]
    fn date_formats_normalize() {
        let now = at("2025-08-01");
        for input in ["July 29, 2025", "Jul 29, 2025", "29 Jul 2025", "29 July 2025", "2025-07-29"] {
            let parsed = parse_page_date(input, now).unwrap_or_else(|| panic!("failed: {input}"));
            assert_eq!(parsed.date_naive().to_string(), "2025-07-29", "input: {input}");
        }
    }

    #[test]
    fn far_future_and_ancient_rejected() {
        let now = at("2025-08-01");
        assert!(parse_page_date("2027-01-01", now).is_none(), "too far in the future");
        assert!(parse_page_date("2022-01-01", now).is_none(), "older than two years");
        assert!(parse_page_date("2025-08-02", now).is_some(), "tomorrow is inside the window");
    }

    #[test]
    fn relative_dates_resolve() {
        let now = at("2025-08-01");
        assert_eq!(
            parse_page_date("2 days ago", now).unwrap().date_naive().to_string(),
            "2025-07-30"
        );
        assert_eq!(
            parse_page_date("yesterday", now).unwrap().date_naive().to_string(),
            "2025-07-31"
        );
        assert_eq!(parse_page_date("just now", now).unwrap(), now);
    }

    #[test]
    fn classification_needs_two_hits() {
        assert_eq!(
            classify_content("Version 2.1 released", "fixed several bugs and added features"),
            "changelog"
        );
        assert_eq!(
            classify_content("Breaking news announced", "the latest update from the press office"),
            "news"
        );
        assert_eq!(classify_content("Random musings", "about nothing in particular"), "general");
    }

    const LISTING_HTML: &str = r#"<html><body><main class="content">
        <article>
            <h2>First product update shipped to customers</h2>
            <a href="/updates/first">Read more</a>
            <time datetime="2025-07-29T10:00:00Z"></time>
            <p>We released version 1.2 with improved performance.</p>
        </article>
        <article>
            <h2>Second announcement about the platform</h2>
            <a href="/updates/second">Read more</a>
            <p>Details about the second announcement and its impact.</p>
        </article>
    </main></body></html>"#;

    fn settings() -> PageMonitorSettings {
        PageMonitorSettings::default()
    }

    #[test]
    fn items_extracted_with_absolute_links() {
        let (items, used) = extract_items(LISTING_HTML, &[], &settings(), "https://ex.com/updates");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, "https://ex.com/updates/first");
        assert!(items[0].title.contains("First product update"));
        assert!(!used.is_empty());
    }

    #[test]
    fn learned_selectors_take_precedence() {
        let html = r#"<html><body>
            <div class="weird-item"><h3>Learned selector found this headline</h3><a href="/a">x</a></div>
            </body></html>"#;
        let learned = vec![".weird-item".to_string()];
        let (items, used) = extract_items(html, &learned, &settings(), "https://ex.com/");
        assert_eq!(items.len(), 1);
        assert_eq!(used, vec![".weird-item".to_string()]);
    }

    #[test]
    fn change_detection_emits_only_new_hashes() {
        let (items, _) = extract_items(LISTING_HTML, &[], &settings(), "https://ex.com/updates");
        let old_hashes: HashSet<String> = items.iter().map(hash_item).collect();

        // Second snapshot carries one extra item
        let mut second = items.clone();
        second.push(PageItem {
            title: "A brand new third entry appears".to_string(),
            link: "https://ex.com/updates/third".to_string(),
            description: "fresh".to_string(),
            published: None,
            kind: "general".to_string(),
        });

        let new: Vec<&PageItem> = second.iter().filter(|i| !old_hashes.contains(&hash_item(i))).collect();
        assert_eq!(new.len(), 1);
        assert!(new[0].title.contains("third entry"));
    }

    #[test]
    fn list_page_fallback_detection() {
        let base = "https://ex.com/updates";
        let item = |link: &str| PageItem {
            title: "A sufficiently long title".to_string(),
            link: link.to_string(),
            description: String::new(),
            published: None,
            kind: "general".to_string(),
        };

        let collapsed = vec![item(base), item("https://ex.com/updates/")];
        assert!(is_list_page_fallback(&collapsed, base));

        let healthy = vec![item("https://ex.com/a"), item("https://ex.com/b")];
        assert!(!is_list_page_fallback(&healthy, base));

        let single = vec![item(base)];
        assert!(!is_list_page_fallback(&single, base));
    }

    #[test]
    fn short_titles_filtered_and_deduped() {
        let items = vec![
            PageItem {
                title: "short".to_string(),
                link: "https://ex.com/1".to_string(),
                description: String::new(),
                published: None,
                kind: "general".to_string(),
            },
            PageItem {
                title: "A reasonable headline here".to_string(),
                link: "https://ex.com/2".to_string(),
                description: String::new(),
                published: None,
                kind: "general".to_string(),
            },
            PageItem {
                title: "A REASONABLE headline here".to_string(),
                link: "https://ex.com/3".to_string(),
                description: String::new(),
                published: None,
                kind: "general".to_string(),
            },
        ];
        let filtered = filter_items(items, &settings());
        assert_eq!(filtered.len(), 1);
    }
}
