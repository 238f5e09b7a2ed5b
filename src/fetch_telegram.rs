use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::ai_client::AiClient;
use crate::browser::BrowserPool;
use crate::error::FetchError;
use crate::extractor::ContentExtractor;
use crate::http::{HttpClient, anti_cache_headers, browser_headers};
use crate::models::NewItem;
use crate::telegram_media;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_SECS: f64 = 2.0;
const MAX_DELAY_SECS: f64 = 30.0;
const MAX_EXTERNAL_LINKS: usize = 5;
const MAX_HASHTAGS: usize = 20;
const TITLE_MAX_CHARS: usize = 120;
/// Posts shorter than this are candidates for full-content replacement.
const SHORT_CONTENT_CHARS: usize = 200;

/// Hosts that are never the "original article" behind a post.
const SOCIAL_BLACKLIST: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "vk.com",
    "ok.ru",
    "youtube.com",
    "youtu.be",
    "t.me",
    "telegram.me",
];

const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "fbclid",
    "gclid",
    "_ga",
    "mc_cid",
    "mc_eid",
];

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

/// Normalize any accepted channel spelling to the bare username:
/// `https://t.me/s/foo`, `t.me/foo`, `@foo`, and `foo` all yield `foo`.
pub fn extract_channel_username(url: &str) -> Result<String, FetchError> {
    let mut s = url.trim().to_lowercase();
    if let Some(rest) = s.strip_prefix("https://") {
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix("http://") {
        s = rest.to_string();
    }

    let raw = if let Some(rest) = s.strip_prefix("t.me/s/").or_else(|| s.strip_prefix("telegram.me/s/")) {
        rest
    } else if let Some(rest) = s.strip_prefix("t.me/").or_else(|| s.strip_prefix("telegram.me/")) {
        rest
    } else if let Some(rest) = s.strip_prefix('@') {
        rest
    } else {
        &s
    };

    let username: String = raw
        .split(['?', '/'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if username.is_empty() {
        return Err(FetchError::Parse {
            url: url.to_string(),
            message: "could not extract channel username".to_string(),
        });
    }
    Ok(username)
}

/// Public-channel fetcher over the `t.me/s/` preview pages, with an
/// alternative-domain fallback and an optional headless-browser path for
/// channels whose widget only renders with JS.
pub struct TelegramFetcher {
    http: Arc<HttpClient>,
    browser: Arc<BrowserPool>,
    extractor: Option<Arc<ContentExtractor>>,
    ai: Option<Arc<AiClient>>,
    name: String,
    username: String,
    full_content_domains: Vec<String>,
}

impl TelegramFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Arc<HttpClient>,
        browser: Arc<BrowserPool>,
        extractor: Option<Arc<ContentExtractor>>,
        ai: Option<Arc<AiClient>>,
        name: String,
        channel_url: &str,
        full_content_domains: Vec<String>,
    ) -> Result<Self, FetchError> {
        let username = extract_channel_username(channel_url)?;
        Ok(Self {
            http,
            browser,
            extractor,
            ai,
            name,
            username,
            full_content_domains,
        })
    }

    fn access_urls(&self) -> [String; 2] {
        [
            format!("https://t.me/s/{}", self.username),
            format!("https://telegram.me/s/{}", self.username),
        ]
    }

    pub async fn fetch_articles(&self, limit: Option<usize>) -> Result<Vec<NewItem>> {
        let urls = self.access_urls();
        let mut items = Vec::new();

        // Initial browser pass wakes JS-only widgets before the cheap path
        if self.browser.is_enabled() {
            if let Ok(html) = self.browser.render(&urls[0]).await {
                items = parse_channel_html(&html, &self.username);
            }
        }

        if items.is_empty() {
            for url in &urls {
                match self.fetch_with_http_retry(url).await {
                    Ok(parsed) if !parsed.is_empty() => {
                        info!(source = %self.name, channel = %self.username, url = %url, count = parsed.len(), "HTTP preview fetch succeeded");
                        items = parsed;
                        break;
                    }
                    Ok(_) => continue,
                    Err(e @ FetchError::Status { status: 404, .. }) => {
                        warn!(channel = %self.username, "channel not found or private");
                        return Err(e.into());
                    }
                    Err(e) => {
                        debug!(channel = %self.username, url = %url, error = %e, "preview fetch failed");
                        continue;
                    }
                }
            }
        }

        // Scrolled browser pass loads the latest lazy-rendered messages
        if items.is_empty() && self.browser.is_enabled() {
            for url in &urls {
                match self.browser.render_scrolled(url).await {
                    Ok(html) => {
                        items = parse_channel_html(&html, &self.username);
                        if !items.is_empty() {
                            info!(channel = %self.username, count = items.len(), "browser fetch succeeded");
                            break;
                        }
                    }
                    Err(e) => debug!(channel = %self.username, error = %e, "browser fetch failed"),
                }
            }
        }

        if items.is_empty() {
            return Err(FetchError::Parse {
                url: urls[0].clone(),
                message: format!("all access methods failed for channel {}", self.username),
            }
            .into());
        }

        for item in &mut items {
            self.maybe_replace_with_full_content(item).await;
            self.maybe_detect_advertising(item).await;
        }

        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn fetch_with_http_retry(&self, url: &str) -> Result<Vec<NewItem>, FetchError> {
        let mut last_status = 0u16;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = (BASE_DELAY_SECS * 2f64.powi(attempt as i32 - 1)).min(MAX_DELAY_SECS);
                let jitter = rand::rng().random_range(0.1..0.5) * delay;
                tokio::time::sleep(Duration::from_secs_f64(delay + jitter)).await;
            }

            let mut headers = browser_headers();
            if attempt > 0 {
                anti_cache_headers(&mut headers);
            }

            let response = self.http.get(url, Some(headers)).await?;
            last_status = response.status;
            match response.status {
                200 => return Ok(parse_channel_html(&response.body, &self.username)),
                // Access denied: rotate headers and try again
                403 => continue,
                404 => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: 404,
                    });
                }
                429 | 500..=599 => continue,
                status => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status,
                    });
                }
            }
        }
        Err(FetchError::Status {
            url: url.to_string(),
            status: last_status,
        })
    }

    /// Short post + allow-listed original link: pull the full article via
    /// the extractor and substitute when it is substantially longer.
    async fn maybe_replace_with_full_content(&self, item: &mut NewItem) {
        let Some(ref extractor) = self.extractor else { return };
        let Some(ref original_link) = item.raw.original_link else { return };
        let content_len = item.content.as_deref().map(|c| c.chars().count()).unwrap_or(0);
        if content_len >= SHORT_CONTENT_CHARS {
            return;
        }

        let host = crate::extractor::domain_of(original_link);
        if !self.full_content_domains.iter().any(|d| host.contains(d.as_str())) {
            debug!(link = %original_link, "skipping full-content extraction for non-allow-listed domain");
            return;
        }

        match extractor.extract(original_link).await {
            Ok(Some(full)) if full.chars().count() >= content_len * 2 => {
                info!(link = %original_link, chars = full.chars().count(), "replaced short post with full article content");
                item.content = Some(full);
            }
            Ok(_) => debug!(link = %original_link, "external content not substantially longer"),
            Err(e) => debug!(link = %original_link, error = %e, "full content extraction failed"),
        }
    }

    /// Pre-enrichment advertising pass; persisted by the source manager.
    async fn maybe_detect_advertising(&self, item: &mut NewItem) {
        let Some(ref ai) = self.ai else { return };
        let Some(ref content) = item.content else { return };
        let verdict = ai.detect_advertising(content, Some(&self.username)).await;
        item.raw.advertising = Some(verdict);
    }

    pub async fn test_connection(&self) -> bool {
        for url in self.access_urls() {
            if let Ok(response) = self.http.get(&url, Some(browser_headers())).await
                && response.status == 200
            {
                return true;
            }
        }
        false
    }
}

// ── Message parsing (pure, no I/O) ─────────────────────────────────────

pub fn parse_channel_html(html: &str, username: &str) -> Vec<NewItem> {
    let doc = Html::parse_document(html);

    let mut messages = Vec::new();
    for selector in ["div.tgme_widget_message", "div.message", "div[data-post]"] {
        messages = doc.select(&sel(selector)).collect();
        if !messages.is_empty() {
            break;
        }
    }

    let mut items = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        match parse_message(message, &doc, username) {
            Some(item) => items.push(item),
            None => debug!(index, "skipping unparseable message"),
        }
    }
    items
}

fn parse_message(message: &ElementRef, doc: &Html, username: &str) -> Option<NewItem> {
    let mut content = extract_message_content(message);

    // Meta fallback for widgets that carry the text only in page metadata
    if content.chars().count() < 20 {
        if let Some(meta) = meta_description(doc) {
            if meta.chars().count() > content.chars().count() {
                content = meta;
            }
        }
    }
    if content.chars().count() < 10 {
        return None;
    }

    let message_url = extract_message_url(message, username);
    let published_at = extract_date(message);

    let mut media_files = telegram_media::extract_media_files(message);
    let mut image_url = telegram_media::extract_image_url(message);
    if image_url.is_none() && media_files.is_empty() {
        if let Some(og) = og_image(doc) {
            let mut media = crate::models::MediaFile::new("image", og.clone());
            media.source_tag = Some("opengraph".to_string());
            media_files.push(media);
            image_url = Some(og);
        }
    }

    let external_links = extract_external_links(message);
    let original_link = find_original_link(&external_links);
    let title = extract_title(&content);
    let hashtags = extract_hashtags(&content);
    let forwarded_from = message
        .select(&sel(".tgme_widget_message_forwarded_from"))
        .next()
        .map(|e| e.text().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|s| !s.is_empty());

    // Prefer the external original link as the primary URL
    let final_url = original_link.clone().unwrap_or_else(|| message_url.clone());

    let mut item = NewItem {
        title,
        url: final_url,
        content: Some(content),
        image_url,
        media_files,
        published_at: Some(published_at),
        ..Default::default()
    };
    item.raw.channel = Some(username.to_string());
    item.raw.telegram_url = Some(message_url);
    item.raw.original_link = original_link;
    item.raw.external_links = external_links;
    item.raw.hashtags = hashtags;
    item.raw.forwarded_from = forwarded_from;
    Some(item)
}

fn extract_message_content(message: &ElementRef) -> String {
    for selector in [
        ".tgme_widget_message_text",
        ".message-text",
        ".text",
        r#"div[dir="ltr"]"#,
    ] {
        for element in message.select(&sel(selector)) {
            if inside_reply(&element) {
                continue;
            }
            let text = element.text().collect::<Vec<_>>().join("\n");
            let cleaned = clean_message_content(&text);
            if !cleaned.is_empty() {
                return cleaned;
            }
        }
    }

    // Whole-container fallback, minus the footer chrome
    let text = message.text().collect::<Vec<_>>().join("\n");
    clean_message_content(&text)
}

/// Quoted originals in replies must not leak into the message content.
fn inside_reply(element: &ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .and_then(|e| e.attr("class"))
            .map(|c| c.contains("tgme_widget_message_reply"))
            .unwrap_or(false)
    })
}

fn extract_message_url(message: &ElementRef, username: &str) -> String {
    for selector in ["a.tgme_widget_message_date", r#"a[href*="/"]"#, ".message-link"] {
        if let Some(link) = message.select(&sel(selector)).next()
            && let Some(href) = link.value().attr("href")
        {
            if href.starts_with("http") {
                return href.to_string();
            } else if href.starts_with('/') {
                return format!("https://t.me{href}");
            }
        }
    }
    format!("https://t.me/{username}")
}

fn extract_date(message: &ElementRef) -> DateTime<Utc> {
    for selector in ["time[datetime]", ".datetime", ".date", "[data-time]"] {
        if let Some(element) = message.select(&sel(selector)).next() {
            if let Some(datetime_str) = element.value().attr("datetime")
                && let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str)
            {
                return dt.with_timezone(&Utc);
            }
            if let Some(epoch) = element.value().attr("data-time")
                && let Ok(secs) = epoch.parse::<i64>()
                && let Some(dt) = DateTime::from_timestamp(secs, 0)
            {
                return dt;
            }
        }
    }
    Utc::now()
}

fn extract_external_links(message: &ElementRef) -> Vec<String> {
    let mut candidates = Vec::new();
    for selector in [
        "a.tgme_widget_message_link_preview",
        ".tgme_widget_message_link_preview a[href]",
        ".link_preview a[href]",
        ".tgme_widget_message_forwarded_from a[href]",
    ] {
        for link in message.select(&sel(selector)) {
            if let Some(href) = link.value().attr("href") {
                candidates.push(href.to_string());
            }
        }
    }
    if candidates.is_empty() {
        for link in message.select(&sel("a[href]")) {
            if let Some(href) = link.value().attr("href") {
                candidates.push(href.to_string());
            }
        }
    }

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for href in candidates {
        if !href.starts_with("http://") && !href.starts_with("https://") {
            continue;
        }
        if href.contains("t.me") || href.contains("telegram.me") {
            continue;
        }
        let Some(normalized) = normalize_external_url(&href) else {
            continue;
        };
        if seen.insert(normalized.clone()) {
            links.push(normalized);
            if links.len() >= MAX_EXTERNAL_LINKS {
                break;
            }
        }
    }
    links
}

/// The most likely original article: first link whose host is not a
/// social-media domain.
pub fn find_original_link(external_links: &[String]) -> Option<String> {
    for link in external_links {
        let host = crate::extractor::domain_of(link);
        if host.is_empty() {
            continue;
        }
        if !SOCIAL_BLACKLIST.iter().any(|b| host.contains(b)) {
            return Some(link.clone());
        }
    }
    None
}

/// Strip tracking query parameters, keep everything else.
pub fn normalize_external_url(href: &str) -> Option<String> {
    let parsed = url::Url::parse(href).ok()?;
    parsed.host_str()?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut clean = parsed.clone();
    clean.set_query(None);
    if !kept.is_empty() {
        let mut query = clean.query_pairs_mut();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
    }
    Some(clean.to_string())
}

pub fn extract_title(content: &str) -> String {
    let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let Some(first_line) = lines.first() else {
        return "Telegram Post".to_string();
    };

    let mut title = first_line.to_string();
    let re_artifacts =
        regex::RegexBuilder::new(r"^(Forwarded from|Reply to|@\w+:?)\s*")
            .case_insensitive(true)
            .build()
            .expect("static regex");
    title = re_artifacts.replace(&title, "").to_string();
    title = title
        .trim_start_matches(['📰', '📢', '🔥', '⚡', '💥', '🎯', '📊', '📈', '📉', '🚀', '🗞', '📡', '⭐', '✨', '🎉', '🔗', '📎', '📷', '🎥', '📄', '\u{FE0F}', ' '])
        .to_string();
    let re_prefix = regex::RegexBuilder::new(r"^(BREAKING|NEWS|UPDATE|URGENT):\s*")
        .case_insensitive(true)
        .build()
        .expect("static regex");
    title = re_prefix.replace(&title, "").to_string();

    if title.chars().count() < 5 {
        return "Telegram Post".to_string();
    }
    smart_truncate_title(&title)
}

/// Truncate at a sentence or phrase boundary, then a word boundary,
/// never inside a multibyte character.
pub fn smart_truncate_title(title: &str) -> String {
    if title.chars().count() <= TITLE_MAX_CHARS {
        return title.to_string();
    }

    let window: String = title.chars().take(TITLE_MAX_CHARS).collect();
    for boundary in [". ", "! ", "? ", ": ", " - ", " – ", " — "] {
        if let Some(pos) = window.rfind(boundary) {
            let candidate = window[..pos + 1].trim();
            if candidate.chars().count() > 60 {
                return candidate.to_string();
            }
        }
    }

    let words: Vec<&str> = window.split_whitespace().collect();
    if words.len() > 1 {
        return format!("{}...", words[..words.len() - 1].join(" "));
    }
    let cut: String = title.chars().take(TITLE_MAX_CHARS - 3).collect();
    format!("{cut}...")
}

pub fn extract_hashtags(content: &str) -> Vec<String> {
    let re = regex::Regex::new(r"(?:^|\s)#(\w+)").expect("static regex");
    let mut seen = HashSet::new();
    let mut hashtags = Vec::new();
    for caps in re.captures_iter(content) {
        let tag = caps[1].to_lowercase();
        if !tag.is_empty() && seen.insert(tag.clone()) {
            hashtags.push(tag);
            if hashtags.len() >= MAX_HASHTAGS {
                break;
            }
        }
    }
    hashtags
}

fn clean_message_content(content: &str) -> String {
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    // Widget footer chrome
    lines.retain(|line| {
        let lower = line.to_lowercase();
        lower != "view in telegram" && lower != "open in telegram"
    });

    let mut out = lines.join("\n");
    let re_blank = regex::Regex::new(r"\n{3,}").expect("static regex");
    out = re_blank.replace_all(&out, "\n\n").to_string();
    // Control characters picked up from the widget markup
    out.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

fn meta_description(doc: &Html) -> Option<String> {
    for selector in [
        r#"meta[property="og:description"]"#,
        r#"meta[name="description"]"#,
        r#"meta[name="twitter:description"]"#,
    ] {
        if let Some(meta) = doc.select(&sel(selector)).next()
            && let Some(content) = meta.value().attr("content")
            && content.trim().chars().count() > 20
        {
            return Some(content.trim().to_string());
        }
    }
    None
}

fn og_image(doc: &Html) -> Option<String> {
    for selector in [
        r#"meta[property="og:image"]"#,
        r#"meta[property="og:image:url"]"#,
        r#"meta[name="twitter:image"]"#,
    ] {
        if let Some(meta) = doc.select(&sel(selector)).next()
            && let Some(content) = meta.value().attr("content")
        {
            let url = content.trim();
            if url.starts_with("http://") || url.starts_with("https://") {
                return Some(url.to_string());
            }
            if let Some(rest) = url.strip_prefix("//") {
                return Some(format!("https://{rest}"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_extraction_all_forms() {
        for input in ["https://t.me/s/foo", "t.me/foo", "@foo", "foo"] {
            assert_eq!(extract_channel_username(input).unwrap(), "foo", "input: {input}");
        }
        assert_eq!(extract_channel_username("https://telegram.me/s/bar?q=1").unwrap(), "bar");
        assert!(extract_channel_username("https://t.me/s/").is_err());
    }

    const SAMPLE_PREVIEW: &str = r#"<html><head>
        <meta property="og:description" content="Channel preview description long enough to matter">
        </head><body>
        <div class="tgme_widget_message" data-post="newsch/123">
            <div class="tgme_widget_message_owner_photo"><img src="https://cdn.t.me/profile/ch.jpg"></div>
            <div class="tgme_widget_message_text">
                Србија добила нову владу после дугих преговора
                Детаљи споразума остају нејасни. #serbia #politika
            </div>
            <a class="tgme_widget_message_link_preview" href="https://news.rs/article?utm_source=tg&amp;id=7">Preview</a>
            <a class="tgme_widget_message_date" href="https://t.me/newsch/123">
                <time datetime="2025-07-29T10:00:00+00:00"></time>
            </a>
        </div>
        </body></html>"#;

    #[test]
    fn sample_message_parses() {
        let items = parse_channel_html(SAMPLE_PREVIEW, "newsch");
        assert_eq!(items.len(), 1);

        let item = &items[0];
        assert_eq!(item.url, "https://news.rs/article?id=7", "original link preferred, tracking stripped");
        assert_eq!(item.raw.telegram_url.as_deref(), Some("https://t.me/newsch/123"));
        assert_eq!(item.raw.original_link.as_deref(), Some("https://news.rs/article?id=7"));
        assert_eq!(item.raw.hashtags, vec!["serbia", "politika"]);
        assert!(item.title.starts_with("Србија добила"));
        assert_eq!(
            item.published_at.unwrap().date_naive().to_string(),
            "2025-07-29"
        );
        assert_eq!(item.raw.channel.as_deref(), Some("newsch"));
    }

    #[test]
    fn short_message_falls_back_to_meta() {
        let html = r#"<html><head>
            <meta property="og:description" content="A much longer description from the page metadata here">
            </head><body>
            <div class="tgme_widget_message"><div class="tgme_widget_message_text">hi</div></div>
            </body></html>"#;
        let items = parse_channel_html(html, "ch");
        assert_eq!(items.len(), 1);
        assert!(items[0].content.as_deref().unwrap().contains("longer description"));
    }

    #[test]
    fn original_link_skips_social_hosts() {
        let links = vec![
            "https://youtube.com/watch?v=1".to_string(),
            "https://x.com/user/status/2".to_string(),
            "https://danas.rs/vesti/3".to_string(),
        ];
        assert_eq!(find_original_link(&links).as_deref(), Some("https://danas.rs/vesti/3"));

        let only_social = vec!["https://facebook.com/p/1".to_string()];
        assert!(find_original_link(&only_social).is_none());
    }

    #[test]
    fn tracking_params_stripped_others_kept() {
        let normalized = normalize_external_url("https://news.rs/a?utm_source=tg&fbclid=x&page=2").unwrap();
        assert_eq!(normalized, "https://news.rs/a?page=2");
        assert_eq!(
            normalize_external_url("https://news.rs/a").unwrap(),
            "https://news.rs/a"
        );
    }

    #[test]
    fn title_artifacts_removed() {
        assert_eq!(extract_title("🔥 BREAKING: Something happened today in the city"),
            "Something happened today in the city");
        assert_eq!(extract_title(""), "Telegram Post");
        assert_eq!(extract_title("ok"), "Telegram Post");
    }

    #[test]
    fn long_title_truncated_at_boundary() {
        let long = format!("{}. {}", "An opening sentence that is quite long and full of detail about events", "x".repeat(100));
        let title = extract_title(&long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS);
        assert!(title.ends_with('.') || title.ends_with("..."));
    }

    #[test]
    fn cyrillic_title_truncation_is_char_safe() {
        let long = "Новости дана и анализа догађаја ".repeat(10);
        let title = smart_truncate_title(&long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS);
    }

    #[test]
    fn hashtags_deduped_and_capped() {
        let content = "#One #one #two text #three";
        assert_eq!(extract_hashtags(content), vec!["one", "two", "three"]);

        let many: String = (0..30).map(|i| format!("#tag{i} ")).collect();
        assert_eq!(extract_hashtags(&many).len(), MAX_HASHTAGS);
    }

    #[test]
    fn footer_chrome_removed() {
        let cleaned = clean_message_content("Real content line\nView in Telegram");
        assert_eq!(cleaned, "Real content line");
    }
}
