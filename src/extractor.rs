use std::sync::Arc;

use anyhow::Result;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::ai_client::AiClient;
use crate::browser::BrowserPool;
use crate::extractor_memory::{DomainMemory, SELECTOR_TRUST_THRESHOLD};
use crate::http::{HttpClient, browser_headers};

pub const MAX_CONTENT_LENGTH: usize = 8000;
pub const MIN_CONTENT_LENGTH: usize = 200;
const QUALITY_THRESHOLD: f64 = 30.0;

/// Extraction methods in ladder order.
const METHODS: &[&str] = &["direct", "readability", "heuristics", "structured", "meta", "browser"];

/// Curated content selectors, ordered by reliability: schema.org
/// microdata, semantic HTML5, utility-class frameworks, common CMS
/// classes, then generic containers.
const CONTENT_SELECTORS: &[&str] = &[
    r#"[itemtype*="Article"] [itemprop="articleBody"]"#,
    r#"[itemtype*="NewsArticle"] [itemprop="articleBody"]"#,
    r#"[itemtype*="BlogPosting"] [itemprop="articleBody"]"#,
    r#"article[role="main"]"#,
    "main article",
    r#"[role="main"] article"#,
    ".prose",
    ".prose-lg",
    ".prose-xl",
    ".article__text",
    ".news-text",
    ".news-content",
    ".material-text",
    ".full-text",
    ".text-content",
    ".story-text",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".content-body",
    ".article-body",
    ".story-body",
    ".post-body",
    ".main-content",
    ".article-text",
    ".story-content",
    "article",
    "main",
    ".content",
    "#content",
    "#main-content",
];

/// Words that mark text as likely article prose rather than chrome.
const MEANINGFUL_WORDS: &[&str] = &[
    "article", "story", "news", "report", "analysis", "said", "according", "study", "research", "found",
];

const LOW_QUALITY_PATTERNS: &[&str] = &[
    "click here",
    "subscribe",
    "advertisement",
    "sponsored",
    "cookie policy",
    "privacy policy",
];

const BOILERPLATE_PATTERNS: &[&str] = &[
    r"Subscribe to.{0,40}?newsletter",
    r"Follow us on.{0,40}?social media",
    r"Share this article",
    r"Related articles?:?",
    r"Advertisement",
    r"Cookie policy",
    r"Privacy policy",
    r"Terms of service",
    r"Sign up for.{0,40}?updates",
    r"Click here to.{0,60}",
    r"Continue reading",
];

#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub content: Option<String>,
    pub method: Option<String>,
    /// ISO `YYYY-MM-DD`, preferred from the `article:published_time` meta.
    pub publication_date: Option<String>,
    pub full_article_url: Option<String>,
}

/// Adaptive article-body extractor: a fixed strategy ladder, fronted by a
/// per-domain learning memory, with headless rendering for JS-heavy sites
/// and AI selector discovery for domains that keep failing.
pub struct ContentExtractor {
    http: Arc<HttpClient>,
    memory: Arc<DomainMemory>,
    browser: Arc<BrowserPool>,
    ai: Option<Arc<AiClient>>,
    learning_enabled: bool,
}

impl ContentExtractor {
    pub fn new(
        http: Arc<HttpClient>,
        memory: Arc<DomainMemory>,
        browser: Arc<BrowserPool>,
        ai: Option<Arc<AiClient>>,
        learning_enabled: bool,
    ) -> Self {
        Self {
            http,
            memory,
            browser,
            ai,
            learning_enabled,
        }
    }

    pub fn memory(&self) -> &DomainMemory {
        &self.memory
    }

    /// Extract the main article body. None when no strategy clears the
    /// quality gate (not an error).
    pub async fn extract(&self, url: &str) -> Result<Option<String>> {
        Ok(self.run_ladder(url).await?.0.content)
    }

    /// Extract content plus publication date and a link to the full
    /// article when the page is a teaser. AI-assisted results below 0.5
    /// confidence are rejected inside the AI client.
    pub async fn extract_with_metadata(&self, url: &str) -> Result<ExtractionOutcome> {
        let (mut outcome, html) = self.run_ladder(url).await?;

        if let Some(ref html) = html {
            if outcome.publication_date.is_none()
                && let Some(ref ai) = self.ai
            {
                let sample = sanitize_for_ai(html, 3000);
                outcome.publication_date = ai.extract_publication_date(&sample, url).await;
            }
            if let Some(ref ai) = self.ai {
                let sample = sanitize_for_ai(html, 4000);
                outcome.full_article_url = ai.extract_full_article_link(&sample, url).await;
            }
        }

        Ok(outcome)
    }

    async fn run_ladder(&self, url: &str) -> Result<(ExtractionOutcome, Option<String>)> {
        let url = clean_url(url);
        if url.is_empty() {
            return Ok((ExtractionOutcome::default(), None));
        }
        let domain = domain_of(&url);

        let html = match self.http.fetch_text(&url, Some(browser_headers())).await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!(url = %url, error = %e, "initial fetch failed, browser-only ladder");
                None
            }
        };

        let mut outcome = ExtractionOutcome::default();
        if let Some(ref html) = html {
            outcome.publication_date = published_time_meta(html);
        }

        // Learned best method jumps the queue
        let best = self.memory.best_method(&domain).await;
        let mut tried = Vec::new();
        if let Some(ref method) = best {
            tried.push(method.clone());
            if let Some(content) = self.try_method(method, &url, html.as_deref(), &domain).await {
                self.memory.record_success(&domain, method).await;
                let _ = self.memory.save().await;
                outcome.content = Some(finalize_content(&content));
                outcome.method = Some(method.clone());
                return Ok((outcome, html));
            }
            self.memory.record_failure(&domain, method).await;
        }

        for method in METHODS {
            if tried.iter().any(|t| t.as_str() == *method) {
                continue;
            }
            if let Some(content) = self.try_method(method, &url, html.as_deref(), &domain).await {
                self.memory.record_success(&domain, method).await;
                let _ = self.memory.save().await;
                outcome.content = Some(finalize_content(&content));
                outcome.method = Some(method.to_string());
                return Ok((outcome, html));
            }
            self.memory.record_failure(&domain, method).await;
        }

        // Last resort for domains that keep failing: pay the AI cost once
        if self.learning_enabled
            && self.memory.should_try_ai_discovery(&domain).await
            && let Some(ref html) = html
            && let Some(content) = self.ai_discover(&url, html, &domain).await
        {
            self.memory.record_success(&domain, "ai_discovery").await;
            let _ = self.memory.save().await;
            outcome.content = Some(finalize_content(&content));
            outcome.method = Some("ai_discovery".to_string());
            return Ok((outcome, Some(html.clone())));
        }

        self.memory.record_complete_failure(&domain).await;
        let _ = self.memory.save().await;
        Ok((outcome, html))
    }

    async fn try_method(&self, method: &str, url: &str, html: Option<&str>, domain: &str) -> Option<String> {
        match method {
            "browser" => self.try_browser(url, domain).await,
            _ => {
                let html = html?;
                let learned = self.memory.learned_selectors(domain, method).await;
                let (content, selector) = run_dom_method(method, html, &learned)?;
                if let Some(selector) = selector {
                    self.memory.record_selector_success(domain, method, &selector).await;
                }
                Some(content)
            }
        }
    }

    async fn try_browser(&self, url: &str, domain: &str) -> Option<String> {
        if !self.browser.is_enabled() {
            return None;
        }
        let rendered = match self.browser.render(url).await {
            Ok(html) => html,
            Err(e) => {
                debug!(url, error = %e, "browser rendering failed");
                return None;
            }
        };

        let learned = self.memory.learned_selectors(domain, "browser").await;
        let result = extract_from_rendered(&rendered, &learned);
        if let Some((content, selector)) = result {
            if let Some(selector) = selector {
                self.memory.record_selector_success(domain, "browser", &selector).await;
            }
            return Some(content);
        }
        None
    }

    async fn ai_discover(&self, url: &str, html: &str, domain: &str) -> Option<String> {
        let ai = self.ai.as_ref()?;
        info!(domain, "AI selector discovery triggered");
        self.memory.mark_ai_analysis(domain).await;

        let sample = sanitize_for_ai(html, 8000);
        let proposal = match ai.discover_selectors(url, &sample).await {
            Ok(Some(p)) => p,
            Ok(None) => return None,
            Err(e) => {
                warn!(domain, error = %e, "selector discovery failed");
                return None;
            }
        };

        for selector in proposal.content_selectors.iter().take(3) {
            let Some(text) = try_selector(html, selector) else {
                continue;
            };
            let cleaned = clean_text(&text);
            if is_good_content(&cleaned) {
                info!(domain, selector = %selector, "AI-discovered selector accepted");
                self.memory.record_selector_success(domain, "ai_discovery", selector).await;
                return Some(cleaned);
            }
        }
        None
    }
}

/// Dispatch the DOM-based strategies. Returns (content, selector used).
fn run_dom_method(method: &str, html: &str, learned: &[(String, f64)]) -> Option<(String, Option<String>)> {
    match method {
        "direct" => extract_by_selectors(html, learned),
        "readability" => extract_readability(html).filter(|c| is_good_content(c)).map(|c| (c, None)),
        "heuristics" => extract_heuristics(html).filter(|c| is_good_content(c)).map(|c| (c, None)),
        "structured" => extract_json_ld(html).filter(|c| is_good_content(c)).map(|c| (c, None)),
        "meta" => extract_meta_description(html).filter(|c| is_good_content(c)).map(|c| (c, None)),
        _ => None,
    }
}

/// Rendered-DOM path: learned browser selectors first, then the base
/// list, then heuristics over the rendered markup.
fn extract_from_rendered(html: &str, learned: &[(String, f64)]) -> Option<(String, Option<String>)> {
    if let Some(found) = extract_by_selectors(html, learned) {
        return Some(found);
    }
    extract_heuristics(html).filter(|c| is_good_content(c)).map(|c| (c, None))
}

/// Strategy 1: learned selectors above the trust threshold, then the
/// curated list. Returns the matched selector so it can be reinforced.
fn extract_by_selectors(html: &str, learned: &[(String, f64)]) -> Option<(String, Option<String>)> {
    let stripped = strip_noise(html);
    let doc = Html::parse_document(&stripped);

    for (selector, rate) in learned {
        if *rate <= SELECTOR_TRUST_THRESHOLD {
            continue;
        }
        if let Some(text) = select_text(&doc, selector) {
            let cleaned = clean_text(&text);
            if is_good_content(&cleaned) {
                return Some((cleaned, Some(selector.clone())));
            }
        }
    }

    for selector in CONTENT_SELECTORS {
        if let Some(text) = select_text(&doc, selector) {
            let cleaned = clean_text(&text);
            if is_good_content(&cleaned) {
                return Some((cleaned, Some(selector.to_string())));
            }
        }
    }
    None
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let element = doc.select(&sel).next()?;
    let text = element.text().collect::<Vec<_>>().join("\n");
    if text.trim().len() > MIN_CONTENT_LENGTH { Some(text) } else { None }
}

fn try_selector(html: &str, selector: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    select_text(&doc, selector)
}

/// Strategy 2: readability-style scoring — prefer the container whose
/// paragraphs carry the most prose, penalized by link density.
fn extract_readability(html: &str) -> Option<String> {
    let stripped = strip_noise(html);
    let doc = Html::parse_document(&stripped);
    let container_sel = Selector::parse("article, main, section, div").ok()?;
    let p_sel = Selector::parse("p").ok()?;
    let a_sel = Selector::parse("a").ok()?;

    let mut best: Option<(f64, String)> = None;
    for container in doc.select(&container_sel) {
        let paragraphs: Vec<String> = container
            .select(&p_sel)
            .map(|p| collapse_ws(&p.text().collect::<Vec<_>>().join(" ")))
            .filter(|t| t.len() >= 25)
            .collect();
        if paragraphs.len() < 2 {
            continue;
        }

        let text = paragraphs.join("\n\n");
        let link_len: usize = container
            .select(&a_sel)
            .map(|a| a.text().map(str::len).sum::<usize>())
            .sum();
        let link_density = link_len as f64 / text.len().max(1) as f64;

        let mut score = paragraphs.len() as f64 * 3.0;
        score += text.matches(',').count() as f64;
        score += (text.len() as f64 / 100.0).min(30.0);
        score *= 1.0 - link_density.min(0.9);

        if best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, text));
        }
    }
    best.map(|(_, text)| clean_text(&text))
}

/// Strategy 3: container scoring by composite quality plus class-name
/// bonuses for modern framework and news-site patterns.
fn extract_heuristics(html: &str) -> Option<String> {
    let stripped = strip_noise(html);
    let doc = Html::parse_document(&stripped);
    let container_sel = Selector::parse("article, main, section, div").ok()?;
    let p_sel = Selector::parse("p").ok()?;

    let mut best: Option<(f64, usize, String)> = None;
    for container in doc.select(&container_sel) {
        let text = collapse_ws(&container.text().collect::<Vec<_>>().join("\n"));
        if text.len() <= MIN_CONTENT_LENGTH {
            continue;
        }

        let mut score = assess_quality(&text);

        let class_string = container
            .value()
            .attr("class")
            .unwrap_or_default()
            .to_lowercase();
        if ["prose", "text-", "content", "article", "story", "news", "material", "body", "main", "container"]
            .iter()
            .any(|p| class_string.contains(p))
        {
            score += 10.0;
        }
        if ["article", "news", "material", "story", "text", "content"]
            .iter()
            .any(|p| class_string.contains(p))
        {
            score += 15.0;
        }
        if ["nav", "menu", "sidebar", "footer", "comment", "share", "related"]
            .iter()
            .any(|p| class_string.contains(p))
        {
            score -= 25.0;
        }

        let paragraph_count = container.select(&p_sel).count();
        score += (paragraph_count as f64) * 2.0;

        if best
            .as_ref()
            .is_none_or(|(s, l, _)| score > *s || (score == *s && text.len() > *l))
        {
            best = Some((score, text.len(), text));
        }
    }
    best.map(|(_, _, text)| clean_text(&text))
}

/// Strategy 4: JSON-LD blocks of type Article/NewsArticle/BlogPosting.
fn extract_json_ld(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    for script in doc.select(&sel) {
        let raw = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };

        let items: Vec<&serde_json::Value> = match &data {
            serde_json::Value::Array(items) => items.iter().collect(),
            serde_json::Value::Object(obj) if obj.contains_key("@graph") => {
                obj["@graph"].as_array().map(|a| a.iter().collect()).unwrap_or_default()
            }
            other => vec![other],
        };

        for item in items {
            let item_type = match item.get("@type") {
                Some(serde_json::Value::String(t)) => t.as_str(),
                Some(serde_json::Value::Array(types)) => types.first().and_then(|t| t.as_str()).unwrap_or(""),
                _ => "",
            };
            if !matches!(item_type, "Article" | "NewsArticle" | "BlogPosting") {
                continue;
            }
            for field in ["articleBody", "description", "text"] {
                if let Some(body) = item.get(field).and_then(|v| v.as_str())
                    && body.len() > MIN_CONTENT_LENGTH
                {
                    return Some(clean_text(body));
                }
            }
        }
    }
    None
}

/// Strategy 5: Open Graph / meta description, minimum-viable content.
fn extract_meta_description(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    for selector in [r#"meta[property="og:description"]"#, r#"meta[name="description"]"#] {
        let sel = Selector::parse(selector).ok()?;
        if let Some(meta) = doc.select(&sel).next()
            && let Some(content) = meta.value().attr("content")
            && content.len() > MIN_CONTENT_LENGTH
        {
            return Some(clean_text(content));
        }
    }
    None
}

/// Publication-time hint from page metadata, date part only.
pub fn published_time_meta(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"meta[property="article:published_time"]"#).ok()?;
    let content = doc.select(&sel).next()?.value().attr("content")?;
    let date_part = content.split('T').next()?.trim();
    chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some(date_part.to_string())
}

/// Composite quality score: length, sentence count, word count, letter
/// ratio, minus penalties for chrome-ish phrases.
pub fn assess_quality(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut score: f64 = 0.0;

    score += match text.len() {
        len if len > 2000 => 40.0,
        len if len > 1000 => 30.0,
        len if len > 500 => 20.0,
        _ => 10.0,
    };

    let sentences = text.chars().filter(|c| matches!(c, '.' | '!' | '?')).count();
    score += match sentences {
        n if n > 10 => 20.0,
        n if n > 5 => 15.0,
        n if n > 2 => 10.0,
        _ => 0.0,
    };

    let words = text.split_whitespace().count();
    score += match words {
        n if n > 300 => 15.0,
        n if n > 150 => 10.0,
        n if n > 50 => 5.0,
        _ => 0.0,
    };

    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let letter_ratio = letters as f64 / text.chars().count().max(1) as f64;
    score += if letter_ratio > 0.7 {
        15.0
    } else if letter_ratio > 0.6 {
        10.0
    } else if letter_ratio > 0.5 {
        5.0
    } else {
        0.0
    };

    let lower = text.to_lowercase();
    for pattern in LOW_QUALITY_PATTERNS {
        if lower.contains(pattern) {
            score -= 5.0;
        }
    }

    score.max(0.0)
}

/// The acceptance gate every strategy result must clear.
pub fn is_good_content(content: &str) -> bool {
    if content.len() < MIN_CONTENT_LENGTH {
        return false;
    }
    if assess_quality(content) < QUALITY_THRESHOLD {
        return false;
    }
    let lower = content.to_lowercase();
    let meaningful = MEANINGFUL_WORDS.iter().filter(|w| lower.contains(*w)).count();
    if meaningful < 2 && content.len() < 1000 {
        return false;
    }
    true
}

/// Accepted content is truncated at a sentence boundary and cleaned.
pub fn finalize_content(content: &str) -> String {
    let truncated = if content.len() > MAX_CONTENT_LENGTH {
        smart_truncate(content, MAX_CONTENT_LENGTH)
    } else {
        content.to_string()
    };
    clean_text(&truncated)
}

/// Truncate at the last complete sentence that fits; hard cut as a
/// fallback when not even one sentence fits.
pub fn smart_truncate(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut result = String::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            if result.len() + current.len() > max_length {
                break;
            }
            result.push_str(&current);
            current.clear();
        }
    }

    if result.is_empty() {
        let cut: String = text.chars().take(max_length.saturating_sub(3)).collect();
        return format!("{}...", cut.trim_end());
    }
    result.trim().to_string()
}

/// Whitespace normalization plus boilerplate stripping.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut cleaned = collapse_ws(text);
    for pattern in BOILERPLATE_PATTERNS {
        if let Ok(re) = regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
            cleaned = re.replace_all(&cleaned, "").to_string();
        }
    }

    let re_dots = regex::Regex::new(r"\.{4,}").expect("static regex");
    cleaned = re_dots.replace_all(&cleaned, "...").to_string();
    collapse_ws(&cleaned)
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// URL hygiene: strip zero-width and other invisible characters, apply
/// NFKC, trim. Anomalies are logged and corrected before use.
pub fn clean_url(url: &str) -> String {
    const INVISIBLE: &[char] = &[
        '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00A0}',
    ];
    let without_invisible: String = url.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    let normalized: String = without_invisible.nfkc().collect();
    let cleaned = normalized.trim().to_string();
    if cleaned != url {
        debug!(original = %url, cleaned = %cleaned, "corrected anomalous URL");
    }
    cleaned
}

pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

/// Remove tags that never hold article text. Only non-nesting tags are
/// stripped textually; container-level noise is handled by scoring.
fn strip_noise(html: &str) -> String {
    let mut out = html.to_string();
    for tag in ["script", "style", "noscript", "svg", "iframe", "form"] {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>");
        if let Ok(re) = regex::Regex::new(&pattern) {
            out = re.replace_all(&out, "").to_string();
        }
    }
    out
}

/// Sanitize HTML for an AI prompt: drop scripts/styles, collapse
/// whitespace, enforce a character budget.
pub fn sanitize_for_ai(html: &str, budget: usize) -> String {
    let stripped = strip_noise(html);
    let collapsed = collapse_ws(&stripped);
    collapsed.chars().take(budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_paragraphs(n: usize) -> String {
        (0..n)
            .map(|i| {
                format!(
                    "<p>Paragraph {i} of the report, according to the study, covers the news in detail, \
                     with findings researchers said were significant for the industry.</p>"
                )
            })
            .collect()
    }

    #[test]
    fn clean_url_strips_zero_width() {
        assert_eq!(clean_url("https://example.com/a\u{200B}"), "https://example.com/a");
        assert_eq!(clean_url("  https://example.com/a "), "https://example.com/a");
        assert_eq!(clean_url("https://example.com/ok"), "https://example.com/ok");
    }

    #[test]
    fn domain_of_extracts_host() {
        assert_eq!(domain_of("https://News.Example.com/a/b"), "news.example.com");
        assert_eq!(domain_of("not a url"), "");
    }

    #[test]
    fn selectors_find_article_body() {
        let html = format!(
            "<html><body><nav>Home About</nav><div class=\"article-body\">{}</div></body></html>",
            article_paragraphs(6)
        );
        let (content, selector) = extract_by_selectors(&html, &[]).expect("content found");
        assert!(content.len() > MIN_CONTENT_LENGTH);
        assert_eq!(selector.as_deref(), Some(".article-body"));
    }

    #[test]
    fn learned_selector_preferred_over_base_list() {
        let html = format!(
            "<html><body><div class=\"custom-widget\">{}</div></body></html>",
            article_paragraphs(6)
        );
        let learned = vec![(".custom-widget".to_string(), 0.8)];
        let (_, selector) = extract_by_selectors(&html, &learned).expect("content found");
        assert_eq!(selector.as_deref(), Some(".custom-widget"));
    }

    #[test]
    fn low_trust_learned_selector_skipped() {
        let html = format!(
            "<html><body><div class=\"custom-widget\">{}</div></body></html>",
            article_paragraphs(6)
        );
        let learned = vec![(".custom-widget".to_string(), 0.3)];
        assert!(extract_by_selectors(&html, &learned).is_none());
    }

    #[test]
    fn readability_prefers_prose_over_navigation() {
        let html = format!(
            "<html><body>\
             <div><a href=\"/1\">One</a><a href=\"/2\">Two</a><a href=\"/3\">Three</a></div>\
             <div id=\"story\">{}</div>\
             </body></html>",
            article_paragraphs(5)
        );
        let content = extract_readability(&html).expect("readability found content");
        assert!(content.contains("Paragraph 0"));
        assert!(!content.contains("One Two Three"));
    }

    #[test]
    fn json_ld_article_body_extracted() {
        let body = "According to the report, the study found significant news. ".repeat(10);
        let html = format!(
            r#"<html><head><script type="application/ld+json">
            {{"@type": "NewsArticle", "articleBody": "{body}"}}
            </script></head><body></body></html>"#
        );
        let content = extract_json_ld(&html).expect("json-ld content");
        assert!(content.contains("significant news"));
    }

    #[test]
    fn json_ld_graph_structure_handled() {
        let body = "The research team said their analysis found notable results. ".repeat(10);
        let html = format!(
            r#"<html><head><script type="application/ld+json">
            {{"@graph": [{{"@type": "Article", "articleBody": "{body}"}}]}}
            </script></head><body></body></html>"#
        );
        assert!(extract_json_ld(&html).is_some());
    }

    #[test]
    fn meta_description_fallback() {
        let desc = "A detailed report on the news, according to the study the research found. ".repeat(5);
        let html =
            format!(r#"<html><head><meta property="og:description" content="{desc}"></head><body></body></html>"#);
        let content = extract_meta_description(&html).expect("meta content");
        assert!(content.contains("detailed report"));
    }

    #[test]
    fn published_time_meta_parsed() {
        let html = r#"<html><head><meta property="article:published_time" content="2025-07-29T10:00:00Z"></head></html>"#;
        assert_eq!(published_time_meta(html).as_deref(), Some("2025-07-29"));

        let bad = r#"<html><head><meta property="article:published_time" content="soon"></head></html>"#;
        assert!(published_time_meta(bad).is_none());
    }

    #[test]
    fn quality_gate_rejects_short_and_thin() {
        assert!(!is_good_content("too short"));

        let nav_soup = "Home | About | Contact | ".repeat(20);
        assert!(!is_good_content(&nav_soup));

        let article = "The study found, according to researchers, that the news report said things. ".repeat(15);
        assert!(is_good_content(&article));
    }

    #[test]
    fn accepted_content_keeps_quality_after_finalize() {
        let article = "The study found, according to researchers, that the report said things mattered. ".repeat(200);
        assert!(is_good_content(&article));
        let finalized = finalize_content(&article);
        assert!(finalized.len() <= MAX_CONTENT_LENGTH);
        assert!(assess_quality(&finalized) >= QUALITY_THRESHOLD);
    }

    #[test]
    fn smart_truncate_respects_sentences() {
        let text = "First sentence here. Second sentence follows. Third one is cut off because";
        let truncated = smart_truncate(text, 50);
        assert_eq!(truncated, "First sentence here. Second sentence follows.");
    }

    #[test]
    fn smart_truncate_hard_cuts_single_run_on() {
        let text = "x".repeat(100);
        let truncated = smart_truncate(&text, 20);
        assert!(truncated.len() <= 20);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn clean_text_strips_boilerplate() {
        let text = "Real content about the study. Subscribe to our newsletter. More real content.";
        let cleaned = clean_text(text);
        assert!(!cleaned.to_lowercase().contains("subscribe"));
        assert!(cleaned.contains("Real content"));
    }

    #[test]
    fn strip_noise_removes_scripts() {
        let html = "<div>keep</div><script>var x = 'drop';</script><style>.a{}</style>";
        let stripped = strip_noise(html);
        assert!(stripped.contains("keep"));
        assert!(!stripped.contains("drop"));
    }

    #[test]
    fn sanitize_for_ai_respects_budget() {
        let html = format!("<div>{}</div>", "word ".repeat(5000));
        let sample = sanitize_for_ai(&html, 1000);
        assert!(sample.chars().count() <= 1000);
    }
}
