use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::FileCache;
use crate::config::AiConfig;
use crate::error::{AiError, FetchError};
use crate::extractor::ContentExtractor;
use crate::http::HttpClient;
use crate::models::AdVerdict;

const ANALYSIS_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);
const AD_CONFIDENCE_THRESHOLD: f64 = 0.6;
const METADATA_CONFIDENCE_THRESHOLD: f64 = 0.5;
const SUMMARY_MIN_LENGTH: usize = 60;
const SUMMARY_SIMILARITY_LIMIT: f64 = 0.80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryLabel {
    pub name: String,
    pub confidence: f64,
    /// Raw label as the model produced it, stored verbatim.
    pub ai_category: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    pub summary: Option<String>,
    pub optimized_title: Option<String>,
    pub categories: Vec<CategoryLabel>,
    pub ad: AdVerdict,
    pub publication_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectorProposal {
    #[serde(default)]
    pub content_selectors: Vec<String>,
    #[serde(default)]
    pub title_selectors: Vec<String>,
    #[serde(default)]
    pub date_selectors: Vec<String>,
    #[serde(default)]
    pub page_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SummaryWithMetadata {
    pub summary: Option<String>,
    pub publication_date: Option<String>,
    pub full_article_url: Option<String>,
}

/// Facade over the external AI provider: one combined per-article
/// analysis, a standalone advertising classifier, digest generation, and
/// the structural helpers the extractor leans on. Responses for article
/// analysis are cached for 24 hours keyed by URL.
pub struct AiClient {
    http: Arc<HttpClient>,
    cache: Arc<FileCache>,
    config: AiConfig,
}

impl AiClient {
    pub fn new(http: Arc<HttpClient>, cache: Arc<FileCache>, config: AiConfig) -> Self {
        Self { http, cache, config }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&self.config.api_key) {
            headers.insert("X-KM-AccessKey", value);
        }
        headers
    }

    /// One round trip to the provider; returns choices[0].message.content.
    async fn chat(&self, messages: Vec<Value>, model: &str, max_tokens: u32, temperature: f64) -> Result<String, AiError> {
        let payload = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "top_p": 0.9,
            "presence_penalty": 0.0,
            "frequency_penalty": 0.1,
        });

        let response = self
            .http
            .post_json(&self.config.endpoint, &payload, Some(self.headers()))
            .await
            .map_err(|e| match e {
                FetchError::RateLimited { retry_after } => AiError::RateLimited { retry_after },
                other => AiError::Transport(other.to_string()),
            })?;

        match response.status {
            200..=299 => {
                let data: Value = serde_json::from_str(&response.body)
                    .map_err(|e| AiError::Transport(format!("invalid response JSON: {e}")))?;
                let content = data
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("message"))
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                if content.is_empty() {
                    return Err(AiError::Transport("no choices in response".to_string()));
                }
                Ok(content)
            }
            429 => Err(AiError::RateLimited {
                retry_after: response.retry_after(),
            }),
            status => Err(AiError::Api {
                status,
                body: response.body.chars().take(500).collect(),
            }),
        }
    }

    /// Combined per-article analysis: summary, categories, advertising
    /// verdict, optional optimized title and publication date.
    pub async fn analyze_article_complete(
        &self,
        title: &str,
        content: &str,
        url: &str,
    ) -> Result<ArticleAnalysis, AiError> {
        let cache_key = format!("ai_analysis:{url}");
        if let Some(cached) = self.cache.get::<ArticleAnalysis>(&cache_key).await {
            debug!(url, "analysis served from cache");
            return Ok(cached);
        }

        let body: String = content.chars().take(8000).collect();
        let prompt = format!(
            "Проанализируй новостную статью и верни СТРОГО один JSON-объект.\n\n\
             ЗАГОЛОВОК: {title}\n\
             URL: {url}\n\n\
             ТЕКСТ:\n{body}\n\n\
             Верни JSON:\n\
             {{\n\
               \"optimized_title\": \"улучшенный заголовок или null\",\n\
               \"summary\": \"пересказ на русском языке, 3-5 ключевых пунктов, без вводных фраз\",\n\
               \"categories\": [{{\"name\": \"категория\", \"confidence\": 0.9}}],\n\
               \"is_advertisement\": false,\n\
               \"ad_confidence\": 0.0,\n\
               \"ad_type\": null,\n\
               \"ad_reasoning\": \"\",\n\
               \"ad_markers\": [],\n\
               \"publication_date\": \"YYYY-MM-DD или null\"\n\
             }}\n\n\
             Категории упорядочи по уверенности, от самой высокой. Запрещено копировать большие фрагменты текста в summary."
        );

        let raw = self
            .chat(
                vec![json!({"role": "user", "content": prompt})],
                &self.config.summarization_model,
                1500,
                0.2,
            )
            .await?;

        let mut analysis = match parse_json_block(&raw) {
            Some(data) => parse_analysis(&data),
            None => {
                warn!(url, "malformed analysis response, using neutral defaults");
                ArticleAnalysis::default()
            }
        };

        // Validate the summary contract; retry once, then fall back to an
        // extractive summary.
        let summary = analysis.summary.as_deref().map(clean_summary_text).unwrap_or_default();
        if is_summary_valid(&summary, content) {
            analysis.summary = Some(summary);
        } else {
            analysis.summary = Some(self.retry_summary_or_fallback(content).await);
        }

        apply_ad_threshold(&mut analysis.ad);

        if let Err(e) = self.cache.set(&cache_key, &analysis, Some(ANALYSIS_CACHE_TTL)).await {
            debug!(url, error = %e, "analysis cache write failed");
        }
        Ok(analysis)
    }

    async fn retry_summary_or_fallback(&self, content: &str) -> String {
        let body: String = content.chars().take(8000).collect();
        let strict_prompt = format!(
            "Перескажи статью СВОИМИ СЛОВАМИ на русском языке. НЕЛЬЗЯ копировать фразы из текста.\n\
             Сделай 3-5 лаконичных пунктов (каждый 1-2 предложения). Без вступлений.\n\n\
             СТАТЬЯ:\n{body}\n\n\
             СТРОГИЙ ПЕРЕСКАЗ:"
        );
        let system = "Ты профессиональный новостной редактор. Отвечай СТРОГО на русском языке, коротко и информативно.";

        match self
            .chat(
                vec![
                    json!({"role": "system", "content": system}),
                    json!({"role": "user", "content": strict_prompt}),
                ],
                &self.config.summarization_model,
                1000,
                0.2,
            )
            .await
        {
            Ok(raw) => {
                let cleaned = clean_summary_text(&raw);
                if is_summary_valid(&cleaned, content) {
                    info!(chars = cleaned.len(), "summary accepted after strict retry");
                    return cleaned;
                }
            }
            Err(e) => debug!(error = %e, "strict summary retry failed"),
        }

        let fallback = simple_extractive_summary(content);
        info!(chars = fallback.len(), "extractive fallback summary used");
        fallback
    }

    /// Plain-content summarisation with the same validation ladder.
    pub async fn summarize_content(&self, content: &str) -> Result<Option<String>, AiError> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let body: String = content.chars().take(8000).collect();
        let prompt = format!(
            "Прочитай статью и создай краткий пересказ на русском языке.\n\n\
             ТРЕБОВАНИЯ:\n\
             - Сразу начинай с основного содержания (без вводных фраз)\n\
             - Используй 3-5 ключевых пунктов\n\
             - Сохрани важные факты и цифры\n\
             - Пиши кратко и информативно\n\n\
             СТАТЬЯ:\n{body}\n\n\
             ПЕРЕСКАЗ:"
        );
        let system = "Ты профессиональный новостной редактор. Отвечай СТРОГО на русском языке, коротко и информативно. Запрещено копировать большие фрагменты исходного текста.";

        let first = self
            .chat(
                vec![
                    json!({"role": "system", "content": system}),
                    json!({"role": "user", "content": prompt}),
                ],
                &self.config.summarization_model,
                1000,
                0.2,
            )
            .await?;

        let cleaned = clean_summary_text(&first);
        if is_summary_valid(&cleaned, content) {
            return Ok(Some(cleaned));
        }
        Ok(Some(self.retry_summary_or_fallback(content).await))
    }

    /// Extract content via the extractor, then summarise. A discovered
    /// full-article URL is recorded but not re-extracted.
    pub async fn get_article_summary_with_metadata(
        &self,
        extractor: &ContentExtractor,
        url: &str,
    ) -> SummaryWithMetadata {
        let mut result = SummaryWithMetadata::default();

        let outcome = match extractor.extract_with_metadata(url).await {
            Ok(o) => o,
            Err(e) => {
                warn!(url, error = %e, "extraction for summary failed");
                return result;
            }
        };
        result.publication_date = outcome.publication_date;
        result.full_article_url = outcome.full_article_url;

        let Some(content) = outcome.content else {
            return result;
        };
        match self.summarize_content(&content).await {
            Ok(summary) => result.summary = summary,
            Err(e) => warn!(url, error = %e, "summarisation failed"),
        }
        result
    }

    /// Standalone advertising classifier (Telegram pre-enrichment path).
    /// Never propagates errors into the pipeline: failures yield the
    /// neutral default.
    pub async fn detect_advertising(&self, content: &str, source_info: Option<&str>) -> AdVerdict {
        if content.trim().len() < 10 {
            return AdVerdict {
                reasoning: "Content too short for analysis".to_string(),
                ..Default::default()
            };
        }

        let context = source_info.map(|s| format!("Channel: {s}\n")).unwrap_or_default();
        let prompt = format!(
            "Analyze this message content for advertising/promotional characteristics.\n\n\
             {context}MESSAGE CONTENT:\n{content}\n\n\
             Indicators of advertising: sales pitches, affiliate links, calls to action, price mentions,\n\
             promotional language, crypto signals, channel promotion, excessive promotional emoji.\n\
             Indicators of legitimate content: factual reporting, news updates, official announcements.\n\n\
             RESPONSE FORMAT (JSON):\n\
             {{\"is_advertisement\": true, \"confidence\": 0.85, \"ad_type\": \"product_promotion\",\n\
              \"reasoning\": \"...\", \"markers\": [\"call_to_action\"]}}\n\n\
             AD_TYPES: product_promotion, affiliate_marketing, crypto_signals, channel_promotion, spam, sponsored_content.\n\
             If not advertising: {{\"is_advertisement\": false, \"confidence\": 0.0, \"reasoning\": \"...\", \"ad_type\": null, \"markers\": []}}"
        );

        match self
            .chat(
                vec![json!({"role": "user", "content": prompt})],
                &self.config.summarization_model,
                300,
                0.1,
            )
            .await
        {
            Ok(raw) => parse_ad_response(&raw),
            Err(e) => {
                debug!(error = %e, "advertising detection failed, defaulting to non-advertising");
                AdVerdict {
                    reasoning: "Analysis failed - defaulting to non-advertising".to_string(),
                    ..Default::default()
                }
            }
        }
    }

    /// AI publication-date extraction from an HTML sample. Confidence
    /// below 0.5 is rejected.
    pub async fn extract_publication_date(&self, html_sample: &str, url: &str) -> Option<String> {
        if html_sample.len() < 100 {
            return None;
        }
        let prompt = format!(
            "Extract the publication date from this HTML content.\n\n\
             URL: {url}\n\nHTML CONTENT:\n{html_sample}\n\n\
             Prefer metadata such as article:published_time; ignore update dates.\n\n\
             RESPONSE FORMAT (JSON):\n\
             {{\"date_found\": true, \"publication_date\": \"2025-01-15\", \"confidence\": 0.8}}\n\
             If no date: {{\"date_found\": false, \"confidence\": 0.0}}"
        );

        let raw = self
            .chat(
                vec![json!({"role": "user", "content": prompt})],
                &self.config.summarization_model,
                200,
                0.1,
            )
            .await
            .ok()?;
        parse_date_response(&raw)
    }

    /// AI full-article-link extraction. Confidence below 0.5 is rejected;
    /// relative links are resolved against the base URL.
    pub async fn extract_full_article_link(&self, html_sample: &str, base_url: &str) -> Option<String> {
        if html_sample.len() < 100 {
            return None;
        }
        let prompt = format!(
            "Find the link to the full article content in this HTML.\n\n\
             BASE URL: {base_url}\n\nHTML CONTENT:\n{html_sample}\n\n\
             Look for \"Read more\", \"Continue reading\", main article title links.\n\n\
             RESPONSE FORMAT (JSON):\n\
             {{\"link_found\": true, \"full_article_url\": \"https://example.com/full\", \"confidence\": 0.8}}\n\
             If none: {{\"link_found\": false, \"confidence\": 0.0}}"
        );

        let raw = self
            .chat(
                vec![json!({"role": "user", "content": prompt})],
                &self.config.summarization_model,
                300,
                0.1,
            )
            .await
            .ok()?;
        parse_link_response(&raw, base_url)
    }

    /// Ask for ranked CSS selectors for a page the ladder keeps failing on.
    pub async fn discover_selectors(&self, url: &str, html_sample: &str) -> Result<Option<SelectorProposal>, AiError> {
        let prompt = format!(
            "Analyze this web page structure and propose CSS selectors for scraping it.\n\n\
             URL: {url}\n\nSANITIZED HTML:\n{html_sample}\n\n\
             RESPONSE FORMAT (JSON):\n\
             {{\"content_selectors\": [\"...ranked best first...\"],\n\
              \"title_selectors\": [\"...\"],\n\
              \"date_selectors\": [\"...\"],\n\
              \"page_type\": \"changelog|news|blog|docs\"}}"
        );

        let raw = self
            .chat(
                vec![json!({"role": "user", "content": prompt})],
                &self.config.summarization_model,
                2000,
                0.1,
            )
            .await?;

        let Some(data) = parse_json_block(&raw) else {
            return Ok(None);
        };
        Ok(serde_json::from_value(data).ok())
    }

    /// Connected-prose HTML digest for Telegram. `part` carries the part
    /// number and its character budget when the digest is split.
    pub async fn generate_digest(
        &self,
        grouped: &[(String, Vec<(String, String)>)],
        part: Option<(u8, usize)>,
    ) -> Result<Option<String>, AiError> {
        if grouped.is_empty() {
            return Ok(None);
        }

        let total_news: usize = grouped.iter().map(|(_, items)| items.len()).sum();
        let categories = grouped.len();
        let (header_text, char_limit) = match part {
            Some((n, limit)) => (format!("Сводка новостей (часть {n})"), limit),
            None => ("Сводка новостей".to_string(), 2600),
        };

        let mut news_content = String::new();
        for (category, items) in grouped {
            news_content.push_str(&format!("\n{category}:\n"));
            for (title, summary) in items {
                news_content.push_str(&format!("- {title}\n"));
                if !summary.is_empty() {
                    let short: String = summary.chars().take(200).collect();
                    news_content.push_str(&format!("  {short}...\n"));
                }
            }
        }

        let prompt = format!(
            "Ты - опытный журналист. Создай СЖАТО связную сводку новостей в HTML.\n\n\
             {total_news} новостей в {categories} категориях.\n\n\
             ТРЕБОВАНИЯ:\n\
             - HTML с <b></b> для заголовков категорий (только этот тег!)\n\
             - Связные абзацы (НЕ списки!)\n\
             - МАКСИМУМ {char_limit} символов\n\
             - Охвати основные события по категориям\n\
             - Пиши как связный рассказ, а не перечисления\n\n\
             ФОРМАТ:\n<b>{header_text}</b>\n\n\
             Материалы:\n{news_content}\n\n\
             Создай связную сводку главных событий дня в виде единого текста."
        );

        let digest = self
            .chat(
                vec![json!({"role": "user", "content": prompt})],
                &self.config.digest_model,
                1500,
                0.4,
            )
            .await?;
        Ok(Some(digest))
    }

    pub async fn test_connection(&self) -> bool {
        self.chat(
            vec![json!({"role": "user", "content": "Ответь одним словом: да"})],
            &self.config.summarization_model,
            10,
            0.0,
        )
        .await
        .is_ok()
    }
}

// ── Response parsing ───────────────────────────────────────────────────

/// Extract the first JSON object embedded in a model response.
pub fn parse_json_block(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn parse_analysis(data: &Value) -> ArticleAnalysis {
    let categories = data
        .get("categories")
        .and_then(|c| c.as_array())
        .map(|cats| {
            cats.iter()
                .filter_map(|cat| match cat {
                    Value::String(name) => Some(CategoryLabel {
                        name: name.clone(),
                        confidence: 1.0,
                        ai_category: name.clone(),
                    }),
                    Value::Object(_) => {
                        let name = cat.get("name").and_then(|n| n.as_str())?.to_string();
                        let confidence = cat
                            .get("confidence")
                            .and_then(|c| c.as_f64())
                            .unwrap_or(1.0)
                            .clamp(0.0, 1.0);
                        Some(CategoryLabel {
                            ai_category: cat
                                .get("ai_category")
                                .and_then(|a| a.as_str())
                                .unwrap_or(&name)
                                .to_string(),
                            name,
                            confidence,
                        })
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let ad = AdVerdict {
        is_advertisement: data.get("is_advertisement").and_then(|v| v.as_bool()).unwrap_or(false),
        confidence: data
            .get("ad_confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
        ad_type: data.get("ad_type").and_then(|v| v.as_str()).map(|s| s.to_string()),
        reasoning: data
            .get("ad_reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("No reasoning provided")
            .to_string(),
        markers: data
            .get("ad_markers")
            .and_then(|v| v.as_array())
            .map(|m| m.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default(),
    };

    ArticleAnalysis {
        summary: data.get("summary").and_then(|v| v.as_str()).map(|s| s.to_string()),
        optimized_title: data
            .get("optimized_title")
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
            .map(|s| s.to_string()),
        categories,
        ad,
        publication_date: data
            .get("publication_date")
            .and_then(|v| v.as_str())
            .filter(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok())
            .map(|s| s.to_string()),
    }
}

pub fn parse_ad_response(raw: &str) -> AdVerdict {
    let Some(data) = parse_json_block(raw) else {
        return AdVerdict {
            reasoning: "Analysis failed - defaulting to non-advertising".to_string(),
            ..Default::default()
        };
    };

    let mut verdict = AdVerdict {
        is_advertisement: data.get("is_advertisement").and_then(|v| v.as_bool()).unwrap_or(false),
        confidence: data
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
        ad_type: data.get("ad_type").and_then(|v| v.as_str()).map(|s| s.to_string()),
        reasoning: data
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("No reasoning provided")
            .to_string(),
        markers: data
            .get("markers")
            .and_then(|v| v.as_array())
            .map(|m| m.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default(),
    };
    apply_ad_threshold(&mut verdict);
    verdict
}

/// Below the confidence threshold the verdict flips back to non-ad.
fn apply_ad_threshold(verdict: &mut AdVerdict) {
    if verdict.is_advertisement && verdict.confidence < AD_CONFIDENCE_THRESHOLD {
        verdict.is_advertisement = false;
        verdict.reasoning.push_str(" (Low confidence threshold not met)");
    }
}

fn parse_date_response(raw: &str) -> Option<String> {
    let data = parse_json_block(raw)?;
    if !data.get("date_found").and_then(|v| v.as_bool()).unwrap_or(false) {
        return None;
    }
    let confidence = data.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
    if confidence < METADATA_CONFIDENCE_THRESHOLD {
        return None;
    }
    let date = data.get("publication_date").and_then(|v| v.as_str())?.trim().to_string();
    chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
    Some(date)
}

fn parse_link_response(raw: &str, base_url: &str) -> Option<String> {
    let data = parse_json_block(raw)?;
    if !data.get("link_found").and_then(|v| v.as_bool()).unwrap_or(false) {
        return None;
    }
    let confidence = data.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
    if confidence < METADATA_CONFIDENCE_THRESHOLD {
        return None;
    }

    let link = data.get("full_article_url").and_then(|v| v.as_str())?.trim();
    let absolute = if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        url::Url::parse(base_url).ok()?.join(link).ok()?.to_string()
    };

    let parsed = url::Url::parse(&absolute).ok()?;
    if parsed.host_str().is_none() {
        return None;
    }
    Some(absolute)
}

/// Strip service phrases the model sometimes prepends to summaries.
pub fn clean_summary_text(raw: &str) -> String {
    const SERVICE_PREFIXES: &[&str] = &[
        "Краткое содержание статьи на русском языке с основными тезисами:",
        "Краткое содержание статьи на русском языке:",
        "Краткое содержание:",
        "Основные тезисы статьи:",
        "Основные тезисы:",
        "Суммаризация статьи:",
        "Пересказ статьи:",
        "Содержание статьи:",
        "Вот краткое содержание:",
        "Вот основные тезисы:",
    ];

    let mut cleaned = raw.trim().to_string();
    for prefix in SERVICE_PREFIXES {
        if let Some(stripped) = cleaned.strip_prefix(prefix) {
            cleaned = stripped.trim_start().to_string();
        }
    }
    cleaned = cleaned.trim_start_matches(['-', '•', '·', '*', ' ']).to_string();
    cleaned.trim().to_string()
}

/// Summary contract: Cyrillic present, at least 60 chars, and not a copy
/// of the source (similarity over the first 1000 chars below 0.80).
pub fn is_summary_valid(summary: &str, original: &str) -> bool {
    if summary.chars().count() < SUMMARY_MIN_LENGTH {
        return false;
    }
    if !summary.chars().any(|c| matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё')) {
        return false;
    }
    similarity_ratio(summary, original) < SUMMARY_SIMILARITY_LIMIT
}

fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: String = a.chars().take(1000).collect();
    let b: String = b.chars().take(1000).collect();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein::levenshtein(&a, &b);
    1.0 - distance as f64 / max_len as f64
}

/// First 3-4 informative sentences, capped at 700 chars.
pub fn simple_extractive_summary(content: &str) -> String {
    let mut picked = Vec::new();
    let mut total = 0usize;
    let mut current = String::new();

    for ch in content.trim().chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let sentence = current.trim().to_string();
            current.clear();
            if sentence.chars().count() < 15 {
                continue;
            }
            total += sentence.chars().count();
            picked.push(sentence);
            if picked.len() >= 4 || total > 600 {
                break;
            }
        }
    }

    let text = picked.join(" ");
    if text.chars().count() > 700 {
        let cut: String = text.chars().take(700).collect();
        format!("{cut}...")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_block_extracted_from_chatter() {
        let raw = "Here is the result:\n```json\n{\"a\": 1}\n```\nHope this helps!";
        let value = parse_json_block(raw).unwrap();
        assert_eq!(value["a"], 1);
        assert!(parse_json_block("no json here").is_none());
    }

    #[test]
    fn ad_response_threshold_applied() {
        let confident = r#"{"is_advertisement": true, "confidence": 0.85, "ad_type": "product_promotion", "reasoning": "sales pitch", "markers": ["call_to_action"]}"#;
        let verdict = parse_ad_response(confident);
        assert!(verdict.is_advertisement);
        assert!((verdict.confidence - 0.85).abs() < 1e-9);
        assert_eq!(verdict.ad_type.as_deref(), Some("product_promotion"));

        let weak = r#"{"is_advertisement": true, "confidence": 0.4, "reasoning": "maybe"}"#;
        let verdict = parse_ad_response(weak);
        assert!(!verdict.is_advertisement, "below 0.6 flips back to non-ad");
        assert!(verdict.reasoning.contains("threshold"));
    }

    #[test]
    fn malformed_ad_response_is_neutral() {
        let verdict = parse_ad_response("the model rambled with no json");
        assert!(!verdict.is_advertisement);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn date_response_confidence_gate() {
        let good = r#"{"date_found": true, "publication_date": "2025-07-29", "confidence": 0.8}"#;
        assert_eq!(parse_date_response(good).as_deref(), Some("2025-07-29"));

        let weak = r#"{"date_found": true, "publication_date": "2025-07-29", "confidence": 0.3}"#;
        assert!(parse_date_response(weak).is_none());

        let invalid = r#"{"date_found": true, "publication_date": "29 July", "confidence": 0.9}"#;
        assert!(parse_date_response(invalid).is_none());
    }

    #[test]
    fn link_response_absolutized() {
        let relative = r#"{"link_found": true, "full_article_url": "/full-story", "confidence": 0.8}"#;
        assert_eq!(
            parse_link_response(relative, "https://example.com/teaser").as_deref(),
            Some("https://example.com/full-story")
        );

        let absolute = r#"{"link_found": true, "full_article_url": "https://other.com/a", "confidence": 0.8}"#;
        assert_eq!(
            parse_link_response(absolute, "https://example.com/").as_deref(),
            Some("https://other.com/a")
        );
    }

    #[test]
    fn summary_validation_requires_cyrillic_and_length() {
        let original = "A long English source text about markets and earnings reports. ".repeat(5);
        assert!(!is_summary_valid("короткий", &original));
        assert!(!is_summary_valid(
            "This is a summary in English only, which is long enough but not Russian.",
            &original
        ));

        let good = "Компания отчиталась о росте выручки, аналитики отмечают устойчивый спрос на продукцию и сервисы.";
        assert!(is_summary_valid(good, &original));
    }

    #[test]
    fn summary_validation_rejects_copies() {
        let original = "Компания Apple отчиталась о рекордной выручке за квартал, превысив прогнозы аналитиков по всем направлениям бизнеса.";
        assert!(!is_summary_valid(original, original), "verbatim copy rejected");
    }

    #[test]
    fn service_prefixes_stripped() {
        let raw = "Краткое содержание: Компания выросла.";
        assert_eq!(clean_summary_text(raw), "Компания выросла.");
    }

    #[test]
    fn extractive_summary_picks_sentences() {
        let content = "Tiny. The company reported strong quarterly earnings that beat analyst expectations. \
                       Revenue grew by twenty percent year over year across all segments. \
                       The stock rose sharply in after-hours trading on the news. \
                       Analysts raised their price targets following the report. \
                       This sentence should not appear in the output.";
        let summary = simple_extractive_summary(content);
        assert!(summary.contains("strong quarterly earnings"));
        assert!(!summary.contains("should not appear"));
        assert!(summary.chars().count() <= 703);
    }

    #[test]
    fn analysis_parses_categories_and_ads() {
        let data = serde_json::json!({
            "optimized_title": "Better title",
            "summary": "Пересказ",
            "categories": [
                {"name": "Business", "confidence": 0.9},
                "Tech"
            ],
            "is_advertisement": true,
            "ad_confidence": 0.7,
            "ad_type": "spam",
            "ad_reasoning": "looks promotional",
            "ad_markers": ["price_mention"],
            "publication_date": "2025-07-29"
        });
        let analysis = parse_analysis(&data);
        assert_eq!(analysis.optimized_title.as_deref(), Some("Better title"));
        assert_eq!(analysis.categories.len(), 2);
        assert_eq!(analysis.categories[0].name, "Business");
        assert!((analysis.categories[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(analysis.categories[1].confidence, 1.0);
        assert_eq!(analysis.publication_date.as_deref(), Some("2025-07-29"));
        assert!(analysis.ad.is_advertisement);
    }
}
