use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::ai_client::AiClient;
use crate::categories;
use crate::store;

/// Tags the Telegram Bot API accepts in HTML parse mode.
const ALLOWED_TAGS: &[&str] = &[
    "b", "strong", "i", "em", "u", "ins", "s", "strike", "del", "a", "code", "pre", "tg-spoiler",
];

/// Telegram hard limit is 4096; truncate with margin.
const TELEGRAM_HTML_LIMIT: usize = 4000;
/// Budget for a single-message digest.
const SINGLE_MESSAGE_BUDGET: usize = 2600;
/// Budget per part when the digest splits in two.
const SPLIT_PART_BUDGET: usize = 3400;

/// Connectors used when converting lingering bullet lists to narrative.
const NARRATIVE_CONNECTORS: &[&str] = &["Кроме того,", "Также", "При этом"];

/// Builds the daily Telegram digest: groups enriched articles by display
/// category, asks the AI for connected prose, validates the HTML against
/// the allowed tag set, and splits into two balanced parts when the
/// single-message budget would be exceeded.
pub struct DigestBuilder {
    pool: SqlitePool,
    ai: Arc<AiClient>,
}

impl DigestBuilder {
    pub fn new(pool: SqlitePool, ai: Arc<AiClient>) -> Self {
        Self { pool, ai }
    }

    /// Make sure DailySummary rows exist for the date; generate them from
    /// the day's enriched articles when missing (or when forced).
    pub async fn ensure_daily_summaries(&self, date: NaiveDate, force: bool) -> Result<usize> {
        if !force {
            let existing = store::get_daily_summaries(&self.pool, date).await?;
            if !existing.is_empty() {
                debug!(%date, count = existing.len(), "using existing daily summaries");
                return Ok(existing.len());
            }
        } else {
            store::delete_daily_summaries(&self.pool, date).await?;
        }

        let grouped = self.grouped_articles(date).await?;
        for (category, items) in &grouped {
            let mut summary_text = String::new();
            for (title, summary) in items.iter().take(10) {
                summary_text.push_str(&format!("- {title}"));
                if !summary.is_empty() {
                    let short: String = summary.chars().take(200).collect();
                    summary_text.push_str(&format!(": {short}"));
                }
                summary_text.push('\n');
            }
            store::upsert_daily_summary(&self.pool, date, category, summary_text.trim(), items.len() as i64).await?;
        }

        info!(%date, categories = grouped.len(), "daily summaries generated");
        Ok(grouped.len())
    }

    /// Build the digest: one HTML string, or two parts with disjoint
    /// category groups when the single-message budget is exceeded.
    pub async fn build_digest(&self, date: NaiveDate) -> Result<Vec<String>> {
        self.ensure_daily_summaries(date, false).await?;

        let grouped = self.grouped_articles(date).await?;
        if grouped.is_empty() {
            return Ok(Vec::new());
        }

        let single = self
            .ai
            .generate_digest(&grouped, None)
            .await
            .context("generating digest")?;
        let Some(single) = single else {
            return Ok(Vec::new());
        };

        if single.chars().count() <= SINGLE_MESSAGE_BUDGET {
            let validated = validate_telegram_html(&lists_to_narrative(&single))
                .context("digest failed HTML validation")?;
            return Ok(vec![validated]);
        }

        // Over budget: split categories into two balanced groups by
        // article count and generate each part separately.
        let counts: Vec<(String, usize)> = grouped.iter().map(|(c, items)| (c.clone(), items.len())).collect();
        let (first_names, second_names) = split_categories(&counts);

        let pick = |names: &[String]| -> Vec<(String, Vec<(String, String)>)> {
            grouped
                .iter()
                .filter(|(c, _)| names.contains(c))
                .cloned()
                .collect()
        };

        let mut parts = Vec::new();
        for (index, names) in [first_names, second_names].iter().enumerate() {
            let group = pick(names);
            if group.is_empty() {
                continue;
            }
            let part = self
                .ai
                .generate_digest(&group, Some((index as u8 + 1, SPLIT_PART_BUDGET)))
                .await
                .context("generating digest part")?;
            if let Some(part) = part {
                let validated = validate_telegram_html(&lists_to_narrative(&part))
                    .context("digest part failed HTML validation")?;
                parts.push(validated);
            }
        }

        if parts.is_empty() {
            warn!(%date, "digest split produced no parts");
        }
        Ok(parts)
    }

    /// The day's articles grouped by primary display category, as
    /// (category, [(title, summary)]) preserving recency order.
    async fn grouped_articles(&self, date: NaiveDate) -> Result<Vec<(String, Vec<(String, String)>)>> {
        let articles = store::get_articles_for_date(&self.pool, date).await?;
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
        let category_rows = store::get_article_categories(&self.pool, &ids).await?;

        let mut grouped: Vec<(String, Vec<(String, String)>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for article in &articles {
            let labels: Vec<(String, f64)> = category_rows
                .get(&article.id)
                .map(|rows| rows.iter().map(|r| (r.ai_category.clone(), r.confidence)).collect())
                .unwrap_or_default();

            let primary = if labels.is_empty() {
                categories::fallback_category(&article.title, article.content.as_deref().unwrap_or("")).to_string()
            } else {
                let mapped = categories::display_categories_for(&self.pool, &labels).await;
                mapped.first().map(|c| c.name.clone()).unwrap_or_else(|| "Other".to_string())
            };

            let entry = (
                article.title.clone(),
                article.summary.clone().unwrap_or_default(),
            );
            match index.get(&primary) {
                Some(&i) => grouped[i].1.push(entry),
                None => {
                    index.insert(primary.clone(), grouped.len());
                    grouped.push((primary, vec![entry]));
                }
            }
        }

        // Largest categories first, like the stored summaries
        grouped.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        Ok(grouped)
    }
}

/// Greedy balanced split: categories in descending size order, each
/// assigned to the currently smaller bucket. The groups are disjoint and
/// together cover every category.
pub fn split_categories(counts: &[(String, usize)]) -> (Vec<String>, Vec<String>) {
    let mut sorted: Vec<&(String, usize)> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));

    let mut first = (Vec::new(), 0usize);
    let mut second = (Vec::new(), 0usize);
    for (name, count) in sorted {
        if first.1 <= second.1 {
            first.0.push(name.clone());
            first.1 += count;
        } else {
            second.0.push(name.clone());
            second.1 += count;
        }
    }
    (first.0, second.0)
}

/// Convert lingering bullet/numbered lists into narrative sentences with
/// fixed connector words.
pub fn lists_to_narrative(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut connector = 0usize;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let bullet = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("• "))
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| {
                let re = regex::Regex::new(r"^\d+\.\s+").expect("static regex");
                re.find(trimmed).map(|m| &trimmed[m.end()..])
            });

        match bullet {
            Some(rest) if !rest.trim().is_empty() => {
                let connective = NARRATIVE_CONNECTORS[connector % NARRATIVE_CONNECTORS.len()];
                connector += 1;
                let mut sentence = rest.trim().to_string();
                if !sentence.ends_with(['.', '!', '?']) {
                    sentence.push('.');
                }
                if let Some(last) = out.last_mut() {
                    last.push_str(&format!(" {connective} {}", lowercase_first(&sentence)));
                } else {
                    out.push(sentence);
                }
            }
            _ => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Validate and clean HTML for the Telegram Bot API: only the allowed
/// tag set survives (disallowed tags are unwrapped, their text kept),
/// anchors keep only `href`, and over-long output is smart-truncated at a
/// sentence boundary with open tags re-closed.
pub fn validate_telegram_html(html: &str) -> Option<String> {
    if html.trim().is_empty() {
        return None;
    }

    let tag_re = regex::Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9-]*)((?:[^>'\x22]|'[^']*'|\x22[^\x22]*\x22)*)>")
        .expect("static regex");
    let href_re = regex::Regex::new(r#"href\s*=\s*("([^"]*)"|'([^']*)')"#).expect("static regex");

    let mut out = String::with_capacity(html.len());
    let mut cursor = 0usize;

    for caps in tag_re.captures_iter(html) {
        let whole = caps.get(0).expect("match");
        out.push_str(&html[cursor..whole.start()]);
        cursor = whole.end();

        let closing = !caps[1].is_empty();
        let name = caps[2].to_lowercase();

        if !ALLOWED_TAGS.contains(&name.as_str()) {
            // Unwrap: drop the tag, keep surrounding text
            continue;
        }

        if closing {
            out.push_str(&format!("</{name}>"));
        } else if name == "a" {
            // Anchors keep only href
            let href = href_re
                .captures(&caps[3])
                .and_then(|h| h.get(2).or(h.get(3)))
                .map(|m| m.as_str())
                .unwrap_or("");
            out.push_str(&format!(r#"<a href="{href}">"#));
        } else {
            out.push_str(&format!("<{name}>"));
        }
    }
    out.push_str(&html[cursor..]);

    // Whitespace cleanup
    let re_blank = regex::Regex::new(r"\n\s*\n").expect("static regex");
    let mut clean = re_blank.replace_all(&out, "\n\n").to_string();
    let re_spaces = regex::Regex::new(r" {2,}").expect("static regex");
    clean = re_spaces.replace_all(&clean, " ").trim().to_string();

    if clean.chars().count() > TELEGRAM_HTML_LIMIT {
        clean = smart_truncate_html(&clean, TELEGRAM_HTML_LIMIT);
    }

    Some(clean)
}

/// Truncate HTML at a sentence-ish boundary and re-close any tags left
/// open by the cut.
pub fn smart_truncate_html(html: &str, max_chars: usize) -> String {
    if html.chars().count() <= max_chars {
        return html.to_string();
    }

    let window: String = html.chars().take(max_chars.saturating_sub(50)).collect();
    let mut cut = window.len();
    for boundary in [". ", "! ", "? ", "\n\n", "\n", ", ", " "] {
        if let Some(pos) = window.rfind(boundary) {
            if pos > window.len() / 2 {
                cut = pos + boundary.len();
                break;
            }
        }
    }
    let mut truncated = window[..cut].trim_end().to_string();
    truncated.push_str("...");

    // Close tags the cut left open
    let tag_re = regex::Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)[^>]*>").expect("static regex");
    let mut open: Vec<String> = Vec::new();
    for caps in tag_re.captures_iter(&truncated) {
        let closing = !caps[1].is_empty();
        let name = caps[2].to_lowercase();
        if closing {
            if let Some(pos) = open.iter().rposition(|t| *t == name) {
                open.remove(pos);
            }
        } else {
            open.push(name);
        }
    }
    for name in open.into_iter().rev() {
        truncated.push_str(&format!("</{name}>"));
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags_in(html: &str) -> Vec<String> {
        let re = regex::Regex::new(r"</?([a-zA-Z][a-zA-Z0-9-]*)").unwrap();
        re.captures_iter(html).map(|c| c[1].to_lowercase()).collect()
    }

    #[test]
    fn disallowed_tags_unwrapped_text_kept() {
        let html = "<div><b>Сводка</b> новостей <span>дня</span></div><script>bad()</script>";
        let clean = validate_telegram_html(html).unwrap();
        assert!(clean.contains("<b>Сводка</b>"));
        assert!(clean.contains("дня"));
        for tag in tags_in(&clean) {
            assert!(ALLOWED_TAGS.contains(&tag.as_str()), "tag '{tag}' leaked through");
        }
    }

    #[test]
    fn anchors_keep_only_href() {
        let html = r#"<a href="https://ex.com/a" class="link" onclick="x()" target="_blank">link</a>"#;
        let clean = validate_telegram_html(html).unwrap();
        assert_eq!(clean, r#"<a href="https://ex.com/a">link</a>"#);
    }

    #[test]
    fn over_limit_truncated_with_closed_tags() {
        let body = "Первое предложение сводки. ".repeat(300);
        let html = format!("<b>Заголовок</b> {body}");
        let clean = validate_telegram_html(&html).unwrap();
        assert!(clean.chars().count() <= TELEGRAM_HTML_LIMIT + 10);

        let opens = clean.matches("<b>").count();
        let closes = clean.matches("</b>").count();
        assert_eq!(opens, closes, "tags re-closed after truncation");
    }

    #[test]
    fn truncation_closes_cut_tag() {
        let html = format!("<b>{}", "слово ".repeat(2000));
        let truncated = smart_truncate_html(&html, 500);
        assert!(truncated.ends_with("</b>"));
        assert!(truncated.chars().count() <= 520);
    }

    #[test]
    fn empty_input_rejected() {
        assert!(validate_telegram_html("   ").is_none());
    }

    #[test]
    fn split_is_disjoint_and_covers_all() {
        let counts = vec![
            ("Tech".to_string(), 30),
            ("Business".to_string(), 20),
            ("Serbia".to_string(), 15),
            ("Science".to_string(), 8),
            ("Politics".to_string(), 5),
            ("Other".to_string(), 2),
        ];
        let (first, second) = split_categories(&counts);

        let mut all: Vec<&String> = first.iter().chain(second.iter()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), counts.len(), "disjoint and complete");

        let sum = |names: &[String]| -> usize {
            counts
                .iter()
                .filter(|(n, _)| names.contains(n))
                .map(|(_, c)| *c)
                .sum()
        };
        let (a, b) = (sum(&first), sum(&second));
        assert_eq!(a + b, 80, "total coverage preserved");
        assert!(a.abs_diff(b) <= 30, "roughly balanced: {a} vs {b}");
    }

    #[test]
    fn bullet_lists_become_narrative() {
        let text = "Вступление к сводке.\n- первый пункт\n- второй пункт\nЗаключение.";
        let narrative = lists_to_narrative(text);
        assert!(!narrative.contains("- "), "no bullets survive");
        assert!(narrative.contains("Кроме того,"));
        assert!(narrative.contains("первый пункт"));
    }
}
