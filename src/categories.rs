use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::store;

/// The closed display taxonomy. "Other" is the terminal fallback; the
/// set is never extended at runtime.
pub const FIXED_CATEGORIES: &[(&str, &str, &str)] = &[
    ("Serbia", "Сербия", "#dc3545"),
    ("Tech", "Технологии", "#007bff"),
    ("Business", "Бизнес", "#28a745"),
    ("Science", "Наука", "#6f42c1"),
    ("Politics", "Политика", "#839933"),
    ("International", "Международные", "#cd51bc"),
    ("Other", "Прочее", "#6c757d"),
];

/// Tie-break order for the fallback keyword scorer.
const FALLBACK_PRIORITY: &[&str] = &["Serbia", "Science", "Tech", "Business", "Politics", "International", "Other"];

/// Language-agnostic keyword table for the default mapping.
const DEFAULT_MAPPING: &[(&str, &str)] = &[
    // Technology
    ("technology", "Tech"),
    ("tech", "Tech"),
    ("software", "Tech"),
    ("ai", "Tech"),
    ("artificial intelligence", "Tech"),
    ("computer", "Tech"),
    ("digital", "Tech"),
    ("internet", "Tech"),
    ("programming", "Tech"),
    ("innovation", "Tech"),
    ("технологии", "Tech"),
    ("компьютер", "Tech"),
    ("программирование", "Tech"),
    ("интернет", "Tech"),
    ("цифровой", "Tech"),
    // Business
    ("business", "Business"),
    ("economy", "Business"),
    ("finance", "Business"),
    ("market", "Business"),
    ("trade", "Business"),
    ("investment", "Business"),
    ("company", "Business"),
    ("startup", "Business"),
    ("бизнес", "Business"),
    ("экономика", "Business"),
    ("финансы", "Business"),
    ("торговля", "Business"),
    ("инвестиции", "Business"),
    ("компания", "Business"),
    // Politics
    ("politics", "Politics"),
    ("government", "Politics"),
    ("election", "Politics"),
    ("policy", "Politics"),
    ("law", "Politics"),
    ("parliament", "Politics"),
    ("president", "Politics"),
    ("minister", "Politics"),
    ("политика", "Politics"),
    ("правительство", "Politics"),
    ("выборы", "Politics"),
    ("закон", "Politics"),
    ("парламент", "Politics"),
    ("президент", "Politics"),
    ("министр", "Politics"),
    // International
    ("international", "International"),
    ("world", "International"),
    ("global", "International"),
    ("foreign", "International"),
    ("europe", "International"),
    ("nato", "International"),
    ("eu", "International"),
    ("международные", "International"),
    ("мир", "International"),
    ("глобальный", "International"),
    ("европа", "International"),
    ("россия", "International"),
    ("китай", "International"),
    // Serbia
    ("serbia", "Serbia"),
    ("belgrade", "Serbia"),
    ("serbian", "Serbia"),
    ("вучич", "Serbia"),
    ("белград", "Serbia"),
    ("сербия", "Serbia"),
    ("сербский", "Serbia"),
    // Science
    ("science", "Science"),
    ("research", "Science"),
    ("study", "Science"),
    ("health", "Science"),
    ("medicine", "Science"),
    ("environment", "Science"),
    ("climate", "Science"),
    ("nature", "Science"),
    ("наука", "Science"),
    ("исследование", "Science"),
    ("здоровье", "Science"),
    ("медицина", "Science"),
    ("природа", "Science"),
    ("климат", "Science"),
    // Other
    ("news", "Other"),
    ("general", "Other"),
    ("other", "Other"),
    ("society", "Other"),
    ("culture", "Other"),
    ("sports", "Other"),
    ("entertainment", "Other"),
    ("новости", "Other"),
    ("общество", "Other"),
    ("культура", "Other"),
    ("спорт", "Other"),
    ("развлечения", "Other"),
    ("общее", "Other"),
];

#[derive(Debug, Clone, Serialize)]
pub struct DisplayCategory {
    pub name: String,
    pub display_name: String,
    pub color: String,
    pub ai_category: String,
    pub confidence: f64,
    pub mapping_source: String,
}

fn fixed_info(name: &str) -> (&'static str, &'static str, &'static str) {
    FIXED_CATEGORIES
        .iter()
        .find(|(n, _, _)| *n == name)
        .copied()
        .unwrap_or_else(|| *FIXED_CATEGORIES.last().expect("taxonomy non-empty"))
}

fn display(name: &str, ai_category: &str, confidence: f64, source: &str) -> DisplayCategory {
    let (name, display_name, color) = fixed_info(name);
    DisplayCategory {
        name: name.to_string(),
        display_name: display_name.to_string(),
        color: color.to_string(),
        ai_category: ai_category.to_string(),
        confidence,
        mapping_source: source.to_string(),
    }
}

/// Dictionary mapping without database access: exact match, then
/// substring in either direction.
pub fn map_default(ai_category: &str) -> Option<(&'static str, bool)> {
    let lower = ai_category.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    for (keyword, fixed) in DEFAULT_MAPPING {
        if *keyword == lower {
            return Some((fixed, true));
        }
    }
    for (keyword, fixed) in DEFAULT_MAPPING {
        if lower.contains(keyword) || keyword.contains(lower.as_str()) {
            return Some((fixed, false));
        }
    }
    None
}

/// Map a raw AI label to the display taxonomy: operator mapping table
/// first, then dictionary exact, dictionary substring, then Other.
/// Total: every input lands on a member of the closed taxonomy.
pub async fn map_ai_category(pool: &SqlitePool, ai_category: &str, confidence: f64) -> DisplayCategory {
    let label = if ai_category.trim().is_empty() { "Other" } else { ai_category };

    match store::lookup_category_mapping(pool, label).await {
        Ok(Some(mapping)) => {
            if let Err(e) = store::bump_mapping_usage(pool, mapping.id).await {
                debug!(error = %e, "mapping usage bump failed");
            }
            return display(&mapping.fixed_category, label, confidence, "database");
        }
        Ok(None) => {}
        Err(e) => debug!(error = %e, "mapping lookup failed"),
    }

    match map_default(label) {
        Some((fixed, true)) => display(fixed, label, confidence, "default_exact"),
        Some((fixed, false)) => display(fixed, label, confidence, "default_partial"),
        None => display("Other", label, confidence, "fallback"),
    }
}

/// Map an article's label set. Labels collapsing to the same display
/// category merge, keeping the maximum confidence; the first remaining
/// element is the article's primary display category.
pub async fn display_categories_for(pool: &SqlitePool, labels: &[(String, f64)]) -> Vec<DisplayCategory> {
    let mut result: Vec<DisplayCategory> = Vec::new();
    for (ai_category, confidence) in labels {
        let mapped = map_ai_category(pool, ai_category, *confidence).await;
        if let Some(existing) = result.iter_mut().find(|c| c.name == mapped.name) {
            if mapped.confidence > existing.confidence {
                existing.confidence = mapped.confidence;
                existing.ai_category = mapped.ai_category;
            }
        } else {
            result.push(mapped);
        }
    }
    result
}

/// Weighted keyword scorer used when no AI label exists. Ties break by
/// the fixed priority order, keeping the result deterministic.
pub fn fallback_category(title: &str, content: &str) -> &'static str {
    let text = format!("{title} {content}").to_lowercase();

    struct Class {
        name: &'static str,
        high: &'static [&'static str],
        medium: &'static [&'static str],
        low: &'static [&'static str],
    }

    const CLASSES: &[Class] = &[
        Class {
            name: "Serbia",
            high: &["belgrade", "novi sad", "vojvodina", "srbija", "белград"],
            medium: &["serbian", "beograd", "serbia's", "сербия"],
            low: &["serbia", "serb"],
        },
        Class {
            name: "Science",
            high: &["quantum", "genomics", "nanotechnology", "astrophysics", "breakthrough"],
            medium: &["research", "study", "scientist", "discovery", "experiment", "journal"],
            low: &["science", "scientific", "physics", "chemistry", "biology"],
        },
        Class {
            name: "Tech",
            high: &["blockchain", "cybersecurity", "cloud computing", "software development", "chatgpt", "llm"],
            medium: &["software", "algorithm", "programming", "developer", "api", "app", "artificial intelligence"],
            low: &["tech", "technology", "digital", "computer", "internet", "platform"],
        },
        Class {
            name: "Business",
            high: &["stock market", "ipo", "merger", "acquisition", "bankruptcy", "startup funding"],
            medium: &["economy", "economic", "financial", "investment", "revenue", "profit", "trading"],
            low: &["business", "company", "money", "market", "trade", "finance"],
        },
        Class {
            name: "Politics",
            high: &["parliament", "election results", "cabinet reshuffle"],
            medium: &["government", "election", "policy", "minister", "president"],
            low: &["politics", "political", "law"],
        },
        Class {
            name: "International",
            high: &["united nations", "nato summit", "european council"],
            medium: &["international", "diplomatic", "foreign policy", "sanctions"],
            low: &["global", "world", "foreign"],
        },
    ];

    let mut best: Option<(&'static str, u32)> = None;
    // Iterate in priority order so equal scores keep the earlier class
    for class in CLASSES {
        let mut score = 0u32;
        for keyword in class.high {
            if text.contains(keyword) {
                score += 3;
            }
        }
        for keyword in class.medium {
            if text.contains(keyword) {
                score += 2;
            }
        }
        for keyword in class.low {
            if text.contains(keyword) {
                score += 1;
            }
        }
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((class.name, score));
        }
    }

    match best {
        Some((name, score)) if score >= 2 => name,
        _ => "Other",
    }
}

/// Sanity hook for the priority list: it must enumerate the taxonomy.
#[allow(dead_code)]
fn priority_covers_taxonomy() -> bool {
    FIXED_CATEGORIES.iter().all(|(n, _, _)| FALLBACK_PRIORITY.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn mapping_is_total_over_any_label() {
        let pool = db::test_pool().await;
        for label in ["Tech", "weird-novel-label-42", "", "ИИ и машины", "economy"] {
            let mapped = map_ai_category(&pool, label, 0.5).await;
            assert!(
                FIXED_CATEGORIES.iter().any(|(n, _, _)| *n == mapped.name),
                "label '{label}' mapped outside taxonomy: {}",
                mapped.name
            );
        }
    }

    #[tokio::test]
    async fn mapping_is_idempotent() {
        let pool = db::test_pool().await;
        for label in ["technology", "serbia", "unknown-thing", "спорт"] {
            let once = map_ai_category(&pool, label, 1.0).await;
            let twice = map_ai_category(&pool, &once.name, 1.0).await;
            assert_eq!(once.name, twice.name, "label '{label}' not a fixed point");
        }
    }

    #[tokio::test]
    async fn database_mapping_wins_and_counts_usage() {
        let pool = db::test_pool().await;
        sqlx::query(
            "INSERT INTO category_mappings (ai_category, fixed_category, is_active) VALUES ('Crypto', 'Business', 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mapped = map_ai_category(&pool, "crypto", 0.9).await;
        assert_eq!(mapped.name, "Business");
        assert_eq!(mapped.mapping_source, "database");

        let mapping = store::lookup_category_mapping(&pool, "crypto").await.unwrap().unwrap();
        assert_eq!(mapping.usage_count, 1);
        assert!(mapping.last_used.is_some());
    }

    #[test]
    fn dictionary_exact_then_substring() {
        assert_eq!(map_default("technology"), Some(("Tech", true)));
        assert_eq!(map_default("fin-tech startup scene"), Some(("Tech", false)));
        assert!(map_default("zzzzqqq").is_none());
    }

    #[tokio::test]
    async fn duplicate_display_categories_merge_keeping_max_confidence() {
        let pool = db::test_pool().await;
        let labels = vec![
            ("technology".to_string(), 0.6),
            ("software".to_string(), 0.9),
            ("economy".to_string(), 0.5),
        ];
        let mapped = display_categories_for(&pool, &labels).await;
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].name, "Tech");
        assert!((mapped[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(mapped[1].name, "Business");
    }

    #[test]
    fn fallback_scoring_and_tie_priority() {
        assert_eq!(fallback_category("Belgrade announces new budget", ""), "Serbia");
        assert_eq!(
            fallback_category("New research study published in journal", ""),
            "Science"
        );
        // One weak hit only: below the 2-point floor
        assert_eq!(fallback_category("world", ""), "Other");
        assert_eq!(fallback_category("nothing to match here", ""), "Other");

        // "study" (Science medium) vs "software" (Tech medium): equal
        // scores keep the earlier class in priority order
        assert_eq!(fallback_category("study of software", ""), "Science");
    }

    #[test]
    fn priority_list_covers_taxonomy() {
        assert!(priority_covers_taxonomy());
    }
}
