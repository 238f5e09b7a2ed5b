use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Success threshold after which a domain is considered stable.
const STABLE_SUCCESS_THRESHOLD: u32 = 5;
/// Minimum recorded attempts before AI selector discovery may fire.
const MIN_SAMPLES_FOR_DISCOVERY: u32 = 3;
/// Discovery fires only while the domain success rate stays below this.
const DISCOVERY_SUCCESS_RATE: f64 = 0.3;
/// Learned selectors are preferred once their rolling rate clears this.
pub const SELECTOR_TRUST_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainRecord {
    #[serde(default)]
    pub successes: HashMap<String, u32>,
    #[serde(default)]
    pub failures: HashMap<String, u32>,
    /// "method:selector" → rolling success rate in [0, 1].
    #[serde(default)]
    pub selectors: HashMap<String, f64>,
    #[serde(default)]
    pub last_ai_analysis: Option<i64>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub is_stable: bool,
    /// Learned page structure for the generic page monitor.
    #[serde(default)]
    pub container_selectors: Vec<String>,
    #[serde(default)]
    pub title_selectors: Vec<String>,
    #[serde(default)]
    pub link_selectors: Vec<String>,
    #[serde(default)]
    pub date_selectors: Vec<String>,
}

impl DomainRecord {
    pub fn total_successes(&self) -> u32 {
        self.successes.values().sum()
    }

    pub fn total_failures(&self) -> u32 {
        self.failures.values().sum()
    }

    pub fn best_method(&self) -> Option<String> {
        self.successes
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(method, _)| method.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub domains_tracked: usize,
    pub stable_domains: usize,
    pub total_successes: u64,
    pub total_failures: u64,
    pub learned_selectors: usize,
}

/// Per-host learning memory for the content extractor. Advisory only:
/// every lookup tolerates a missing or empty record, and a corrupted
/// snapshot on disk is discarded rather than propagated.
pub struct DomainMemory {
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, DomainRecord>>,
}

impl DomainMemory {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Load the snapshot if present. Corruption is non-fatal.
    pub fn load(path: PathBuf) -> Self {
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "domain memory snapshot corrupted, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        if !records.is_empty() {
            info!(path = %path.display(), domains = records.len(), "loaded extraction domain memory");
        }
        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    /// Persist a compact snapshot (atomic temp + rename).
    pub async fn save(&self) -> Result<()> {
        let Some(ref path) = self.path else { return Ok(()) };
        let records = self.records.read().await;
        let body = serde_json::to_string(&*records).context("serializing domain memory")?;
        drop(records);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("writing domain memory: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("committing domain memory: {}", path.display()))?;
        Ok(())
    }

    pub async fn best_method(&self, domain: &str) -> Option<String> {
        self.records.read().await.get(domain)?.best_method()
    }

    /// Top learned selectors for a method, best rate first.
    pub async fn learned_selectors(&self, domain: &str, method: &str) -> Vec<(String, f64)> {
        let records = self.records.read().await;
        let Some(record) = records.get(domain) else {
            return Vec::new();
        };
        let prefix = format!("{method}:");
        let mut selectors: Vec<(String, f64)> = record
            .selectors
            .iter()
            .filter_map(|(key, rate)| key.strip_prefix(&prefix).map(|s| (s.to_string(), *rate)))
            .collect();
        selectors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        selectors.truncate(5);
        selectors
    }

    pub async fn record_success(&self, domain: &str, method: &str) {
        let mut records = self.records.write().await;
        let record = records.entry(domain.to_string()).or_default();
        *record.successes.entry(method.to_string()).or_insert(0) += 1;
        record.consecutive_failures = 0;
        if record.total_successes() >= STABLE_SUCCESS_THRESHOLD {
            record.is_stable = true;
        }
        debug!(domain, method, "recorded extraction success");
    }

    pub async fn record_failure(&self, domain: &str, method: &str) {
        let mut records = self.records.write().await;
        let record = records.entry(domain.to_string()).or_default();
        *record.failures.entry(method.to_string()).or_insert(0) += 1;
        debug!(domain, method, "recorded extraction failure");
    }

    pub async fn record_complete_failure(&self, domain: &str) {
        let mut records = self.records.write().await;
        let record = records.entry(domain.to_string()).or_default();
        record.consecutive_failures += 1;
    }

    /// Bump a selector's rolling success rate by +0.1 capped at 1.0.
    pub async fn record_selector_success(&self, domain: &str, method: &str, selector: &str) {
        let mut records = self.records.write().await;
        let record = records.entry(domain.to_string()).or_default();
        let key = format!("{method}:{selector}");
        let rate = record.selectors.entry(key).or_insert(0.0);
        *rate = (*rate + 0.1).min(1.0);
    }

    /// Discovery fires only for struggling domains with enough history.
    pub async fn should_try_ai_discovery(&self, domain: &str) -> bool {
        let records = self.records.read().await;
        let Some(record) = records.get(domain) else {
            return false;
        };
        let attempts = record.total_successes() + record.total_failures();
        if attempts < MIN_SAMPLES_FOR_DISCOVERY {
            return false;
        }
        let success_rate = record.total_successes() as f64 / attempts as f64;
        success_rate < DISCOVERY_SUCCESS_RATE
    }

    pub async fn mark_ai_analysis(&self, domain: &str) {
        let mut records = self.records.write().await;
        let record = records.entry(domain.to_string()).or_default();
        record.last_ai_analysis = Some(Utc::now().timestamp());
    }

    pub async fn page_structure(&self, domain: &str) -> Option<DomainRecord> {
        self.records.read().await.get(domain).cloned()
    }

    pub async fn record_page_structure(
        &self,
        domain: &str,
        containers: Vec<String>,
        titles: Vec<String>,
        links: Vec<String>,
        dates: Vec<String>,
    ) {
        let mut records = self.records.write().await;
        let record = records.entry(domain.to_string()).or_default();
        record.container_selectors = containers;
        record.title_selectors = titles;
        record.link_selectors = links;
        record.date_selectors = dates;
        record.last_ai_analysis = Some(Utc::now().timestamp());
    }

    pub async fn stats(&self) -> MemoryStats {
        let records = self.records.read().await;
        MemoryStats {
            domains_tracked: records.len(),
            stable_domains: records.values().filter(|r| r.is_stable).count(),
            total_successes: records.values().map(|r| r.total_successes() as u64).sum(),
            total_failures: records.values().map(|r| r.total_failures() as u64).sum(),
            learned_selectors: records.values().map(|r| r.selectors.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn selector_rate_bumps_and_caps() {
        let memory = DomainMemory::in_memory();
        for _ in 0..15 {
            memory.record_selector_success("ex.com", "browser", ".prose").await;
        }
        let selectors = memory.learned_selectors("ex.com", "browser").await;
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].0, ".prose");
        assert!((selectors[0].1 - 1.0).abs() < 1e-9, "rate capped at 1.0");
    }

    #[tokio::test]
    async fn first_selector_success_starts_at_one_tenth() {
        let memory = DomainMemory::in_memory();
        memory.record_selector_success("ex.com", "browser", ".prose").await;
        let selectors = memory.learned_selectors("ex.com", "browser").await;
        assert!((selectors[0].1 - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn discovery_gated_on_samples_and_rate() {
        let memory = DomainMemory::in_memory();
        assert!(!memory.should_try_ai_discovery("ex.com").await, "unknown domain has no history");

        memory.record_failure("ex.com", "direct").await;
        memory.record_failure("ex.com", "readability").await;
        assert!(!memory.should_try_ai_discovery("ex.com").await, "below sample minimum");

        memory.record_failure("ex.com", "heuristics").await;
        assert!(memory.should_try_ai_discovery("ex.com").await, "3 attempts, 0% success");

        for _ in 0..3 {
            memory.record_success("ex.com", "direct").await;
        }
        assert!(!memory.should_try_ai_discovery("ex.com").await, "50% success rate");
    }

    #[tokio::test]
    async fn best_method_follows_success_counts() {
        let memory = DomainMemory::in_memory();
        memory.record_success("ex.com", "direct").await;
        memory.record_success("ex.com", "browser").await;
        memory.record_success("ex.com", "browser").await;
        assert_eq!(memory.best_method("ex.com").await.as_deref(), Some("browser"));
    }

    #[tokio::test]
    async fn stability_reached_after_threshold() {
        let memory = DomainMemory::in_memory();
        for _ in 0..STABLE_SUCCESS_THRESHOLD {
            memory.record_success("ex.com", "direct").await;
        }
        let record = memory.page_structure("ex.com").await.unwrap();
        assert!(record.is_stable);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_and_corruption_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let memory = DomainMemory::load(path.clone());
        memory.record_success("ex.com", "direct").await;
        memory.save().await.unwrap();

        let reloaded = DomainMemory::load(path.clone());
        assert_eq!(reloaded.best_method("ex.com").await.as_deref(), Some("direct"));

        std::fs::write(&path, "{broken").unwrap();
        let corrupted = DomainMemory::load(path);
        assert!(corrupted.best_method("ex.com").await.is_none(), "corruption starts empty");
    }
}
