use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

/// Source types the registry knows how to instantiate.
pub const SOURCE_TYPES: &[&str] = &[
    "rss",
    "telegram",
    "generic_page",
    "reddit",
    "twitter",
    "news_api",
    "custom",
];

#[derive(Debug, Deserialize)]
pub struct Config {
    pub vestnik: CoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub source: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Articles older than this are pruned by the cleanup job. "0d" disables pruning.
    #[serde(default = "default_retention")]
    pub retention: String,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: u32,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timezone() -> String {
    "Europe/Belgrade".to_string()
}
fn default_retention() -> String {
    "0d".to_string()
}
fn default_max_concurrent_fetches() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "vestnik.db".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    #[serde(default = "default_cache_ttl")]
    pub default_ttl: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            default_ttl: default_cache_ttl(),
        }
    }
}

fn default_cache_dir() -> String {
    "cache".to_string()
}
fn default_cache_ttl() -> String {
    "24h".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_per_host")]
    pub max_per_host: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    /// Token-bucket rate for POST requests (API calls), per second.
    #[serde(default = "default_post_rate")]
    pub post_rate_per_sec: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_per_host: default_max_per_host(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            post_rate_per_sec: default_post_rate(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}
fn default_max_per_host() -> u32 {
    5
}
fn default_request_timeout() -> String {
    "30s".to_string()
}
fn default_connect_timeout() -> String {
    "10s".to_string()
}
fn default_post_rate() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_summarization_model")]
    pub summarization_model: String,
    #[serde(default = "default_digest_model")]
    pub digest_model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            summarization_model: default_summarization_model(),
            digest_model: default_digest_model(),
        }
    }
}

fn default_summarization_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_digest_model() -> String {
    "gpt-4.1".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Chat that receives news digests.
    #[serde(default)]
    pub news_chat_id: String,
    /// Chat that receives service notifications. Optional.
    #[serde(default)]
    pub service_chat_id: String,
    /// Domains eligible for full-content replacement of short Telegram posts.
    /// Empty list disables the replacement.
    #[serde(default)]
    pub full_content_domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_true")]
    pub enable_browser: bool,
    #[serde(default = "default_true")]
    pub enable_learning: bool,
    #[serde(default = "default_memory_path")]
    pub memory_path: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            enable_browser: default_true(),
            enable_learning: default_true(),
            memory_path: default_memory_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_memory_path() -> String {
    "extractor_memory.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: String,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form per-source settings (selector overrides for generic pages, etc.).
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_fetch_interval() -> String {
    "30m".to_string()
}
fn default_enabled() -> bool {
    true
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        resolve(&self.vestnik.data_dir, &self.database.path)
    }

    /// Resolve the file-cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        resolve(&self.vestnik.data_dir, &self.cache.dir)
    }

    /// Resolve the extractor domain-memory snapshot path.
    pub fn extractor_memory_path(&self) -> PathBuf {
        resolve(&self.vestnik.data_dir, &self.extractor.memory_path)
    }
}

fn resolve(data_dir: &Path, p: &str) -> PathBuf {
    let p = Path::new(p);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        data_dir.join(p)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let mut config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Secrets may be supplied via environment instead of the config file.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("VESTNIK_AI_ENDPOINT") {
        config.ai.endpoint = v;
    }
    if let Ok(v) = std::env::var("VESTNIK_AI_API_KEY") {
        config.ai.api_key = v;
    }
    if let Ok(v) = std::env::var("VESTNIK_BOT_TOKEN") {
        config.telegram.bot_token = v;
    }
    if let Ok(v) = std::env::var("VESTNIK_NEWS_CHAT_ID") {
        config.telegram.news_chat_id = v;
    }
    if let Ok(v) = std::env::var("VESTNIK_SERVICE_CHAT_ID") {
        config.telegram.service_chat_id = v;
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    // Validate sources
    let mut source_names = HashSet::new();
    for source in &config.source {
        if !SOURCE_TYPES.contains(&source.source_type.as_str()) {
            return Err(ConfigError::Validation(format!(
                "source '{}': unknown type '{}'",
                source.name, source.source_type
            ))
            .into());
        }

        if source.url.trim().is_empty() {
            return Err(
                ConfigError::Validation(format!("source '{}': url must not be empty", source.name)).into(),
            );
        }

        humantime::parse_duration(&source.fetch_interval).map_err(|e| {
            ConfigError::Validation(format!(
                "source '{}': invalid fetch_interval '{}': {}",
                source.name, source.fetch_interval, e
            ))
        })?;

        if !source_names.insert(&source.name) {
            return Err(ConfigError::Validation(format!("duplicate source name: '{}'", source.name)).into());
        }
    }

    // Validate timezone
    config
        .vestnik
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", config.vestnik.timezone)))?;

    // Validate durations
    humantime::parse_duration(&config.vestnik.retention)
        .map_err(|e| ConfigError::Validation(format!("retention '{}': {}", config.vestnik.retention, e)))?;
    humantime::parse_duration(&config.cache.default_ttl)
        .map_err(|e| ConfigError::Validation(format!("cache ttl '{}': {}", config.cache.default_ttl, e)))?;
    humantime::parse_duration(&config.http.request_timeout).map_err(|e| {
        ConfigError::Validation(format!("http request_timeout '{}': {}", config.http.request_timeout, e))
    })?;
    humantime::parse_duration(&config.http.connect_timeout).map_err(|e| {
        ConfigError::Validation(format!("http connect_timeout '{}': {}", config.http.connect_timeout, e))
    })?;

    // AI is required for enrichment; fail at startup rather than mid-cycle
    if config.ai.endpoint.trim().is_empty() || config.ai.api_key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "[ai] endpoint and api_key must be configured (or VESTNIK_AI_ENDPOINT / VESTNIK_AI_API_KEY)"
                .to_string(),
        )
        .into());
    }

    if config.http.max_connections == 0 || config.http.max_per_host == 0 {
        return Err(ConfigError::Validation(
            "[http] max_connections and max_per_host must be positive".to_string(),
        )
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra: &str) -> Config {
        let base = r#"
[vestnik]
[ai]
endpoint = "https://km.example.com/v1/chat"
api_key = "test-key"
"#;
        toml::from_str(&format!("{base}\n{extra}")).expect("config parses")
    }

    #[test]
    fn defaults_applied() {
        let config = minimal_config("");
        assert_eq!(config.vestnik.listen, "0.0.0.0:8000");
        assert_eq!(config.http.max_connections, 20);
        assert_eq!(config.http.max_per_host, 5);
        assert_eq!(config.vestnik.max_concurrent_fetches, 5);
        assert!(config.telegram.full_content_domains.is_empty());
    }

    #[test]
    fn validates_minimal() {
        let config = minimal_config("");
        validate_config(&config).expect("minimal config valid");
    }

    #[test]
    fn rejects_unknown_source_type() {
        let config = minimal_config(
            r#"
[[source]]
name = "x"
type = "gopher"
url = "gopher://example.com"
"#,
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_duplicate_source_names() {
        let config = minimal_config(
            r#"
[[source]]
name = "a"
type = "rss"
url = "https://example.com/feed.xml"

[[source]]
name = "a"
type = "rss"
url = "https://example.org/feed.xml"
"#,
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_bad_timezone() {
        let mut config = minimal_config("");
        config.vestnik.timezone = "Mars/Olympus".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn db_path_resolution() {
        let config = minimal_config("");
        assert_eq!(config.db_path(), PathBuf::from("./data/vestnik.db"));
    }
}
