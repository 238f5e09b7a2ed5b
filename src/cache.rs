use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

/// TTL-bounded JSON cache, one file per key hash. Writes go through a
/// temp file + rename so readers never observe a partial entry. Expired
/// entries are deleted lazily on read; `sweep` removes the rest.
pub struct FileCache {
    dir: PathBuf,
    default_ttl: Duration,
    write_lock: Mutex<()>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_files: usize,
    pub expired_files: usize,
    pub active_files: usize,
    pub total_size_bytes: u64,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>, default_ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating cache directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            default_ttl,
            write_lock: Mutex::new(()),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key);
        let content = tokio::fs::read_to_string(&path).await.ok()?;

        let data: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(_) => {
                // Corrupted entry, drop it
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };

        let expires_at = data.get("expires_at").and_then(|v| v.as_i64()).unwrap_or(0);
        if Utc::now().timestamp() > expires_at {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }

        serde_json::from_value(data.get("value")?.clone()).ok()
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let path = self.entry_path(key);
        let now = Utc::now().timestamp();
        let ttl = ttl.unwrap_or(self.default_ttl);

        let data = json!({
            "value": value,
            "created_at": now,
            "expires_at": now + ttl.as_secs() as i64,
            "key": key,
        });
        let body = serde_json::to_string(&data).context("serializing cache entry")?;

        let _guard = self.write_lock.lock().await;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("writing cache entry: {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("committing cache entry: {}", path.display()));
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> bool {
        tokio::fs::remove_file(self.entry_path(key)).await.is_ok()
    }

    /// Remove all expired entries. Returns the number of files deleted.
    pub async fn sweep(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut removed = 0;

        let mut entries = tokio::fs::read_dir(&self.dir).await.context("listing cache directory")?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
                    Ok(data) => now > data.get("expires_at").and_then(|v| v.as_i64()).unwrap_or(0),
                    Err(_) => true,
                },
                Err(_) => continue,
            };
            if expired && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, dir = %self.dir.display(), "swept expired cache entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let now = Utc::now().timestamp();
        let mut stats = CacheStats::default();

        let mut entries = tokio::fs::read_dir(&self.dir).await.context("listing cache directory")?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            stats.total_files += 1;
            if let Ok(meta) = entry.metadata().await {
                stats.total_size_bytes += meta.len();
            }
            let expired = match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
                    Ok(data) => now > data.get("expires_at").and_then(|v| v.as_i64()).unwrap_or(0),
                    Err(_) => true,
                },
                Err(_) => true,
            };
            if expired {
                stats.expired_files += 1;
            }
        }

        stats.active_files = stats.total_files - stats.expired_files;
        Ok(stats)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_in(dir: &tempfile::TempDir) -> FileCache {
        FileCache::new(dir.path(), Duration::from_secs(3600)).unwrap()
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);

        cache.set("k", &json!({"a": 1}), None).await.unwrap();
        let value: Option<serde_json::Value> = cache.get("k").await;
        assert_eq!(value, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let value: Option<serde_json::Value> = cache.get("absent").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn expired_entry_removed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);

        cache.set("k", &json!("v"), Some(Duration::from_secs(0))).await.unwrap();
        // expires_at == now; one second in the past makes it strictly expired
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let value: Option<serde_json::Value> = cache.get("k").await;
        assert!(value.is_none());
        assert_eq!(cache.stats().await.unwrap().total_files, 0, "lazy delete removed the file");
    }

    #[tokio::test]
    async fn sweep_removes_expired_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);

        cache.set("live", &json!(1), Some(Duration::from_secs(3600))).await.unwrap();
        cache.set("dead", &json!(2), Some(Duration::from_secs(0))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let removed = cache.sweep().await.unwrap();
        assert_eq!(removed, 1);
        let live: Option<serde_json::Value> = cache.get("live").await;
        assert_eq!(live, Some(json!(1)));
    }

    #[tokio::test]
    async fn corrupted_entry_treated_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);

        cache.set("k", &json!("v"), None).await.unwrap();
        let path = cache.entry_path("k");
        tokio::fs::write(&path, "not json").await.unwrap();

        let value: Option<serde_json::Value> = cache.get("k").await;
        assert!(value.is_none());
    }
}
