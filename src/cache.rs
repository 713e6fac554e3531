use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors that can occur during cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory where cached responses are stored
    pub cache_dir: PathBuf,
    /// How long a response stays valid
    pub ttl: Duration,
}

/// Metadata about a cached response
#[derive(Debug, Clone)]
struct CacheEntry {
    file_path: PathBuf,
    stored_at: SystemTime,
}

/// On-disk cache of catalog responses with a fixed time-to-live
///
/// Each response body is one `<key>.json` file; the key is a hash of the
/// request URL and its non-secret parameters. Expired entries are dropped on
/// startup and whenever a lookup finds one.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    /// In-memory index of cached responses (key -> CacheEntry)
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl ResponseCache {
    pub async fn new(config: CacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.cache_dir).await?;

        let cache = ResponseCache {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        };

        cache.load_existing_cache().await?;

        Ok(cache)
    }

    /// Cache key for a request; secrets must not be part of `params`
    pub fn cache_key(url: &str, params: &[(&str, &str)]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        for (name, value) in params {
            hasher.update(b"\0");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Get a cached response body if present and not expired
    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.write().await;

        let Some(entry) = entries.get(key) else {
            debug!("Cache miss for {}", key);
            return Ok(None);
        };

        let file_path = entry.file_path.clone();
        if self.is_expired(entry) {
            debug!("Cache entry {} expired, removing", key);
            entries.remove(key);
            remove_quietly(&file_path).await;
            return Ok(None);
        }

        match fs::read_to_string(&file_path).await {
            Ok(body) => {
                debug!("Cache hit for {}", key);
                Ok(Some(body))
            }
            Err(e) => {
                warn!("Cache entry {} unreadable, removing: {}", key, e);
                entries.remove(key);
                Ok(None)
            }
        }
    }

    /// Store a response body
    pub async fn put(&self, key: &str, body: &str) -> Result<(), CacheError> {
        let file_path = self.config.cache_dir.join(format!("{}.json", key));
        fs::write(&file_path, body).await?;

        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                file_path,
                stored_at: SystemTime::now(),
            },
        );

        debug!("Cached response {} ({} bytes)", key, body.len());
        Ok(())
    }

    /// Drop every expired entry; returns how many were removed
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                remove_quietly(&entry.file_path).await;
            }
        }

        if !expired.is_empty() {
            debug!("Pruned {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// Remove all cached responses
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        for entry in entries.values() {
            remove_quietly(&entry.file_path).await;
        }
        entries.clear();
        info!("Cleared response cache");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry
            .stored_at
            .elapsed()
            .map(|age| age > self.config.ttl)
            .unwrap_or(false)
    }

    /// Index existing cache files on startup, deleting the expired ones
    async fn load_existing_cache(&self) -> Result<(), CacheError> {
        let mut loaded = 0;
        let mut expired = 0;

        {
            let mut entries = self.entries.write().await;
            let mut dir_entries = fs::read_dir(&self.config.cache_dir).await?;
            while let Some(dir_entry) = dir_entries.next_entry().await? {
                let path = dir_entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from)
                else {
                    continue;
                };

                let stored_at = match dir_entry.metadata().await.and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) => {
                        warn!("Failed to read metadata for cache file {}: {}", path.display(), e);
                        continue;
                    }
                };

                let entry = CacheEntry {
                    file_path: path,
                    stored_at,
                };
                if self.is_expired(&entry) {
                    remove_quietly(&entry.file_path).await;
                    expired += 1;
                } else {
                    entries.insert(key, entry);
                    loaded += 1;
                }
            }
        }

        info!(
            "Response cache: loaded {} entries, pruned {} expired",
            loaded, expired
        );
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove cache file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn cache_with_ttl(dir: &TempDir, ttl: Duration) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            cache_dir: dir.path().join("cache"),
            ttl,
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_cache_key_depends_on_params() {
        let url = "https://comicvine.gamespot.com/api/issue/4000-8192/";
        let a = ResponseCache::cache_key(url, &[("format", "json"), ("field_list", "id")]);
        let b = ResponseCache::cache_key(url, &[("format", "json"), ("field_list", "name")]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, ResponseCache::cache_key(url, &[("format", "json"), ("field_list", "id")]));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_ttl(&dir, Duration::from_secs(60)).await;

        cache.put("abc", r#"{"status_code":1}"#).await.unwrap();
        assert_eq!(
            cache.get("abc").await.unwrap().as_deref(),
            Some(r#"{"status_code":1}"#)
        );
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_survive_restart() {
        let dir = TempDir::new().unwrap();
        {
            let cache = cache_with_ttl(&dir, Duration::from_secs(60)).await;
            cache.put("abc", "body").await.unwrap();
        }

        let reopened = cache_with_ttl(&dir, Duration::from_secs(60)).await;
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.get("abc").await.unwrap().as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_ttl(&dir, Duration::ZERO).await;

        cache.put("abc", "body").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.get("abc").await.unwrap(), None);
        assert!(cache.is_empty().await);
        assert!(!dir.path().join("cache").join("abc.json").exists());
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_ttl(&dir, Duration::ZERO).await;

        cache.put("a", "1").await.unwrap();
        cache.put("b", "2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.prune_expired().await, 2);
        assert!(cache.is_empty().await);
    }
}
