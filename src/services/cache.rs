//! In-memory TTL cache for resolved sources.
//!
//! Keys are (showId, episodeNumber, mode) hashes; values are the final
//! `ResolvedSource` lists. TTL is short because upstream signed URLs expire
//! within minutes. Nothing is persisted; a restart simply starts cold.

use chrono::Utc;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time;
use tracing::debug;

use crate::models::ResolvedSource;

/// Cache key for one (show, episode, mode) request
pub fn cache_key(show_id: &str, episode_number: &str, mode: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}:{}:{}", show_id, episode_number, mode).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    sources: Vec<ResolvedSource>,
    created_at: i64,
    expires_at: i64,
}

/// Shared TTL key-value store owned by the source resolver.
/// Populated on miss, expires on TTL, never explicitly invalidated.
pub struct SourceCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl_ms: i64,
    max_entries: usize,
}

impl SourceCache {
    pub fn new(ttl_ms: i64, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl_ms,
            max_entries,
        }
    }

    /// Get a non-expired entry
    pub async fn get(&self, key: &str) -> Option<Vec<ResolvedSource>> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.expires_at <= Utc::now().timestamp_millis() {
            return None;
        }
        Some(entry.sources.clone())
    }

    /// Insert, evicting oldest entries when over the cap
    pub async fn insert(&self, key: &str, sources: Vec<ResolvedSource>) {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                sources,
                created_at: now,
                expires_at: now + self.ttl_ms,
            },
        );

        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            let mut by_age: Vec<(String, i64)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.created_at))
                .collect();
            by_age.sort_by_key(|(_, created_at)| *created_at);
            for (key, _) in by_age.into_iter().take(excess) {
                entries.remove(&key);
            }
        }
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Clone for SourceCache {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl_ms: self.ttl_ms,
            max_entries: self.max_entries,
        }
    }
}

/// Background task dropping expired entries periodically
pub async fn start_purge_task(cache: SourceCache, interval_secs: u64) {
    let mut interval = time::interval(time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let removed = cache.cleanup_expired().await;
        if removed > 0 {
            debug!(cache_purged = removed, "expired source cache entries removed");
        }
    }
}
