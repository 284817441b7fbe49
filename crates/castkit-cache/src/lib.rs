//! # CastKit Cache
//!
//! Named request/response cache stores for the CastKit offline agent.
//!
//! This models the platform's CacheStorage contract: a set of named,
//! persistent key-value stores mapping a request URL to a stored response.
//! The agent owns the lifecycle of stores whose name carries its prefix;
//! stores with other prefixes belong to other agents and are never touched.
//!
//! Lookups ignore cache-control headers entirely. A stored entry stays
//! authoritative until its whole store is deleted by a newer agent version.
//!
//! ```text
//! CacheStorage
//!     └── Cache ("smooh-cast-static-cache-v1")
//!             └── URL → CacheEntry
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the cache key).
    pub url: String,

    /// Request method (effectively always GET).
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

/// Milliseconds since the Unix epoch, for `CacheEntry::cached_at`.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single named cache store.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries, keyed by request URL.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new, empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Look up a stored entry by request URL.
    pub fn match_url(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Store an entry under its URL, replacing any previous entry for that
    /// URL. Re-populating an already-populated cache is therefore
    /// idempotent: one entry per URL, last write wins.
    pub fn put(&mut self, url: &str, entry: CacheEntry) {
        trace!(cache = %self.name, url, status = entry.status, "cache put");
        self.entries.insert(url.to_string(), entry);
    }

    /// Delete the entry for a URL. Returns whether an entry was removed.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// All stored URLs.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The set of named cache stores visible in one storage partition.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new, empty cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache by name, creating it if absent.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = name, "opening new cache store");
                Cache::new(name)
            })
    }

    /// Get a cache by name without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check whether a cache with this name exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a whole cache store. Returns whether a store was removed.
    pub fn delete(&mut self, name: &str) -> bool {
        debug!(cache = name, "deleting cache store");
        self.caches.remove(name).is_some()
    }

    /// All cache store names.
    pub fn keys(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, status: u16, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status,
            headers: HashMap::new(),
            body: body.to_vec(),
            cached_at: now_millis(),
        }
    }

    #[test]
    fn test_put_and_match() {
        let mut cache = Cache::new("v1");
        cache.put("/favicon.ico", entry("/favicon.ico", 200, b"icon"));

        let hit = cache.match_url("/favicon.ico").unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.body, b"icon");
        assert!(cache.match_url("/other.ico").is_none());
    }

    #[test]
    fn test_put_overwrites_by_url() {
        let mut cache = Cache::new("v1");
        cache.put("/main.js", entry("/main.js", 200, b"old"));
        cache.put("/main.js", entry("/main.js", 200, b"new"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_url("/main.js").unwrap().body, b"new");
    }

    #[test]
    fn test_delete_entry() {
        let mut cache = Cache::new("v1");
        cache.put("/a.css", entry("/a.css", 200, b""));

        assert!(cache.delete("/a.css"));
        assert!(!cache.delete("/a.css"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_storage_open_creates() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        // Re-opening returns the same store, with its contents.
        storage.open("v1").put("/x", entry("/x", 200, b"x"));
        assert_eq!(storage.open("v1").len(), 1);
    }

    #[test]
    fn test_storage_delete() {
        let mut storage = CacheStorage::new();
        storage.open("v1");

        assert!(storage.delete("v1"));
        assert!(!storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_storage_keys() {
        let mut storage = CacheStorage::new();
        storage.open("a-v1");
        storage.open("b-v2");

        let mut keys = storage.keys();
        keys.sort();
        assert_eq!(keys, vec!["a-v1".to_string(), "b-v2".to_string()]);
    }

    #[test]
    fn test_entry_serde() {
        let e = entry("/cast/manifest.json", 200, b"{}");
        let json = serde_json::to_string(&e).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
