//! In-memory response cache.
//!
//! # Responsibilities
//! - Hold cacheable upstream responses for the proxy process lifetime
//! - Share entries across sessions (keys carry no session prefix)
//! - Enforce eligibility: GET only, no session-specific content, size ceiling
//!
//! The cache is deliberately independent of HTTP cache-control semantics: an
//! eligible GET response is cached whether or not the destination sent
//! `cache-control`, and entries above the per-entry ceiling are rejected at
//! admission regardless of headers. Pages are never cached because their
//! processed body embeds session-specific injected resources.
//!
//! Concurrent misses for one key are not coalesced; each performs its own
//! upstream fetch. Known simplification, not a correctness requirement.

use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, Method, StatusCode};

use crate::observability::metrics;
use crate::urlcodec::{Credentials, DestUrl};

/// Cache admission/lookup policy knobs.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub max_entries: usize,
    /// Per-entry body ceiling in bytes. Entries above it are rejected.
    pub max_entry_bytes: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 512,
            max_entry_bytes: 5 * 1024 * 1024,
        }
    }
}

/// A cached upstream response: raw (pre-transform) status, headers and body.
/// Transformation is re-run per request so cached entries stay
/// session-independent.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub created_at: Instant,
}

/// Bounded LRU keyed by `(method, destination URL)`.
pub struct ResponseCache {
    policy: CachePolicy,
    entries: DashMap<String, CacheEntry>,
    // Recency list, front = least recently used.
    order: Mutex<Vec<String>>,
}

impl ResponseCache {
    pub fn new(policy: CachePolicy) -> ResponseCache {
        ResponseCache {
            policy,
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Cache key for a request. Session prefix is deliberately excluded so
    /// identical destination resources are shared across sessions.
    pub fn key(method: &Method, dest_url: &str) -> String {
        format!("{} {}", method, dest_url)
    }

    /// Whether a request/response pair may enter the cache at all. The size
    /// ceiling is checked separately at admission. Credentialed requests
    /// (include/same-origin modes) produce per-session responses and are
    /// never cached.
    pub fn should_cache(
        &self,
        method: &Method,
        dest: &DestUrl,
        is_page: bool,
        credentials: Option<Credentials>,
        session_caching_disabled: bool,
    ) -> bool {
        self.policy.enabled
            && !session_caching_disabled
            && method == Method::GET
            && dest.scheme != "file"
            && !is_page
            && !matches!(
                credentials,
                Some(Credentials::Include) | Some(Credentials::SameOrigin)
            )
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key).map(|e| e.value().clone());
        match entry {
            Some(entry) => {
                self.touch(key);
                metrics::record_cache_hit();
                Some(entry)
            }
            None => {
                metrics::record_cache_miss();
                None
            }
        }
    }

    pub fn put(&self, key: String, mut entry: CacheEntry) {
        // Entries are served to every session; a cookie set during one
        // session's fetch must not replay into another session's jar.
        entry.headers.remove(http::header::SET_COOKIE);

        if entry.body.len() > self.policy.max_entry_bytes {
            tracing::debug!(
                key = %key,
                size = entry.body.len(),
                ceiling = self.policy.max_entry_bytes,
                "Response too large for cache"
            );
            return;
        }

        self.entries.insert(key.clone(), entry);
        self.touch(&key);
        self.evict_excess();
        metrics::record_cache_size(self.entries.len());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&self, key: &str) {
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.retain(|k| k != key);
        order.push(key.to_string());
    }

    fn evict_excess(&self) {
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        while order.len() > self.policy.max_entries {
            let oldest = order.remove(0);
            self.entries.remove(&oldest);
            tracing::trace!(key = %oldest, "Cache entry evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &[u8]) -> CacheEntry {
        CacheEntry {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::copy_from_slice(body),
            created_at: Instant::now(),
        }
    }

    fn cache(max_entries: usize, max_entry_bytes: usize) -> ResponseCache {
        ResponseCache::new(CachePolicy {
            enabled: true,
            max_entries,
            max_entry_bytes,
        })
    }

    #[test]
    fn put_then_get() {
        let cache = cache(8, 1024);
        cache.put("GET http://h/a.js".to_string(), entry(b"body"));
        let hit = cache.get("GET http://h/a.js").unwrap();
        assert_eq!(&hit.body[..], b"body");
        assert!(cache.get("GET http://h/other.js").is_none());
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let cache = cache(8, 4);
        cache.put("k".to_string(), entry(b"too large"));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_order() {
        let cache = cache(2, 1024);
        cache.put("a".to_string(), entry(b"1"));
        cache.put("b".to_string(), entry(b"2"));
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a");
        cache.put("c".to_string(), entry(b"3"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn eligibility_policy() {
        let cache = cache(8, 1024);
        let http_dest = DestUrl::parse("http://h/s.js").unwrap();
        let file_dest = DestUrl::parse("file:///local/s.js").unwrap();

        assert!(cache.should_cache(&Method::GET, &http_dest, false, None, false));
        assert!(!cache.should_cache(&Method::POST, &http_dest, false, None, false));
        assert!(!cache.should_cache(&Method::GET, &file_dest, false, None, false));
        // Pages are always reprocessed per session.
        assert!(!cache.should_cache(&Method::GET, &http_dest, true, None, false));
        assert!(!cache.should_cache(&Method::GET, &http_dest, false, None, true));
    }

    #[test]
    fn credentialed_requests_are_not_cached() {
        let cache = cache(8, 1024);
        let dest = DestUrl::parse("http://h/s.js").unwrap();

        assert!(!cache.should_cache(&Method::GET, &dest, false, Some(Credentials::Include), false));
        assert!(!cache.should_cache(
            &Method::GET,
            &dest,
            false,
            Some(Credentials::SameOrigin),
            false
        ));
        assert!(cache.should_cache(&Method::GET, &dest, false, Some(Credentials::Omit), false));
    }

    #[test]
    fn set_cookie_is_stripped_at_admission() {
        let cache = cache(8, 1024);
        let mut headers = HeaderMap::new();
        headers.append(http::header::SET_COOKIE, "leaked=1".parse().unwrap());
        headers.append(http::header::SET_COOKIE, "leaked=2".parse().unwrap());
        headers.insert("etag", "\"v1\"".parse().unwrap());
        cache.put(
            "GET http://h/s.js".to_string(),
            CacheEntry {
                status: StatusCode::OK,
                headers,
                body: Bytes::from_static(b"body"),
                created_at: Instant::now(),
            },
        );

        let hit = cache.get("GET http://h/s.js").unwrap();
        assert!(hit.headers.get(http::header::SET_COOKIE).is_none());
        assert_eq!(hit.headers.get("etag").unwrap(), "\"v1\"");
    }

    #[test]
    fn disabled_cache_rejects_everything() {
        let cache = ResponseCache::new(CachePolicy {
            enabled: false,
            ..CachePolicy::default()
        });
        let dest = DestUrl::parse("http://h/s.js").unwrap();
        assert!(!cache.should_cache(&Method::GET, &dest, false, None, false));
    }
}
