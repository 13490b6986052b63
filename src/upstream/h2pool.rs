//! Per-origin HTTP/2 session pool.
//!
//! HTTP/2 sessions are shared per destination origin across proxy sessions
//! and requests, kept alive by their spawned driver task, and destroyed only
//! on protocol error or explicit invalidation. Origins that signalled
//! `HTTP_1_1_REQUIRED` (or failed ALPN) are remembered for a TTL so repeated
//! requests do not keep attempting the upgrade.

use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::Full;
use hyper::client::conn::http2::SendRequest;

pub type H2Sender = SendRequest<Full<Bytes>>;

const UNSUPPORTED_TTL: Duration = Duration::from_secs(60 * 60);

/// Explicit map of `(protocol, host, port)` to live HTTP/2 senders.
pub struct Http2Pool {
    sessions: DashMap<String, H2Sender>,
    unsupported: DashMap<String, Instant>,
}

/// Pool key for a destination origin.
pub fn origin_key(scheme: &str, host: &str, port: u16) -> String {
    format!("{}://{}:{}", scheme, host, port)
}

impl Http2Pool {
    pub fn new() -> Http2Pool {
        Http2Pool {
            sessions: DashMap::new(),
            unsupported: DashMap::new(),
        }
    }

    /// A clone of the live sender for an origin. Closed senders are dropped
    /// from the pool on the way out.
    pub fn get(&self, key: &str) -> Option<H2Sender> {
        let sender = self.sessions.get(key).map(|s| s.value().clone())?;
        if sender.is_closed() {
            self.sessions.remove(key);
            return None;
        }
        Some(sender)
    }

    pub fn insert(&self, key: String, sender: H2Sender) {
        self.sessions.insert(key, sender);
    }

    /// Drop the pooled session for an origin. Called on stream-level
    /// protocol errors before falling back to HTTP/1.1.
    pub fn invalidate(&self, key: &str) {
        if self.sessions.remove(key).is_some() {
            tracing::debug!(origin = %key, "HTTP/2 session invalidated");
        }
    }

    /// Remember that an origin cannot speak HTTP/2.
    pub fn mark_unsupported(&self, key: &str) {
        self.unsupported.insert(key.to_string(), Instant::now());
    }

    pub fn is_unsupported(&self, key: &str) -> bool {
        match self.unsupported.get(key) {
            Some(marked) => {
                if marked.elapsed() < UNSUPPORTED_TTL {
                    true
                } else {
                    drop(marked);
                    self.unsupported.remove(key);
                    false
                }
            }
            None => false,
        }
    }
}

impl Default for Http2Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_keys_are_distinct_per_port() {
        assert_ne!(
            origin_key("https", "h.example", 443),
            origin_key("https", "h.example", 8443)
        );
    }

    #[test]
    fn unsupported_marking() {
        let pool = Http2Pool::new();
        let key = origin_key("https", "legacy.example", 443);
        assert!(!pool.is_unsupported(&key));
        pool.mark_unsupported(&key);
        assert!(pool.is_unsupported(&key));
    }

    #[test]
    fn get_on_empty_pool() {
        let pool = Http2Pool::new();
        assert!(pool.get("https://h:443").is_none());
    }
}
