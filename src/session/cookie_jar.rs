//! Per-session cookie storage.
//!
//! # Responsibilities
//! - Apply `Set-Cookie` headers from destination responses
//! - Produce the `Cookie` header for upstream requests
//! - Domain/path/secure matching per RFC 6265
//!
//! Mutations are applied atomically per response: the whole batch of
//! `Set-Cookie` values from one response goes in under a single lock, so a
//! concurrently dispatched request for the same session never observes a
//! partial update.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use cookie::{Cookie, Expiration};
use time::OffsetDateTime;

use crate::urlcodec::DestUrl;

/// A cookie held by a session's jar.
#[derive(Debug, Clone)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// Lower-cased domain without a leading dot.
    pub domain: String,
    /// True when the cookie came without a `Domain` attribute and only
    /// matches the exact host.
    pub host_only: bool,
    pub path: String,
    pub expires: Option<OffsetDateTime>,
    pub secure: bool,
    pub http_only: bool,
    /// Milliseconds since the epoch; carried into sync cookies.
    pub last_accessed_ms: u64,
}

impl StoredCookie {
    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(at) => at <= OffsetDateTime::now_utc(),
            None => false,
        }
    }
}

/// Thread-safe cookie jar. One per session.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<Vec<StoredCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply all `Set-Cookie` values from one destination response.
    /// Returns the cookies that were stored, for client synchronization.
    pub fn set_cookies(&self, dest: &DestUrl, set_cookie_values: &[String]) -> Vec<StoredCookie> {
        let host = match dest.host {
            Some(ref h) => h.clone(),
            None => return Vec::new(),
        };

        let mut stored = Vec::new();
        let mut cookies = self.cookies.lock().unwrap_or_else(|e| e.into_inner());

        for raw in set_cookie_values {
            let parsed = match Cookie::parse(raw.as_str()) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let (domain, host_only) = match parsed.domain() {
                Some(d) => {
                    let d = d.trim_start_matches('.').to_ascii_lowercase();
                    if !domain_match(&d, false, &host) {
                        // A response may not set cookies for foreign domains.
                        continue;
                    }
                    (d, false)
                }
                None => (host.clone(), true),
            };

            let path = match parsed.path() {
                Some(p) if p.starts_with('/') => p.to_string(),
                _ => default_path(dest.path()),
            };

            let expires = match (parsed.max_age(), parsed.expires()) {
                (Some(max_age), _) => Some(OffsetDateTime::now_utc() + max_age),
                (None, Some(Expiration::DateTime(at))) => Some(at),
                _ => None,
            };

            cookies.retain(|c| {
                !(c.name == parsed.name() && c.domain == domain && c.path == path)
            });

            let cookie = StoredCookie {
                name: parsed.name().to_string(),
                value: parsed.value().to_string(),
                domain,
                host_only,
                path,
                expires,
                secure: parsed.secure().unwrap_or(false),
                http_only: parsed.http_only().unwrap_or(false),
                last_accessed_ms: now_ms(),
            };

            if !cookie.is_expired() {
                cookies.push(cookie.clone());
                stored.push(cookie);
            }
        }

        stored
    }

    /// Store a cookie synchronized from the client runtime.
    pub fn set_client_cookie(&self, cookie: StoredCookie) {
        let mut cookies = self.cookies.lock().unwrap_or_else(|e| e.into_inner());
        cookies.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });
        if !cookie.is_expired() {
            cookies.push(cookie);
        }
    }

    /// The `Cookie` header value for a destination request, or `None` when
    /// no stored cookie matches.
    pub fn cookie_header(&self, dest: &DestUrl) -> Option<String> {
        let host = dest.host.as_deref()?;
        let secure_channel = dest.scheme == "https" || dest.scheme == "wss";
        let path = dest.path();

        let mut cookies = self.cookies.lock().unwrap_or_else(|e| e.into_inner());
        cookies.retain(|c| !c.is_expired());

        let mut matched: Vec<&mut StoredCookie> = cookies
            .iter_mut()
            .filter(|c| {
                domain_match(&c.domain, c.host_only, host)
                    && path_match(&c.path, path)
                    && (!c.secure || secure_channel)
            })
            .collect();

        if matched.is_empty() {
            return None;
        }

        // Longer paths first, then older creation order; good enough for the
        // pairs browsers care about.
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));

        let now = now_ms();
        let header = matched
            .iter_mut()
            .map(|c| {
                c.last_accessed_ms = now;
                format!("{}={}", c.name, c.value)
            })
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    /// Snapshot of every live cookie, used for state capture.
    pub fn all_cookies(&self) -> Vec<StoredCookie> {
        let mut cookies = self.cookies.lock().unwrap_or_else(|e| e.into_inner());
        cookies.retain(|c| !c.is_expired());
        cookies.clone()
    }

    pub fn clear(&self) {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn domain_match(cookie_domain: &str, host_only: bool, host: &str) -> bool {
    if host == cookie_domain {
        return true;
    }
    if host_only {
        return false;
    }
    host.len() > cookie_domain.len()
        && host.ends_with(cookie_domain)
        && host.as_bytes()[host.len() - cookie_domain.len() - 1] == b'.'
}

fn path_match(cookie_path: &str, request_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

/// RFC 6265 default-path computation.
fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(url: &str) -> DestUrl {
        DestUrl::parse(url).unwrap()
    }

    #[test]
    fn stores_and_returns_cookie() {
        let jar = CookieJar::new();
        let d = dest("http://example.com/page");
        jar.set_cookies(&d, &["sid=abc".to_string()]);
        assert_eq!(jar.cookie_header(&d).as_deref(), Some("sid=abc"));
    }

    #[test]
    fn host_only_cookie_does_not_leak_to_subdomain() {
        let jar = CookieJar::new();
        jar.set_cookies(&dest("http://example.com/"), &["a=1".to_string()]);
        assert!(jar.cookie_header(&dest("http://sub.example.com/")).is_none());
    }

    #[test]
    fn domain_cookie_matches_subdomains() {
        let jar = CookieJar::new();
        jar.set_cookies(
            &dest("http://example.com/"),
            &["a=1; Domain=example.com".to_string()],
        );
        assert_eq!(
            jar.cookie_header(&dest("http://sub.example.com/")).as_deref(),
            Some("a=1")
        );
    }

    #[test]
    fn foreign_domain_attribute_is_rejected() {
        let jar = CookieJar::new();
        let stored = jar.set_cookies(
            &dest("http://example.com/"),
            &["a=1; Domain=evil.com".to_string()],
        );
        assert!(stored.is_empty());
        assert!(jar.cookie_header(&dest("http://evil.com/")).is_none());
    }

    #[test]
    fn secure_cookie_needs_https() {
        let jar = CookieJar::new();
        jar.set_cookies(&dest("https://example.com/"), &["a=1; Secure".to_string()]);
        assert!(jar.cookie_header(&dest("http://example.com/")).is_none());
        assert!(jar.cookie_header(&dest("https://example.com/")).is_some());
    }

    #[test]
    fn path_scoping() {
        let jar = CookieJar::new();
        jar.set_cookies(
            &dest("http://example.com/"),
            &["a=1; Path=/admin".to_string()],
        );
        assert!(jar.cookie_header(&dest("http://example.com/")).is_none());
        assert!(jar.cookie_header(&dest("http://example.com/admin/users")).is_some());
        assert!(jar.cookie_header(&dest("http://example.com/administrator")).is_none());
    }

    #[test]
    fn max_age_zero_expires_immediately() {
        let jar = CookieJar::new();
        let d = dest("http://example.com/");
        jar.set_cookies(&d, &["a=1".to_string()]);
        jar.set_cookies(&d, &["a=; Max-Age=0".to_string()]);
        assert!(jar.cookie_header(&d).is_none());
    }

    #[test]
    fn batch_replaces_same_name() {
        let jar = CookieJar::new();
        let d = dest("http://example.com/");
        jar.set_cookies(&d, &["a=1".to_string()]);
        jar.set_cookies(&d, &["a=2".to_string()]);
        assert_eq!(jar.cookie_header(&d).as_deref(), Some("a=2"));
        assert_eq!(jar.all_cookies().len(), 1);
    }
}
