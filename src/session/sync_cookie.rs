//! Cookie synchronization wire format.
//!
//! The client runtime keeps `document.cookie` consistent with the session's
//! server-side jar via specially named cookies on the proxy origin:
//!
//! server -> client (`Set-Cookie` header value):
//! ```text
//! s|<sessionId>|<name>|<domain>|<path>|<expires?>|<lastAccessedBase36>|=<value>;path=/
//! ```
//! client -> server (entries inside the request `Cookie` header):
//! ```text
//! c|<sessionId>|<name>|<domain>|<path>|<expires?>|<lastAccessedBase36>|=<value>
//! cw|...   (window-scoped variant, same field order)
//! ```
//! Field order and separators are part of the interop contract with the
//! client runtime and must not change.

use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use super::cookie_jar::StoredCookie;

/// Which side produced a sync cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// `s|`: emitted by the proxy toward the client.
    Server,
    /// `c|`: sent by the client runtime.
    Client,
    /// `cw|`: window-scoped client cookie.
    ClientWindow,
}

impl SyncKind {
    fn prefix(self) -> &'static str {
        match self {
            SyncKind::Server => "s",
            SyncKind::Client => "c",
            SyncKind::ClientWindow => "cw",
        }
    }
}

/// One cookie in sync-wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCookie {
    pub kind: SyncKind,
    pub session_id: String,
    pub name: String,
    pub domain: String,
    pub path: String,
    /// RFC 2822 expiry text, empty slot when the cookie is session-scoped.
    pub expires: Option<String>,
    pub last_accessed_ms: u64,
    pub value: String,
}

impl SyncCookie {
    /// Build the server->client form for a cookie just stored in the jar.
    pub fn from_stored(session_id: &str, cookie: &StoredCookie) -> SyncCookie {
        SyncCookie {
            kind: SyncKind::Server,
            session_id: session_id.to_string(),
            name: cookie.name.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            expires: cookie
                .expires
                .and_then(|at| at.format(&Rfc2822).ok()),
            last_accessed_ms: cookie.last_accessed_ms,
            value: cookie.value.clone(),
        }
    }

    /// Convert a client-synced cookie into jar form.
    pub fn into_stored(self) -> StoredCookie {
        StoredCookie {
            name: self.name,
            value: self.value,
            domain: self.domain,
            host_only: false,
            path: self.path,
            expires: self
                .expires
                .as_deref()
                .and_then(|e| OffsetDateTime::parse(e, &Rfc2822).ok()),
            secure: false,
            http_only: false,
            last_accessed_ms: self.last_accessed_ms,
        }
    }

    /// Full `Set-Cookie` header value for the server->client form.
    pub fn format_set_cookie(&self) -> String {
        format!("{};path=/", self.format_pair())
    }

    /// The `name=value` pair without attributes.
    pub fn format_pair(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|={}",
            self.kind.prefix(),
            self.session_id,
            self.name,
            self.domain,
            self.path,
            self.expires.as_deref().unwrap_or(""),
            base36(self.last_accessed_ms),
            self.value
        )
    }
}

/// Parse one `name=value` entry from a request `Cookie` header. Returns
/// `None` for ordinary (non-sync) cookies.
pub fn parse_sync_entry(name: &str, value: &str) -> Option<SyncCookie> {
    let mut fields = name.split('|');
    let kind = match fields.next()? {
        "c" => SyncKind::Client,
        "cw" => SyncKind::ClientWindow,
        "s" => SyncKind::Server,
        _ => return None,
    };
    let session_id = fields.next()?.to_string();
    let cookie_name = fields.next()?.to_string();
    let domain = fields.next()?.to_string();
    let path = fields.next()?.to_string();
    let expires = fields.next()?;
    let last_accessed = parse_base36(fields.next()?)?;
    // The name ends with `|`, so the final field is the empty string and the
    // actual value arrives as the cookie-pair value with a leading `=` folded
    // into the split.
    if fields.next() != Some("") || fields.next().is_some() {
        return None;
    }

    Some(SyncCookie {
        kind,
        session_id,
        name: cookie_name,
        domain,
        path,
        expires: if expires.is_empty() {
            None
        } else {
            Some(expires.to_string())
        },
        last_accessed_ms: last_accessed,
        value: value.to_string(),
    })
}

/// Split a request `Cookie` header into sync entries and ordinary pairs.
pub fn split_cookie_header(header: &str) -> (Vec<SyncCookie>, Vec<(String, String)>) {
    let mut sync = Vec::new();
    let mut plain = Vec::new();

    for entry in header.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, value) = match entry.split_once('=') {
            Some((n, v)) => (n, v),
            None => (entry, ""),
        };
        match parse_sync_entry(name, value) {
            Some(cookie) => sync.push(cookie),
            None => plain.push((name.to_string(), value.to_string())),
        }
    }

    (sync, plain)
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn parse_base36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 36).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_form_field_order() {
        let cookie = SyncCookie {
            kind: SyncKind::Server,
            session_id: "sid1".to_string(),
            name: "token".to_string(),
            domain: "example.com".to_string(),
            path: "/".to_string(),
            expires: None,
            last_accessed_ms: 36,
            value: "v1".to_string(),
        };
        assert_eq!(
            cookie.format_set_cookie(),
            "s|sid1|token|example.com|/||10|=v1;path=/"
        );
    }

    #[test]
    fn parse_client_entry() {
        let parsed = parse_sync_entry("c|sid1|token|example.com|/||10|", "v1").unwrap();
        assert_eq!(parsed.kind, SyncKind::Client);
        assert_eq!(parsed.session_id, "sid1");
        assert_eq!(parsed.name, "token");
        assert_eq!(parsed.domain, "example.com");
        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.expires, None);
        assert_eq!(parsed.last_accessed_ms, 36);
        assert_eq!(parsed.value, "v1");
    }

    #[test]
    fn parse_window_variant() {
        let parsed = parse_sync_entry("cw|sid1|a|h|/||z|", "x").unwrap();
        assert_eq!(parsed.kind, SyncKind::ClientWindow);
        assert_eq!(parsed.last_accessed_ms, 35);
    }

    #[test]
    fn ordinary_cookies_are_not_sync_entries() {
        assert!(parse_sync_entry("sid", "abc").is_none());
        assert!(parse_sync_entry("corp|x", "y").is_none());
    }

    #[test]
    fn splits_mixed_header() {
        let (sync, plain) =
            split_cookie_header("plain=1; c|sid|n|example.com|/||a|=v; other=2");
        assert_eq!(sync.len(), 1);
        assert_eq!(sync[0].name, "n");
        assert_eq!(plain, vec![
            ("plain".to_string(), "1".to_string()),
            ("other".to_string(), "2".to_string()),
        ]);
    }

    #[test]
    fn base36_round_trip() {
        for n in [0u64, 1, 35, 36, 1234567890123] {
            assert_eq!(parse_base36(&base36(n)), Some(n));
        }
    }
}
