//! Destination URL splitter.
//!
//! # Responsibilities
//! - Split a destination URL into scheme / host / port / remainder
//! - Normalize only what the proxy grammar requires (scheme and host case,
//!   default ports) and keep everything after the authority verbatim
//! - Resolve relative URLs against an absolute destination base
//!
//! The remainder (path + query + fragment) is never percent-encoded or
//! otherwise normalized: the proxy URL grammar appends the destination
//! verbatim, including repeated `?` characters. This is why the general
//! purpose `url` crate is not used here.

/// A destination URL decomposed into the parts the proxy grammar cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestUrl {
    /// Lower-cased scheme without separators (e.g. `http`, `about`).
    pub scheme: String,
    /// Lower-cased host, absent for `about:` pseudo-URLs.
    pub host: Option<String>,
    /// Explicit non-default port.
    pub port: Option<u16>,
    /// Everything after the authority, verbatim (path + query + fragment).
    /// For `about:` URLs this is the page name.
    pub partial: String,
}

/// Default port for a scheme, used to strip redundant port components.
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Schemes the proxy knows how to carry.
pub fn is_supported_scheme(scheme: &str) -> bool {
    matches!(
        scheme,
        "http" | "https" | "ws" | "wss" | "file" | "about"
    )
}

impl DestUrl {
    /// Split a destination URL. Returns `None` when the input does not start
    /// with a supported scheme.
    pub fn parse(raw: &str) -> Option<DestUrl> {
        let colon = raw.find(':')?;
        let scheme = raw[..colon].to_ascii_lowercase();
        if scheme.is_empty()
            || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
            || !is_supported_scheme(&scheme)
        {
            return None;
        }

        let rest = &raw[colon + 1..];

        if scheme == "about" {
            return Some(DestUrl {
                scheme,
                host: None,
                port: None,
                partial: rest.to_string(),
            });
        }

        let rest = rest.strip_prefix("//")?;

        if scheme == "file" {
            // file URLs carry no meaningful authority for our purposes.
            return Some(DestUrl {
                scheme,
                host: None,
                port: None,
                partial: format!("/{}", rest.trim_start_matches('/')),
            });
        }

        let authority_end = rest
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        let partial = rest[authority_end..].to_string();

        if authority.is_empty() {
            return None;
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if p.bytes().all(|b| b.is_ascii_digit()) && !p.is_empty() => {
                let port: u16 = p.parse().ok()?;
                (h.to_ascii_lowercase(), Some(port))
            }
            _ => (authority.to_ascii_lowercase(), None),
        };

        // Strip the scheme's default port so equivalent URLs compare equal.
        let port = port.filter(|p| Some(*p) != default_port(&scheme));

        Some(DestUrl {
            scheme,
            host: Some(host),
            port,
            partial,
        })
    }

    /// Reassemble the URL. Inverse of [`DestUrl::parse`] modulo
    /// normalization (case, default port).
    pub fn format(&self) -> String {
        match self.host {
            Some(ref host) => match self.port {
                Some(port) => format!("{}://{}:{}{}", self.scheme, host, port, self.partial),
                None => format!("{}://{}{}", self.scheme, host, self.partial),
            },
            None if self.scheme == "about" => format!("about:{}", self.partial),
            None => format!("{}://{}", self.scheme, self.partial),
        }
    }

    /// The origin (`scheme://host[:port]`), without any path component.
    pub fn origin(&self) -> String {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => format!("{}://{}:{}", self.scheme, host, port),
            (Some(host), None) => format!("{}://{}", self.scheme, host),
            (None, _) => format!("{}:{}", self.scheme, self.partial),
        }
    }

    /// Path portion of the remainder (up to the first `?` or `#`).
    pub fn path(&self) -> &str {
        let end = self
            .partial
            .find(|c| c == '?' || c == '#')
            .unwrap_or(self.partial.len());
        &self.partial[..end]
    }

    /// True when the URL is a bare origin with no path at all.
    pub fn is_bare_origin(&self) -> bool {
        self.host.is_some() && self.partial.is_empty()
    }
}

/// Resolve a possibly-relative URL against an absolute destination base.
///
/// Multiple leading slashes collapse to the scheme-relative form, matching
/// how browsers resolve them.
pub fn resolve(base: &DestUrl, reference: &str) -> String {
    if reference.is_empty() {
        return base.format();
    }

    if DestUrl::parse(reference).is_some() {
        return reference.to_string();
    }

    let slashes = reference.bytes().take_while(|b| *b == b'/').count();
    if slashes >= 2 {
        return format!("{}://{}", base.scheme, reference.trim_start_matches('/'));
    }

    match reference.as_bytes()[0] {
        b'/' => format!("{}{}", base.origin(), reference),
        b'?' => format!("{}{}{}", base.origin(), base.path(), reference),
        b'#' => {
            let without_hash = match base.partial.find('#') {
                Some(idx) => &base.partial[..idx],
                None => base.partial.as_str(),
            };
            format!("{}{}{}", base.origin(), without_hash, reference)
        }
        _ => {
            let dir = match base.path().rfind('/') {
                Some(idx) => &base.path()[..idx + 1],
                None => "/",
            };
            format!("{}{}{}", base.origin(), dir, reference)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_authority_and_partial() {
        let u = DestUrl::parse("http://Example.COM/pa/th?q=1#h").unwrap();
        assert_eq!(u.scheme, "http");
        assert_eq!(u.host.as_deref(), Some("example.com"));
        assert_eq!(u.port, None);
        assert_eq!(u.partial, "/pa/th?q=1#h");
        assert_eq!(u.format(), "http://example.com/pa/th?q=1#h");
    }

    #[test]
    fn strips_default_ports() {
        let a = DestUrl::parse("http://host:80/").unwrap();
        let b = DestUrl::parse("http://host/").unwrap();
        assert_eq!(a, b);

        let c = DestUrl::parse("https://host:443/x").unwrap();
        assert_eq!(c.port, None);

        let d = DestUrl::parse("https://host:8443/x").unwrap();
        assert_eq!(d.port, Some(8443));
    }

    #[test]
    fn preserves_repeated_question_marks() {
        let u = DestUrl::parse("http://h/p?a=1?b=2?c").unwrap();
        assert_eq!(u.partial, "/p?a=1?b=2?c");
        assert_eq!(u.format(), "http://h/p?a=1?b=2?c");
    }

    #[test]
    fn about_urls_have_no_authority() {
        let u = DestUrl::parse("about:blank").unwrap();
        assert_eq!(u.scheme, "about");
        assert!(u.host.is_none());
        assert_eq!(u.partial, "blank");
        assert_eq!(u.format(), "about:blank");
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(DestUrl::parse("gopher://h/").is_none());
        assert!(DestUrl::parse("no-scheme-here").is_none());
        assert!(DestUrl::parse("/relative/path").is_none());
    }

    #[test]
    fn bare_origin_detection() {
        assert!(DestUrl::parse("http://example.com").unwrap().is_bare_origin());
        assert!(!DestUrl::parse("http://example.com/").unwrap().is_bare_origin());
    }

    #[test]
    fn resolve_absolute_and_origin_relative() {
        let base = DestUrl::parse("http://h.example/dir/page.html?x=1").unwrap();
        assert_eq!(resolve(&base, "https://other/x"), "https://other/x");
        assert_eq!(resolve(&base, "/root.css"), "http://h.example/root.css");
        assert_eq!(resolve(&base, "sub.js"), "http://h.example/dir/sub.js");
        assert_eq!(resolve(&base, "?y=2"), "http://h.example/dir/page.html?y=2");
    }

    #[test]
    fn resolve_collapses_leading_slashes() {
        let base = DestUrl::parse("https://h.example/a").unwrap();
        assert_eq!(resolve(&base, "//cdn.example/x"), "https://cdn.example/x");
        assert_eq!(resolve(&base, "////cdn.example/x"), "https://cdn.example/x");
    }
}
