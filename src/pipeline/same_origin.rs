//! Same-origin and CORS decisions.
//!
//! The proxy sits in place of the browser's own CORS machinery: cross-origin
//! ajax responses are always returned to the client (the in-page runtime
//! enforces visibility), but a response that fails the check must not leave
//! its `access-control-allow-origin` header in place and must not mutate the
//! session's cookie jar.

use http::HeaderMap;

use crate::urlcodec::{origins_match, Credentials, DestUrl};

/// Outcome of the origin check for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorsOutcome {
    /// Request origin matches the destination; no CORS involved.
    SameOrigin,
    /// Cross-origin and the destination granted access.
    Passed,
    /// Cross-origin without a grant. Body still flows to the client.
    Rejected,
}

impl CorsOutcome {
    /// Whether response `Set-Cookie` headers may enter the session jar.
    pub fn allows_cookies(self) -> bool {
        matches!(self, CorsOutcome::SameOrigin | CorsOutcome::Passed)
    }

    /// Whether `access-control-allow-origin` must be stripped before the
    /// response reaches the client.
    pub fn strips_acao(self) -> bool {
        matches!(self, CorsOutcome::Rejected)
    }
}

/// Evaluate the origin check for one response.
pub fn check(
    req_origin: Option<&str>,
    dest: &DestUrl,
    response_headers: &HeaderMap,
    credentials: Option<Credentials>,
) -> CorsOutcome {
    let req_origin = match req_origin {
        Some(origin) => origin,
        // No recorded request origin means the request was not made under
        // CORS rules at all.
        None => return CorsOutcome::SameOrigin,
    };

    if origins_match(req_origin, &dest.origin()) {
        return CorsOutcome::SameOrigin;
    }

    let acao = response_headers
        .get("access-control-allow-origin")
        .and_then(|v| v.to_str().ok());

    match acao {
        Some("*") => {
            // The wildcard grant is invalid for credentialed requests.
            if credentials == Some(Credentials::Include) {
                CorsOutcome::Rejected
            } else {
                CorsOutcome::Passed
            }
        }
        Some(granted) if origins_match(granted, req_origin) => {
            // Include-credentialed requests additionally need an explicit
            // allow-credentials grant.
            if credentials == Some(Credentials::Include) && !allows_credentials(response_headers) {
                CorsOutcome::Rejected
            } else {
                CorsOutcome::Passed
            }
        }
        _ => CorsOutcome::Rejected,
    }
}

fn allows_credentials(response_headers: &HeaderMap) -> bool {
    response_headers
        .get("access-control-allow-credentials")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> DestUrl {
        DestUrl::parse("http://api.example.com/data").unwrap()
    }

    fn headers(acao: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(value) = acao {
            h.insert("access-control-allow-origin", value.parse().unwrap());
        }
        h
    }

    #[test]
    fn same_origin_needs_no_grant() {
        let outcome = check(
            Some("http://api.example.com"),
            &dest(),
            &headers(None),
            None,
        );
        assert_eq!(outcome, CorsOutcome::SameOrigin);
        assert!(outcome.allows_cookies());
    }

    #[test]
    fn missing_grant_rejects_cross_origin() {
        let outcome = check(Some("http://page.example.com"), &dest(), &headers(None), None);
        assert_eq!(outcome, CorsOutcome::Rejected);
        assert!(!outcome.allows_cookies());
        assert!(outcome.strips_acao());
    }

    #[test]
    fn matching_grant_passes() {
        let outcome = check(
            Some("http://page.example.com"),
            &dest(),
            &headers(Some("http://page.example.com")),
            Some(Credentials::SameOrigin),
        );
        assert_eq!(outcome, CorsOutcome::Passed);
        assert!(outcome.allows_cookies());
    }

    #[test]
    fn include_needs_allow_credentials() {
        let without_acac = check(
            Some("http://page.example.com"),
            &dest(),
            &headers(Some("http://page.example.com")),
            Some(Credentials::Include),
        );
        assert_eq!(without_acac, CorsOutcome::Rejected);

        let mut granted = headers(Some("http://page.example.com"));
        granted.insert("access-control-allow-credentials", "true".parse().unwrap());
        let with_acac = check(
            Some("http://page.example.com"),
            &dest(),
            &granted,
            Some(Credentials::Include),
        );
        assert_eq!(with_acac, CorsOutcome::Passed);
        assert!(with_acac.allows_cookies());
    }

    #[test]
    fn wildcard_passes_only_without_credentials() {
        let anon = check(
            Some("http://page.example.com"),
            &dest(),
            &headers(Some("*")),
            Some(Credentials::Omit),
        );
        assert_eq!(anon, CorsOutcome::Passed);

        let credentialed = check(
            Some("http://page.example.com"),
            &dest(),
            &headers(Some("*")),
            Some(Credentials::Include),
        );
        assert_eq!(credentialed, CorsOutcome::Rejected);
    }

    #[test]
    fn foreign_grant_rejects() {
        let outcome = check(
            Some("http://page.example.com"),
            &dest(),
            &headers(Some("http://other.example.com")),
            None,
        );
        assert_eq!(outcome, CorsOutcome::Rejected);
    }

    #[test]
    fn no_recorded_origin_means_no_cors() {
        assert_eq!(check(None, &dest(), &headers(None), None), CorsOutcome::SameOrigin);
    }
}
