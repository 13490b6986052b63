//! Header transforms between client, proxy and destination.
//!
//! # Responsibilities
//! - Un-proxy request headers before they reach the destination (`host`,
//!   `origin`, `referer`, sync cookies)
//! - Re-proxy response headers that carry URLs back to the browser
//!   (`location`, `refresh`, `x-frame-options: ALLOW-FROM`)
//! - Strip headers that would break the rewritten content

use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, StatusCode};

use super::context::RequestPipelineContext;
use crate::session::{Session, SyncKind};
use crate::urlcodec::{
    format_proxy_url, parse_proxy_url, resolve, DestUrl, ProxyUrlOptions,
};

/// Accept-Encoding value offered upstream: exactly the codings the engine
/// can decode before rewriting.
const SUPPORTED_ENCODINGS: &str = "gzip, deflate, br";

/// Request headers never forwarded to the destination.
const DROPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Response headers never forwarded to the client. `set-cookie` is consumed
/// by the jar and re-emitted in sync form; CSP would block the injected
/// runtime; sourcemaps point at un-proxied URLs.
const DROPPED_RESPONSE_HEADERS: &[&str] = &[
    "set-cookie",
    "content-security-policy",
    "content-security-policy-report-only",
    "sourcemap",
    "x-sourcemap",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

/// Context for re-encoding destination URLs found in response headers with
/// the originating request's session and flag context.
pub struct RewriteContext {
    pub opts: ProxyUrlOptions,
    pub dest: DestUrl,
}

impl RewriteContext {
    pub fn from_pipeline(
        ctx: &RequestPipelineContext,
        proxy_protocol: &str,
        proxy_hostname: &str,
        proxy_port: u16,
    ) -> RewriteContext {
        RewriteContext {
            opts: ProxyUrlOptions {
                proxy_hostname: proxy_hostname.to_string(),
                proxy_port,
                proxy_protocol: proxy_protocol.to_string(),
                session_id: ctx.proxy_url.session_id.clone(),
                window_id: ctx.proxy_url.window_id.clone(),
                flags: ctx.proxy_url.flags,
                credentials: ctx.proxy_url.credentials,
                charset: ctx.proxy_url.charset.clone(),
                req_origin: ctx.proxy_url.req_origin.clone(),
            },
            dest: ctx.dest.clone(),
        }
    }

    /// Proxy-encode a possibly-relative destination URL.
    fn proxy_url_for(&self, raw: &str) -> String {
        format_proxy_url(&resolve(&self.dest, raw), &self.opts)
    }
}

/// Build the header map for the upstream request from the client's headers.
/// Sync cookies found in `cookie` are applied to the session jar; the
/// outgoing `cookie` header is rebuilt from the jar.
pub fn transform_request_headers(
    client_headers: &HeaderMap,
    ctx: &RequestPipelineContext,
    session: &Session,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(client_headers.len());

    for (name, value) in client_headers {
        if DROPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        match name.as_str() {
            "cookie" => {
                // Handled below from the jar.
            }
            "accept-encoding" => {
                out.insert(name.clone(), HeaderValue::from_static(SUPPORTED_ENCODINGS));
            }
            "origin" => {
                if let Some(rewritten) = unproxy_origin(value, ctx) {
                    if let Ok(v) = HeaderValue::from_str(&rewritten) {
                        out.insert(name.clone(), v);
                    }
                }
            }
            "referer" => {
                if let Some(rewritten) = unproxy_url_value(value) {
                    if let Ok(v) = HeaderValue::from_str(&rewritten) {
                        out.insert(name.clone(), v);
                    }
                }
            }
            _ => {
                out.append(name.clone(), value.clone());
            }
        }
    }

    apply_client_sync_cookies(client_headers, ctx, session);

    if let Some(cookie_header) = jar_cookie_header(ctx, session) {
        if let Ok(v) = HeaderValue::from_str(&cookie_header) {
            out.insert(http::header::COOKIE, v);
        }
    }

    // Page navigations from the automation driver arrive without a referer;
    // the session may pin one.
    if ctx.is_page && !out.contains_key(http::header::REFERER) {
        if let Some(ref referer) = session.options.referer {
            if let Ok(v) = HeaderValue::from_str(referer) {
                out.insert(http::header::REFERER, v);
            }
        }
    }

    out
}

/// Transform destination response headers for the client.
///
/// `processed` marks responses whose body is rewritten: their
/// `content-length`/`content-encoding` are recalculated by the dispatcher
/// and dropped here.
pub fn transform_response_headers(
    upstream: &HeaderMap,
    status: StatusCode,
    rewrite: &RewriteContext,
    processed: bool,
    strip_acao: bool,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream {
        if DROPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if processed && (name == "content-length" || name == "content-encoding") {
            continue;
        }
        if strip_acao && name == "access-control-allow-origin" {
            continue;
        }

        let rewritten = match name.as_str() {
            "location" if is_redirect(status) => value
                .to_str()
                .ok()
                .map(|v| rewrite.proxy_url_for(v)),
            "refresh" => value.to_str().ok().map(|v| rewrite_refresh(v, rewrite)),
            "x-frame-options" => value
                .to_str()
                .ok()
                .map(|v| rewrite_frame_options(v, rewrite)),
            _ => None,
        };

        match rewritten {
            Some(new_value) => {
                if let Ok(v) = HeaderValue::from_str(&new_value) {
                    out.append(name.clone(), v);
                }
            }
            None => {
                out.append(name.clone(), value.clone());
            }
        }
    }

    out
}

/// Only these statuses make `location` a navigation target; a 2xx
/// `location` (e.g. 201 Created) stays untouched.
fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// `Refresh: 5; url=<dest>` -> the url part proxied.
fn rewrite_refresh(value: &str, rewrite: &RewriteContext) -> String {
    match value.split_once("url=") {
        Some((prefix, url)) => {
            format!("{}url={}", prefix, rewrite.proxy_url_for(url.trim()))
        }
        None => value.to_string(),
    }
}

/// `X-Frame-Options: ALLOW-FROM <url>` -> the url part proxied; `DENY` and
/// `SAMEORIGIN` pass through.
fn rewrite_frame_options(value: &str, rewrite: &RewriteContext) -> String {
    let trimmed = value.trim();
    match trimmed
        .get(..10)
        .filter(|p| p.eq_ignore_ascii_case("allow-from"))
    {
        Some(_) => {
            let url = trimmed[10..].trim();
            format!("ALLOW-FROM {}", rewrite.proxy_url_for(url))
        }
        None => value.to_string(),
    }
}

/// An `origin` header pointing at the proxy becomes the recorded request
/// origin, falling back to the destination origin.
fn unproxy_origin(value: &HeaderValue, ctx: &RequestPipelineContext) -> Option<String> {
    let raw = value.to_str().ok()?;
    if let Some(parsed) = parse_proxy_url(raw) {
        return parsed.dest().map(|d| d.origin());
    }
    Some(
        ctx.req_origin()
            .map(str::to_string)
            .unwrap_or_else(|| ctx.dest.origin()),
    )
}

/// A `referer` pointing at a proxy URL becomes the destination URL it
/// carries; referers that do not parse as proxy URLs are dropped (they leak
/// the proxy origin).
fn unproxy_url_value(value: &HeaderValue) -> Option<String> {
    let raw = value.to_str().ok()?;
    parse_proxy_url(raw).map(|parsed| parsed.dest_url)
}

fn apply_client_sync_cookies(
    client_headers: &HeaderMap,
    ctx: &RequestPipelineContext,
    session: &Session,
) {
    for value in client_headers.get_all(http::header::COOKIE) {
        let Ok(header) = value.to_str() else { continue };
        let (sync, _plain) = crate::session::split_cookie_header(header);
        for cookie in sync {
            let window_scoped = cookie.kind == SyncKind::ClientWindow;
            if cookie.kind != SyncKind::Client && !window_scoped {
                continue;
            }
            if cookie.session_id != session.id {
                continue;
            }
            if window_scoped
                && ctx.proxy_url.window_id.is_some()
                && session.options.window_id != ctx.proxy_url.window_id
            {
                continue;
            }
            session.cookies.set_client_cookie(cookie.into_stored());
        }
    }
}

/// Jar cookies for the destination, honoring the recorded credentials mode.
fn jar_cookie_header(ctx: &RequestPipelineContext, session: &Session) -> Option<String> {
    use crate::urlcodec::Credentials;

    match ctx.proxy_url.credentials {
        Some(Credentials::Omit) => return None,
        Some(Credentials::SameOrigin) => {
            let same = ctx
                .req_origin()
                .map(|origin| crate::urlcodec::origins_match(origin, &ctx.dest.origin()))
                .unwrap_or(true);
            if !same {
                return None;
            }
        }
        _ => {}
    }
    session.cookies.cookie_header(&ctx.dest)
}

/// `Set-Cookie` header values of a response, in order.
pub fn set_cookie_values(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

/// Append a header value, ignoring values that are not valid header text.
pub fn append_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.append(name, v);
    }
}
