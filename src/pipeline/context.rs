//! Per-request pipeline context and resource classification.

use std::sync::Arc;

use http::{HeaderMap, Method, StatusCode};

use crate::session::Session;
use crate::urlcodec::{DestUrl, ProxyUrl};

/// Content families the transformer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Page,
    Script,
    Stylesheet,
    Manifest,
    Other,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContentKind::Page => "page",
            ContentKind::Script => "script",
            ContentKind::Stylesheet => "stylesheet",
            ContentKind::Manifest => "manifest",
            ContentKind::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Short-lived state for one request travelling through the pipeline.
/// Everything here is derived; nothing is persisted.
pub struct RequestPipelineContext {
    pub proxy_url: ProxyUrl,
    pub dest: DestUrl,
    pub session: Arc<Session>,
    pub method: Method,
    /// Page-like resources: documents, iframes, HTML imports, form targets.
    pub is_page: bool,
    pub is_ajax: bool,
    pub is_websocket: bool,
}

impl RequestPipelineContext {
    pub fn new(
        proxy_url: ProxyUrl,
        dest: DestUrl,
        session: Arc<Session>,
        method: Method,
    ) -> RequestPipelineContext {
        let flags = proxy_url.flags;
        let is_page = !flags.script
            && !flags.stylesheet
            && !flags.ajax
            && !flags.web_socket
            && !flags.event_source
            && !flags.service_worker;

        RequestPipelineContext {
            is_page,
            is_ajax: flags.ajax,
            is_websocket: flags.web_socket,
            proxy_url,
            dest,
            session,
            method,
        }
    }

    /// The origin CORS checks compare against: the recorded request origin
    /// from the proxy URL when present.
    pub fn req_origin(&self) -> Option<&str> {
        self.proxy_url.req_origin.as_deref()
    }
}

/// What the response body turned out to be, derived from response headers
/// with the request's classification as fallback.
#[derive(Debug, Clone)]
pub struct ContentInfo {
    pub kind: ContentKind,
    /// Lower-cased media type without parameters; empty when absent.
    pub content_type: String,
    pub charset: Option<String>,
    pub content_encoding: Option<String>,
    /// Whether the body must be buffered, decoded and rewritten. Bodies
    /// without processing stream through untouched.
    pub requires_processing: bool,
}

impl ContentInfo {
    pub fn from_response(
        ctx: &RequestPipelineContext,
        status: StatusCode,
        response_headers: &HeaderMap,
        request_accept: Option<&str>,
    ) -> ContentInfo {
        let raw_content_type = header_str(response_headers, "content-type");

        // Some destinations omit content-type; infer it from what the
        // browser asked for rather than guessing from the body.
        let effective = match raw_content_type {
            Some(value) => value.to_string(),
            None => request_accept
                .map(accepted_media_type)
                .unwrap_or_default(),
        };

        let (media_type, charset_param) = split_media_type(&effective);
        let kind = classify(ctx, &media_type);

        let charset = charset_param.or_else(|| ctx.proxy_url.charset.clone());
        let content_encoding =
            header_str(response_headers, "content-encoding").map(str::to_string);

        // 304 and 204 have no body to rewrite; ajax responses go to the
        // in-page runtime verbatim.
        let requires_processing = kind != ContentKind::Other
            && !ctx.is_ajax
            && status != StatusCode::NOT_MODIFIED
            && status != StatusCode::NO_CONTENT;

        ContentInfo {
            kind,
            content_type: media_type,
            charset,
            content_encoding,
            requires_processing,
        }
    }
}

fn classify(ctx: &RequestPipelineContext, media_type: &str) -> ContentKind {
    let flags = ctx.proxy_url.flags;

    if ctx.is_page {
        if media_type.is_empty()
            || media_type == "text/html"
            || media_type == "application/xhtml+xml"
        {
            return ContentKind::Page;
        }
        return ContentKind::Other;
    }
    if flags.script || flags.service_worker || is_script_media_type(media_type) {
        return ContentKind::Script;
    }
    if flags.stylesheet || media_type == "text/css" {
        return ContentKind::Stylesheet;
    }
    if media_type == "text/cache-manifest" || media_type == "application/manifest+json" {
        return ContentKind::Manifest;
    }
    ContentKind::Other
}

fn is_script_media_type(media_type: &str) -> bool {
    media_type.contains("javascript") || media_type.contains("ecmascript")
}

/// First media type of an `Accept` header.
fn accepted_media_type(accept: &str) -> String {
    accept
        .split(',')
        .next()
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Split `Content-Type` into its media type and `charset` parameter.
fn split_media_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let media_type = parts.next().unwrap_or("").trim().to_ascii_lowercase();

    let charset = parts.find_map(|p| {
        let p = p.trim();
        p.to_ascii_lowercase()
            .strip_prefix("charset=")
            .map(|c| c.trim_matches('"').to_string())
    });

    (media_type, charset)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urlcodec::{parse_proxy_url, ResourceFlags};

    fn ctx(flags: ResourceFlags) -> RequestPipelineContext {
        let mut url = "http://127.0.0.1:1337/sid".to_string();
        if !flags.is_empty() {
            url.push('!');
            url.push_str(&flags.encode());
        }
        url.push_str("/http://h.example/res");
        let parsed = parse_proxy_url(&url).unwrap();
        let dest = parsed.dest().unwrap();
        RequestPipelineContext::new(parsed, dest, Arc::new(Session::new("sid")), Method::GET)
    }

    fn headers(content_type: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(ct) = content_type {
            h.insert("content-type", ct.parse().unwrap());
        }
        h
    }

    #[test]
    fn flagless_request_is_a_page() {
        let c = ctx(ResourceFlags::none());
        assert!(c.is_page);
        assert!(!c.is_ajax);
    }

    #[test]
    fn iframe_and_form_are_page_like() {
        assert!(ctx(ResourceFlags::IFRAME).is_page);
        assert!(ctx(ResourceFlags::FORM).is_page);
        assert!(!ctx(ResourceFlags::SCRIPT).is_page);
        assert!(!ctx(ResourceFlags::AJAX).is_page);
    }

    #[test]
    fn html_page_requires_processing() {
        let c = ctx(ResourceFlags::none());
        let info = ContentInfo::from_response(
            &c,
            StatusCode::OK,
            &headers(Some("text/html; charset=utf-8")),
            None,
        );
        assert_eq!(info.kind, ContentKind::Page);
        assert_eq!(info.charset.as_deref(), Some("utf-8"));
        assert!(info.requires_processing);
    }

    #[test]
    fn page_request_with_binary_body_streams_through() {
        let c = ctx(ResourceFlags::none());
        let info =
            ContentInfo::from_response(&c, StatusCode::OK, &headers(Some("application/pdf")), None);
        assert_eq!(info.kind, ContentKind::Other);
        assert!(!info.requires_processing);
    }

    #[test]
    fn missing_content_type_falls_back_to_accept() {
        let c = ctx(ResourceFlags::none());
        let info = ContentInfo::from_response(
            &c,
            StatusCode::OK,
            &headers(None),
            Some("text/html,application/xhtml+xml"),
        );
        assert_eq!(info.kind, ContentKind::Page);
    }

    #[test]
    fn ajax_is_never_processed() {
        let c = ctx(ResourceFlags::AJAX);
        let info =
            ContentInfo::from_response(&c, StatusCode::OK, &headers(Some("text/html")), None);
        assert!(!info.requires_processing);
    }

    #[test]
    fn not_modified_is_never_processed() {
        let c = ctx(ResourceFlags::none());
        let info = ContentInfo::from_response(
            &c,
            StatusCode::NOT_MODIFIED,
            &headers(Some("text/html")),
            None,
        );
        assert!(!info.requires_processing);
    }

    #[test]
    fn script_classification_by_flag_and_type() {
        let info = ContentInfo::from_response(
            &ctx(ResourceFlags::SCRIPT),
            StatusCode::OK,
            &headers(Some("application/octet-stream")),
            None,
        );
        assert_eq!(info.kind, ContentKind::Script);

        let info = ContentInfo::from_response(
            &ctx(ResourceFlags::STYLESHEET),
            StatusCode::OK,
            &headers(Some("text/css")),
            None,
        );
        assert_eq!(info.kind, ContentKind::Stylesheet);
    }
}
