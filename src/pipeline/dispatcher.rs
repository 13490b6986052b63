//! Request dispatch: the pipeline state machine.
//!
//! # Responsibilities
//! - Accept or decline incoming requests against the proxy URL grammar
//! - Resolve the session; unopened sessions fail with the contract body
//! - Serve special pages without an upstream fetch
//! - Consult the response cache, fetch upstream on a miss
//! - Apply CORS/cookie policy, header rewriting, content transformation
//! - Finalize every path with a response; no request is left hanging

use std::time::Instant;

use axum::body::Body;
use axum::extract::{FromRequestParts, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;

use super::context::{ContentInfo, RequestPipelineContext};
use super::headers::{
    append_header, set_cookie_values, transform_request_headers, transform_response_headers,
    RewriteContext,
};
use super::same_origin;
use super::transform::TransformContext;
use crate::cache::{CacheEntry, ResponseCache};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::session::{SyncCookie, SESSION_NOT_OPENED};
use crate::upstream::DestinationRequest;
use crate::urlcodec::parse_proxy_url;

/// Body served for `about:blank` / `about:error` pages.
const SPECIAL_PAGE_BODY: &str = "<html><body></body></html>";

/// Upper bound on buffered request/response bodies. Processed responses are
/// fully buffered; this guards against unbounded documents.
const MAX_BUFFERED_BODY: usize = 100 * 1024 * 1024;

enum UpstreamBody {
    Buffered(Bytes),
    Streaming(Incoming),
}

/// Fallback handler for both listeners: everything that is not a service
/// endpoint lands here.
pub async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let path_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let Some(parsed) = parse_proxy_url(&path_query) else {
        tracing::debug!(path = %path_query, "Request declined: not a proxy URL");
        metrics::record_request(method.as_str(), 404, start);
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let Some(session) = state.registry.lookup(&parsed.session_id) else {
        tracing::warn!(session_id = %parsed.session_id, "Request for unopened session");
        metrics::record_request(method.as_str(), 500, start);
        return (StatusCode::INTERNAL_SERVER_ERROR, SESSION_NOT_OPENED).into_response();
    };

    if parsed.is_special_page() {
        metrics::record_request(method.as_str(), 200, start);
        return special_page_response();
    }

    let Some(dest) = parsed.dest() else {
        metrics::record_request(method.as_str(), 404, start);
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let ctx = RequestPipelineContext::new(parsed, dest, session, method);

    // The upgrade is extracted by hand: the flag alone does not make a
    // request an upgrade, and a non-upgrade request with the flag still goes
    // through the HTTP pipeline.
    if ctx.is_websocket && is_websocket_upgrade(request.headers()) {
        let (mut parts, _body) = request.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(ws) => crate::ws::bridge(ws, state, ctx, parts.headers),
            Err(rejection) => rejection.into_response(),
        };
    }

    let response = handle_http(&state, &ctx, request).await;
    metrics::record_request(ctx.method.as_str(), response.status().as_u16(), start);
    response
}

async fn handle_http(
    state: &AppState,
    ctx: &RequestPipelineContext,
    request: Request<Body>,
) -> Response {
    let accept = request
        .headers()
        .get(http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let upstream_headers = transform_request_headers(request.headers(), ctx, &ctx.session);

    let body = match axum::body::to_bytes(request.into_body(), MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let cache_key = ResponseCache::key(&ctx.method, &ctx.proxy_url.dest_url);
    let cacheable = state.cache.should_cache(
        &ctx.method,
        &ctx.dest,
        ctx.is_page,
        ctx.proxy_url.credentials,
        ctx.session.options.disable_page_caching,
    );

    if cacheable {
        if let Some(hit) = state.cache.get(&cache_key) {
            tracing::debug!(key = %cache_key, "Serving from cache");
            return finalize(
                state,
                ctx,
                hit.status,
                hit.headers,
                UpstreamBody::Buffered(hit.body),
                accept.as_deref(),
            )
            .await;
        }
    }

    let descriptor = DestinationRequest {
        method: ctx.method.clone(),
        dest: ctx.dest.clone(),
        headers: upstream_headers,
        body,
        is_ajax: ctx.is_ajax,
        timeout: ctx.session.options.request_timeouts.effective_or(
            ctx.is_ajax,
            state.timeouts.page_ms,
            state.timeouts.ajax_ms,
        ),
        disable_http2: ctx.session.options.disable_http2,
        forward_proxy: ctx.session.options.forward_proxy.clone(),
    };

    let response = match state.engine.send(&descriptor).await {
        Ok(response) => response,
        Err(e) => return upstream_error_response(ctx, &descriptor.url(), e.to_string()),
    };

    let (parts, incoming) = response.into_parts();

    if cacheable {
        let raw = match incoming.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return upstream_error_response(ctx, &descriptor.url(), e.to_string());
            }
        };
        state.cache.put(
            cache_key,
            CacheEntry {
                status: parts.status,
                headers: parts.headers.clone(),
                body: raw.clone(),
                created_at: Instant::now(),
            },
        );
        finalize(
            state,
            ctx,
            parts.status,
            parts.headers,
            UpstreamBody::Buffered(raw),
            accept.as_deref(),
        )
        .await
    } else {
        finalize(
            state,
            ctx,
            parts.status,
            parts.headers,
            UpstreamBody::Streaming(incoming),
            accept.as_deref(),
        )
        .await
    }
}

/// Turn the raw upstream response into the client response.
async fn finalize(
    state: &AppState,
    ctx: &RequestPipelineContext,
    status: StatusCode,
    upstream_headers: HeaderMap,
    body: UpstreamBody,
    accept: Option<&str>,
) -> Response {
    // 304 is relayed as-is: empty body, no rewriting. hyper's HTTP/1.1
    // encoder emits neither a body nor a content-length for 304, so the
    // zero length is implicit on the wire.
    if status == StatusCode::NOT_MODIFIED {
        return build_response(status, upstream_headers, Body::empty());
    }

    let info = ContentInfo::from_response(ctx, status, &upstream_headers, accept);

    let cors = same_origin::check(
        ctx.req_origin(),
        &ctx.dest,
        &upstream_headers,
        ctx.proxy_url.credentials,
    );

    if cors.allows_cookies() {
        let values = set_cookie_values(&upstream_headers);
        if !values.is_empty() {
            let stored = ctx.session.cookies.set_cookies(&ctx.dest, &values);
            ctx.session.queue_sync_cookies(
                stored
                    .iter()
                    .map(|c| SyncCookie::from_stored(&ctx.session.id, c))
                    .collect(),
            );
        }
    } else {
        tracing::debug!(
            dest = %ctx.dest.origin(),
            req_origin = ?ctx.req_origin(),
            "Cross-origin response without a grant; cookies ignored"
        );
    }

    let rewrite = RewriteContext::from_pipeline(
        ctx,
        &state.server_info.protocol,
        &state.server_info.hostname,
        state.server_info.port,
    );
    let mut headers = transform_response_headers(
        &upstream_headers,
        status,
        &rewrite,
        info.requires_processing,
        cors.strips_acao(),
    );

    // Browsers treat a 204 navigation as "stay on the current page", which
    // deadlocks page tests. Form targets keep the bare 204.
    let status = if status == StatusCode::NO_CONTENT && ctx.is_page && !ctx.proxy_url.flags.form {
        StatusCode::OK
    } else {
        status
    };

    if ctx.is_page || ctx.is_ajax {
        for cookie in ctx.session.take_pending_sync_cookies() {
            append_header(&mut headers, SET_COOKIE, &cookie.format_set_cookie());
        }
    }

    if !info.requires_processing {
        return match body {
            UpstreamBody::Buffered(bytes) => build_response(status, headers, Body::from(bytes)),
            UpstreamBody::Streaming(incoming) => {
                build_response(status, headers, Body::new(incoming))
            }
        };
    }

    let raw = match body {
        UpstreamBody::Buffered(bytes) => bytes,
        UpstreamBody::Streaming(incoming) => match incoming.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return upstream_error_response(ctx, &ctx.proxy_url.dest_url, e.to_string())
            }
        },
    };

    let decoded = match crate::upstream::decode_body(
        raw,
        info.content_encoding.as_deref(),
        &ctx.proxy_url.dest_url,
    ) {
        Ok(decoded) => decoded,
        Err(e) => return processing_error_response(e.to_string()),
    };

    let transform_ctx = TransformContext {
        dest_url: &ctx.proxy_url.dest_url,
        charset: info.charset.as_deref(),
        session: &ctx.session,
    };
    match state
        .transformer
        .transform(decoded, info.kind, &transform_ctx)
    {
        Ok(transformed) => {
            headers.insert(CONTENT_LENGTH, content_length_value(transformed.len()));
            build_response(status, headers, Body::from(transformed))
        }
        Err(e) => processing_error_response(e.to_string()),
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn special_page_response() -> Response {
    let mut response = (StatusCode::OK, SPECIAL_PAGE_BODY).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("text/html"));
    response.headers_mut().insert(
        CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

/// Route an upstream failure through the session's page-error hook, then
/// finalize as a 500. A handled error gets an empty body.
fn upstream_error_response(
    ctx: &RequestPipelineContext,
    url: &str,
    message: String,
) -> Response {
    tracing::warn!(url = %url, error = %message, "Destination request failed");

    let handled = ctx.is_page && ctx.session.handle_page_error(&message, url);
    let body = if handled { String::new() } else { message };
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}

fn processing_error_response(message: String) -> Response {
    tracing::error!(error = %message, "Content processing failed");
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn content_length_value(len: usize) -> http::HeaderValue {
    http::HeaderValue::from_str(&len.to_string())
        .unwrap_or_else(|_| http::HeaderValue::from_static("0"))
}
