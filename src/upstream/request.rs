//! Destination request engine.
//!
//! # Responsibilities
//! - Perform the actual upstream fetch for a request descriptor
//! - Negotiate HTTP/2 with per-origin session reuse, falling back to
//!   HTTP/1.1 on `HTTP_1_1_REQUIRED`/protocol errors without surfacing the
//!   first failure to the caller
//! - Apply the effective page/ajax timeout
//! - Resend once, transparently, on a connection reset before response
//!   headers
//! - Translate transport and parse failures into the structured taxonomy

use std::time::Duration;

use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, HeaderValue, Method, Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};

use super::connect::{classify_io_error, Connector, Transport, ALPN_H2};
use super::error::{DestinationError, DestinationResult, TimeoutPhase};
use super::h2pool::{origin_key, Http2Pool};
use crate::config::UpstreamConfig;
use crate::observability::metrics;
use crate::urlcodec::{default_port, DestUrl};

/// Everything the engine needs to perform one upstream exchange.
#[derive(Debug, Clone)]
pub struct DestinationRequest {
    pub method: Method,
    pub dest: DestUrl,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub is_ajax: bool,
    /// Effective timeout: ajax timeout for ajax requests, page timeout
    /// otherwise, already resolved against the session's options.
    pub timeout: Duration,
    /// Session-level HTTP/2 opt-out.
    pub disable_http2: bool,
    /// Session-level forward proxy override.
    pub forward_proxy: Option<String>,
}

impl DestinationRequest {
    /// Absolute destination URL without the fragment (fragments never go on
    /// the wire).
    pub fn url(&self) -> String {
        let formatted = self.dest.format();
        match formatted.find('#') {
            Some(idx) => formatted[..idx].to_string(),
            None => formatted,
        }
    }

    fn path_and_query(&self) -> &str {
        let end = self.dest.partial.find('#').unwrap_or(self.dest.partial.len());
        let pq = &self.dest.partial[..end];
        if pq.is_empty() {
            "/"
        } else {
            pq
        }
    }

    fn authority(&self) -> String {
        let host = self.dest.host.as_deref().unwrap_or_default();
        match self.dest.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    fn port(&self) -> u16 {
        self.dest
            .port
            .or_else(|| default_port(&self.dest.scheme))
            .unwrap_or(80)
    }
}

enum H2Failure {
    /// Retry the same request over HTTP/1.1; the caller must never see this.
    Fallback,
    Fatal(DestinationError),
}

/// What a failed HTTP/2 send means for the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum H2SendDisposition {
    /// The origin rejected HTTP/2 outright; retire it and retry over
    /// HTTP/1.1.
    RetireOrigin,
    /// The session broke; drop it and retry over HTTP/1.1.
    Retry,
    /// A real failure the caller must see.
    Fail,
}

fn h2_send_disposition(reason: Option<h2::Reason>) -> H2SendDisposition {
    match reason {
        Some(h2::Reason::HTTP_1_1_REQUIRED) => H2SendDisposition::RetireOrigin,
        Some(h2::Reason::PROTOCOL_ERROR) => H2SendDisposition::Retry,
        _ => H2SendDisposition::Fail,
    }
}

/// Performs upstream fetches. One instance shared across all requests.
pub struct DestinationRequestEngine {
    connector: Connector,
    pool: Http2Pool,
    disable_http2: bool,
    forward_proxy: Option<String>,
}

impl DestinationRequestEngine {
    pub fn new(config: &UpstreamConfig, connect_timeout: Duration) -> DestinationRequestEngine {
        DestinationRequestEngine {
            connector: Connector::new(connect_timeout),
            pool: Http2Pool::new(),
            disable_http2: config.disable_http2,
            forward_proxy: config.forward_proxy.clone(),
        }
    }

    /// Perform the exchange described by `descriptor`. Resolves once the
    /// response headers are in; the body streams afterwards.
    pub async fn send(
        &self,
        descriptor: &DestinationRequest,
    ) -> DestinationResult<Response<Incoming>> {
        let url = descriptor.url();
        let result =
            tokio::time::timeout(descriptor.timeout, self.send_inner(descriptor, &url)).await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                metrics::record_upstream_error(e.kind());
                Err(e)
            }
            Err(_) => {
                metrics::record_upstream_error("timeout");
                Err(DestinationError::RequestTimeout {
                    url,
                    phase: TimeoutPhase::Response,
                    timeout_ms: descriptor.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn send_inner(
        &self,
        descriptor: &DestinationRequest,
        url: &str,
    ) -> DestinationResult<Response<Incoming>> {
        let forward_proxy = descriptor
            .forward_proxy
            .clone()
            .or_else(|| self.forward_proxy.clone());

        let https = descriptor.dest.scheme == "https";
        let host = descriptor
            .dest
            .host
            .clone()
            .ok_or_else(|| DestinationError::Transport {
                url: url.to_string(),
                detail: "destination has no host".to_string(),
            })?;
        let port = descriptor.port();
        let key = origin_key(&descriptor.dest.scheme, &host, port);

        // HTTP/2 is only attempted directly to an https destination. An
        // intermediary forward proxy always speaks HTTP/1.1.
        let try_h2 = https
            && !self.disable_http2
            && !descriptor.disable_http2
            && forward_proxy.is_none()
            && !self.pool.is_unsupported(&key);

        if try_h2 {
            match self.h2_exchange(descriptor, url, &host, port, &key).await {
                Ok(response) => return Ok(response),
                Err(H2Failure::Fatal(e)) => return Err(e),
                Err(H2Failure::Fallback) => {
                    tracing::debug!(url, origin = %key, "Falling back to HTTP/1.1");
                    metrics::record_http2_fallback();
                }
            }
        }

        // HTTP/1.1, with a single transparent resend on a reset that
        // happened before response headers.
        let mut resent = false;
        loop {
            match self
                .h1_exchange(descriptor, url, &host, port, https, forward_proxy.as_deref())
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) if e.is_resend_safe() && !resent => {
                    tracing::debug!(url, error = %e, "Resending after transient connection failure");
                    resent = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn h2_exchange(
        &self,
        descriptor: &DestinationRequest,
        url: &str,
        host: &str,
        port: u16,
        key: &str,
    ) -> Result<Response<Incoming>, H2Failure> {
        let mut sender = match self.pool.get(key) {
            Some(sender) => sender,
            None => {
                let transport = self
                    .connector
                    .connect_tls(host, port, url, true)
                    .await
                    .map_err(H2Failure::Fatal)?;

                if transport.negotiated_alpn().as_deref() != Some(ALPN_H2) {
                    self.pool.mark_unsupported(key);
                    return Err(H2Failure::Fallback);
                }

                let stream = match transport {
                    Transport::Tls(stream) => stream,
                    Transport::Plain(_) => return Err(H2Failure::Fallback),
                };

                let (sender, conn) =
                    http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
                        .await
                        .map_err(|e| H2Failure::Fatal(map_hyper_error(e, url)))?;

                let driver_key = key.to_string();
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(origin = %driver_key, error = %e, "HTTP/2 connection ended");
                    }
                });

                self.pool.insert(key.to_string(), sender.clone());
                sender
            }
        };

        let request = build_h2_request(descriptor, url).map_err(H2Failure::Fatal)?;
        match sender.send_request(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.pool.invalidate(key);
                match h2_send_disposition(h2_reason(&e)) {
                    H2SendDisposition::RetireOrigin => {
                        self.pool.mark_unsupported(key);
                        Err(H2Failure::Fallback)
                    }
                    H2SendDisposition::Retry => Err(H2Failure::Fallback),
                    H2SendDisposition::Fail => Err(H2Failure::Fatal(map_hyper_error(e, url))),
                }
            }
        }
    }

    async fn h1_exchange(
        &self,
        descriptor: &DestinationRequest,
        url: &str,
        host: &str,
        port: u16,
        https: bool,
        forward_proxy: Option<&str>,
    ) -> DestinationResult<Response<Incoming>> {
        let request = build_h1_request(descriptor, url, forward_proxy.is_some())?;

        if let Some(proxy_addr) = forward_proxy {
            let (proxy_host, proxy_port) =
                proxy_addr
                    .rsplit_once(':')
                    .ok_or_else(|| DestinationError::Transport {
                        url: url.to_string(),
                        detail: format!("invalid forward proxy address {:?}", proxy_addr),
                    })?;
            let proxy_port: u16 =
                proxy_port.parse().map_err(|_| DestinationError::Transport {
                    url: url.to_string(),
                    detail: format!("invalid forward proxy port in {:?}", proxy_addr),
                })?;
            let stream = self
                .connector
                .connect_plain(proxy_host, proxy_port, url)
                .await?;
            return h1_send(TokioIo::new(stream), request, url).await;
        }

        if https {
            let transport = self.connector.connect_tls(host, port, url, false).await?;
            match transport {
                Transport::Tls(stream) => h1_send(TokioIo::new(stream), request, url).await,
                Transport::Plain(stream) => h1_send(TokioIo::new(stream), request, url).await,
            }
        } else {
            let stream = self.connector.connect_plain(host, port, url).await?;
            h1_send(TokioIo::new(stream), request, url).await
        }
    }
}

async fn h1_send<T>(
    io: TokioIo<T>,
    request: Request<Full<Bytes>>,
    url: &str,
) -> DestinationResult<Response<Incoming>>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(io)
        .await
        .map_err(|e| map_hyper_error(e, url))?;

    // The driver owns the socket; when the response body is dropped
    // (client disconnect) the connection is torn down with it.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::trace!(error = %e, "Upstream HTTP/1.1 connection ended");
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| map_hyper_error(e, url))
}

fn build_h1_request(
    descriptor: &DestinationRequest,
    url: &str,
    absolute_form: bool,
) -> DestinationResult<Request<Full<Bytes>>> {
    // A forward proxy gets the absolute-form request target.
    let uri: Uri = if absolute_form {
        url.parse()
    } else {
        descriptor.path_and_query().parse()
    }
    .map_err(|e: http::uri::InvalidUri| DestinationError::Transport {
        url: url.to_string(),
        detail: format!("invalid request target: {}", e),
    })?;

    let mut request = Request::builder()
        .method(descriptor.method.clone())
        .uri(uri)
        .body(Full::new(descriptor.body.clone()))
        .map_err(|e| DestinationError::Transport {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

    *request.headers_mut() = descriptor.headers.clone();
    let authority =
        HeaderValue::from_str(&descriptor.authority()).map_err(|_| DestinationError::Transport {
            url: url.to_string(),
            detail: "destination host is not a valid header value".to_string(),
        })?;
    request.headers_mut().insert(HOST, authority);

    Ok(request)
}

fn build_h2_request(
    descriptor: &DestinationRequest,
    url: &str,
) -> DestinationResult<Request<Full<Bytes>>> {
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| DestinationError::Transport {
            url: url.to_string(),
            detail: format!("invalid request target: {}", e),
        })?;

    let mut request = Request::builder()
        .method(descriptor.method.clone())
        .uri(uri)
        .body(Full::new(descriptor.body.clone()))
        .map_err(|e| DestinationError::Transport {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

    *request.headers_mut() = descriptor.headers.clone();
    // HTTP/2 carries the authority in the :authority pseudo-header.
    request.headers_mut().remove(HOST);

    Ok(request)
}

/// Translate a hyper error into the structured taxonomy. Parse failures get
/// the detailed diagnostic treatment: the exact reason plus a remediation
/// hint instead of an opaque parse exception.
pub fn map_hyper_error(e: hyper::Error, url: &str) -> DestinationError {
    if e.is_parse_too_large() {
        return DestinationError::MalformedUpstreamHeaders {
            url: url.to_string(),
            detail: "response headers exceed the maximum allowed size".to_string(),
            hint: "Raise the proxy's header size limit or reduce the headers sent by the destination server".to_string(),
        };
    }
    if e.is_parse() {
        return DestinationError::MalformedUpstreamHeaders {
            url: url.to_string(),
            detail: e.to_string(),
            hint: "Relax strict header parsing or fix the invalid header emitted by the destination server".to_string(),
        };
    }
    if e.is_incomplete_message() {
        return DestinationError::SocketHangUp {
            url: url.to_string(),
        };
    }

    if let Some(io) = find_source::<std::io::Error>(&e) {
        return classify_io_error(io, url);
    }

    DestinationError::Transport {
        url: url.to_string(),
        detail: e.to_string(),
    }
}

fn h2_reason(e: &hyper::Error) -> Option<h2::Reason> {
    find_source::<h2::Error>(e).and_then(|h2e| h2e.reason())
}

fn find_source<'a, E: std::error::Error + 'static>(e: &'a hyper::Error) -> Option<&'a E> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(typed) = err.downcast_ref::<E>() {
            return Some(typed);
        }
        source = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str) -> DestinationRequest {
        DestinationRequest {
            method: Method::GET,
            dest: DestUrl::parse(url).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            is_ajax: false,
            timeout: Duration::from_secs(25),
            disable_http2: false,
            forward_proxy: None,
        }
    }

    #[test]
    fn url_strips_fragment() {
        let d = descriptor("http://h.example/page?q=1#frag");
        assert_eq!(d.url(), "http://h.example/page?q=1");
    }

    #[test]
    fn path_and_query_defaults_to_root() {
        assert_eq!(descriptor("http://h.example").path_and_query(), "/");
        assert_eq!(descriptor("http://h.example/a?b=1").path_and_query(), "/a?b=1");
    }

    #[test]
    fn authority_keeps_explicit_port() {
        assert_eq!(descriptor("http://h.example:8080/").authority(), "h.example:8080");
        assert_eq!(descriptor("http://h.example/").authority(), "h.example");
        assert_eq!(descriptor("http://h.example/").port(), 80);
        assert_eq!(descriptor("https://h.example/").port(), 443);
    }

    #[test]
    fn h1_request_uses_origin_form_and_host_header() {
        let d = descriptor("http://h.example:8080/a?b=1");
        let req = build_h1_request(&d, &d.url(), false).unwrap();
        assert_eq!(req.uri().to_string(), "/a?b=1");
        assert_eq!(req.headers().get(HOST).unwrap(), "h.example:8080");
    }

    #[test]
    fn forward_proxy_request_uses_absolute_form() {
        let d = descriptor("http://h.example/a");
        let req = build_h1_request(&d, &d.url(), true).unwrap();
        assert_eq!(req.uri().to_string(), "http://h.example/a");
    }

    #[test]
    fn h2_send_failures_fall_back_without_surfacing() {
        // The two retryable stream errors route back to HTTP/1.1; anything
        // else surfaces to the caller.
        assert_eq!(
            h2_send_disposition(Some(h2::Reason::HTTP_1_1_REQUIRED)),
            H2SendDisposition::RetireOrigin
        );
        assert_eq!(
            h2_send_disposition(Some(h2::Reason::PROTOCOL_ERROR)),
            H2SendDisposition::Retry
        );
        assert_eq!(
            h2_send_disposition(Some(h2::Reason::INTERNAL_ERROR)),
            H2SendDisposition::Fail
        );
        assert_eq!(h2_send_disposition(None), H2SendDisposition::Fail);
    }

    #[test]
    fn h2_request_has_no_host_header() {
        let mut d = descriptor("https://h.example/a");
        d.headers.insert(HOST, HeaderValue::from_static("stale"));
        let req = build_h2_request(&d, &d.url()).unwrap();
        assert!(req.headers().get(HOST).is_none());
        assert_eq!(req.uri().to_string(), "https://h.example/a");
    }
}
