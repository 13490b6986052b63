//! Shared utilities for integration testing: a programmable mock
//! destination server and a proxy launcher.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_proxy::config::ProxyConfig;
use session_proxy::{ProxyServer, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A request as received by the mock destination.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response the mock destination should produce.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        MockResponse {
            status: 200,
            headers: vec![("content-type".into(), "text/html".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_content_type(mut self, value: &str) -> Self {
        self.headers.retain(|(n, _)| n != "content-type");
        self.with_header("content-type", value)
    }
}

/// Handle to a running mock destination.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl MockOrigin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<ReceivedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

/// Start a mock destination at `addr` whose responses are computed from the
/// received request.
pub async fn start_mock_origin<F>(addr: SocketAddr, respond: F) -> MockOrigin
where
    F: Fn(&ReceivedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let accept_hits = hits.clone();
    let accept_requests = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            let hits = accept_hits.clone();
            let requests = accept_requests.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let response = respond(&request);
                requests.lock().unwrap().push(request);

                let mut wire = format!(
                    "HTTP/1.1 {} {}\r\ncontent-length: {}\r\nconnection: close\r\n",
                    response.status,
                    reason(response.status),
                    response.body.len()
                );
                for (name, value) in &response.headers {
                    wire.push_str(&format!("{}: {}\r\n", name, value));
                }
                wire.push_str("\r\n");

                let _ = socket.write_all(wire.as_bytes()).await;
                let _ = socket.write_all(&response.body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockOrigin { addr, hits, requests }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(idx) = find_header_end(&buf) {
            break idx;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split(' ');
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    let content_length: usize = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Some(ReceivedRequest { method, path, headers, body })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        302 => "Found",
        304 => "Not Modified",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

/// A running proxy bound to test ports.
pub struct TestProxy {
    pub server: Arc<ProxyServer>,
    pub port: u16,
}

impl TestProxy {
    /// Proxy URL for a destination, with an optional descriptor suffix on
    /// the session id (e.g. `"!s"`).
    pub fn proxy_url(&self, session_id: &str, descriptor_suffix: &str, dest_url: &str) -> String {
        format!(
            "http://127.0.0.1:{}/{}{}/{}",
            self.port, session_id, descriptor_suffix, dest_url
        )
    }

    pub fn service_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn open(&self, entry_url: &str, session: Arc<Session>) -> String {
        self.server.open_session(entry_url, session)
    }
}

/// Spawn a proxy on the given port pair and wait until it accepts.
pub async fn start_proxy(port: u16, cross_domain_port: u16) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.hostname = "127.0.0.1".to_string();
    config.listener.port = port;
    config.listener.cross_domain_port = cross_domain_port;

    let server = Arc::new(ProxyServer::new(config));
    let runner = server.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    TestProxy { server, port }
}

/// A reqwest client that never follows redirects or env proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
