//! Upstream socket establishment.
//!
//! # Responsibilities
//! - Resolve destination hosts and dial TCP with a connect timeout
//! - Negotiate TLS (SNI + ALPN) against the webpki root store
//! - Classify failures into the structured error taxonomy

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};

use super::error::{DestinationError, DestinationResult, TimeoutPhase};

/// ALPN protocol ids.
pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_HTTP1: &[u8] = b"http/1.1";

/// A connected upstream transport.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// The ALPN protocol the server agreed to, when TLS was used.
    pub fn negotiated_alpn(&self) -> Option<Vec<u8>> {
        match self {
            Transport::Plain(_) => None,
            Transport::Tls(stream) => stream.get_ref().1.alpn_protocol().map(|p| p.to_vec()),
        }
    }
}

/// Dials destination sockets. One instance shared by the whole engine.
pub struct Connector {
    connect_timeout: Duration,
    tls_config_h2: Arc<rustls::ClientConfig>,
    tls_config_h1: Arc<rustls::ClientConfig>,
}

impl Connector {
    pub fn new(connect_timeout: Duration) -> Connector {
        Connector {
            connect_timeout,
            tls_config_h2: Arc::new(tls_config(vec![ALPN_H2.to_vec(), ALPN_HTTP1.to_vec()])),
            tls_config_h1: Arc::new(tls_config(vec![ALPN_HTTP1.to_vec()])),
        }
    }

    /// Dial a plain TCP connection.
    pub async fn connect_plain(&self, host: &str, port: u16, url: &str) -> DestinationResult<TcpStream> {
        let stream = self.dial(host, port, url).await?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    /// Dial and TLS-handshake. `offer_h2` controls whether `h2` is offered
    /// in ALPN.
    pub async fn connect_tls(
        &self,
        host: &str,
        port: u16,
        url: &str,
        offer_h2: bool,
    ) -> DestinationResult<Transport> {
        let stream = self.connect_plain(host, port, url).await?;

        let config = if offer_h2 {
            self.tls_config_h2.clone()
        } else {
            self.tls_config_h1.clone()
        };
        let connector = TlsConnector::from(config);

        let server_name =
            ServerName::try_from(host.to_string()).map_err(|_| DestinationError::TlsHandshake {
                url: url.to_string(),
                detail: format!("invalid hostname for SNI: {:?}", host),
            })?;

        let handshake = connector.connect(server_name, stream);
        match timeout(self.connect_timeout, handshake).await {
            Ok(Ok(tls_stream)) => Ok(Transport::Tls(Box::new(tls_stream))),
            Ok(Err(e)) => Err(DestinationError::TlsHandshake {
                url: url.to_string(),
                detail: e.to_string(),
            }),
            Err(_) => Err(DestinationError::RequestTimeout {
                url: url.to_string(),
                phase: TimeoutPhase::Connect,
                timeout_ms: self.connect_timeout.as_millis() as u64,
            }),
        }
    }

    async fn dial(&self, host: &str, port: u16, url: &str) -> DestinationResult<TcpStream> {
        let addrs: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|_| DestinationError::DnsResolutionFailed { url: url.to_string() })?
            .collect();
        if addrs.is_empty() {
            return Err(DestinationError::DnsResolutionFailed { url: url.to_string() });
        }

        let mut last_err = None;
        for addr in addrs {
            tracing::trace!(%addr, url, "Attempting upstream TCP connect");
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_err = Some(classify_io_error(&e, url)),
                Err(_) => {
                    last_err = Some(DestinationError::RequestTimeout {
                        url: url.to_string(),
                        phase: TimeoutPhase::Connect,
                        timeout_ms: self.connect_timeout.as_millis() as u64,
                    })
                }
            }
        }

        Err(last_err.unwrap_or(DestinationError::DnsResolutionFailed { url: url.to_string() }))
    }
}

/// Map an IO failure onto the error taxonomy.
pub fn classify_io_error(e: &std::io::Error, url: &str) -> DestinationError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::ConnectionRefused => DestinationError::ConnectionRefused { url: url.to_string() },
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            DestinationError::ConnectionReset { url: url.to_string() }
        }
        ErrorKind::UnexpectedEof => DestinationError::SocketHangUp { url: url.to_string() },
        _ => DestinationError::Transport {
            url: url.to_string(),
            detail: e.to_string(),
        },
    }
}

fn tls_config(alpn: Vec<Vec<u8>>) -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_classification() {
        let url = "http://h/";
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            classify_io_error(&refused, url),
            DestinationError::ConnectionRefused { .. }
        ));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            classify_io_error(&reset, url),
            DestinationError::ConnectionReset { .. }
        ));

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            classify_io_error(&eof, url),
            DestinationError::SocketHangUp { .. }
        ));

        let other = std::io::Error::other("weird");
        assert!(matches!(
            classify_io_error(&other, url),
            DestinationError::Transport { .. }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        let connector = Connector::new(Duration::from_secs(1));
        // Port 1 on localhost is almost certainly closed.
        let err = connector
            .connect_plain("127.0.0.1", 1, "http://127.0.0.1:1/")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DestinationError::ConnectionRefused { .. } | DestinationError::Transport { .. }
        ));
    }
}
