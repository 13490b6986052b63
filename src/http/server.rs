//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: service endpoints plus the dispatch fallback
//! - Bind both proxy listeners (same-domain and cross-domain) over one
//!   shared set of collaborators
//! - Expose the session control surface (`open_session`/`close_session`)
//! - Serve with graceful shutdown, plain or TLS

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::cache::{CachePolicy, ResponseCache};
use crate::config::{ProxyConfig, TimeoutConfig, TlsConfig};
use crate::lifecycle::Shutdown;
use crate::pipeline::{dispatcher, service, ContentTransformer, HeadInjectionTransformer};
use crate::session::{Session, SessionRegistry};
use crate::upstream::DestinationRequestEngine;

/// Identity of the listener a request arrived on; embedded into every proxy
/// URL the response rewriting produces.
#[derive(Clone)]
pub struct ServerInfo {
    pub protocol: String,
    pub hostname: String,
    pub port: u16,
    pub cross_domain_port: Option<u16>,
}

/// Application state injected into handlers. Collaborators are shared
/// between both listeners; `server_info` differs per listener.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub cache: Arc<ResponseCache>,
    pub engine: Arc<DestinationRequestEngine>,
    pub transformer: Arc<dyn ContentTransformer>,
    pub server_info: ServerInfo,
    /// Configured timeout defaults; session options override per field.
    pub timeouts: TimeoutConfig,
}

/// The session proxy server: two listeners, one dispatcher.
pub struct ProxyServer {
    config: ProxyConfig,
    registry: Arc<SessionRegistry>,
    cache: Arc<ResponseCache>,
    engine: Arc<DestinationRequestEngine>,
    transformer: Arc<dyn ContentTransformer>,
    shutdown: Arc<Shutdown>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_transformer(config, Arc::new(HeadInjectionTransformer))
    }

    /// Build the server with an external content transformer implementation.
    pub fn with_transformer(config: ProxyConfig, transformer: Arc<dyn ContentTransformer>) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            &config.listener.hostname,
            config.listener.port,
            config.listener.protocol(),
        ));
        let cache = Arc::new(ResponseCache::new(CachePolicy {
            enabled: config.cache.enabled,
            max_entries: config.cache.max_entries,
            max_entry_bytes: config.cache.max_entry_bytes,
        }));
        let engine = Arc::new(DestinationRequestEngine::new(
            &config.upstream,
            Duration::from_secs(config.timeouts.connect_secs),
        ));

        ProxyServer {
            config,
            registry,
            cache,
            engine,
            transformer,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Register a session and return its entry proxy URL.
    pub fn open_session(&self, url: &str, session: Arc<Session>) -> String {
        self.registry.open_session(url, session)
    }

    pub fn close_session(&self, session_id: &str) -> bool {
        self.registry.close_session(session_id)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    fn state_for(&self, port: u16) -> AppState {
        AppState {
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            engine: self.engine.clone(),
            transformer: self.transformer.clone(),
            server_info: ServerInfo {
                protocol: self.config.listener.protocol().to_string(),
                hostname: self.config.listener.hostname.clone(),
                port,
                cross_domain_port: Some(self.config.listener.cross_domain_port),
            },
            timeouts: self.config.timeouts.clone(),
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/messaging", post(service::messaging))
            .route("/task.js", get(service::task_script))
            .route("/proxy-client.js", get(service::client_script))
            .fallback(dispatcher::dispatch)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind both listeners and serve until shutdown is triggered.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = &self.config.listener;
        let main_addr: SocketAddr = resolve_addr(&listener.hostname, listener.port)?;
        let cross_addr: SocketAddr = resolve_addr(&listener.hostname, listener.cross_domain_port)?;

        let main_router = Self::build_router(self.state_for(listener.port));
        let cross_router = Self::build_router(self.state_for(listener.cross_domain_port));

        tracing::info!(
            address = %main_addr,
            cross_domain = %cross_addr,
            protocol = listener.protocol(),
            "Session proxy starting"
        );

        match listener.tls.clone() {
            Some(tls) => {
                tokio::try_join!(
                    self.serve_tls(main_addr, main_router, &tls),
                    self.serve_tls(cross_addr, cross_router, &tls),
                )?;
            }
            None => {
                tokio::try_join!(
                    self.serve_plain(main_addr, main_router),
                    self.serve_plain(cross_addr, cross_router),
                )?;
            }
        }

        tracing::info!("Session proxy stopped");
        Ok(())
    }

    async fn serve_plain(&self, addr: SocketAddr, router: Router) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let shutdown = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
    }

    async fn serve_tls(
        &self,
        addr: SocketAddr,
        router: Router,
        tls: &TlsConfig,
    ) -> Result<(), std::io::Error> {
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            tls.cert_path.clone(),
            tls.key_path.clone(),
        )
        .await?;

        let handle = axum_server::Handle::new();
        let shutdown = self.shutdown.clone();
        let drain_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            drain_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(router.into_make_service())
            .await
    }
}

fn resolve_addr(hostname: &str, port: u16) -> Result<SocketAddr, std::io::Error> {
    use std::net::ToSocketAddrs;
    (hostname, port).to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("listener address {}:{} did not resolve", hostname, port),
        )
    })
}
