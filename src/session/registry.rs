//! Open-session table.

use std::sync::Arc;

use dashmap::DashMap;

use super::session::Session;
use crate::urlcodec::{ensure_trailing_slash, format_proxy_url, ProxyUrlOptions};

/// Exact body text returned for requests referencing an unopened session.
/// Part of the external contract; tests match it literally.
pub const SESSION_NOT_OPENED: &str = "Session is not opened in proxy";

/// Registry of sessions currently open in the proxy. Sessions are opened and
/// closed by an external controller; the pipeline only looks them up.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    proxy_hostname: String,
    proxy_port: u16,
    proxy_protocol: String,
}

impl SessionRegistry {
    pub fn new(proxy_hostname: &str, proxy_port: u16, proxy_protocol: &str) -> SessionRegistry {
        SessionRegistry {
            sessions: DashMap::new(),
            proxy_hostname: proxy_hostname.to_string(),
            proxy_port,
            proxy_protocol: proxy_protocol.to_string(),
        }
    }

    /// Register a session and return the initial proxy URL for `url`.
    /// Idempotent per id: re-opening the same id overwrites.
    pub fn open_session(&self, url: &str, session: Arc<Session>) -> String {
        let entry_url = ensure_trailing_slash(url);
        let opts = ProxyUrlOptions {
            proxy_hostname: self.proxy_hostname.clone(),
            proxy_port: self.proxy_port,
            proxy_protocol: self.proxy_protocol.clone(),
            session_id: session.id.clone(),
            window_id: session.options.window_id.clone(),
            ..ProxyUrlOptions::default()
        };

        tracing::info!(session_id = %session.id, entry_url = %entry_url, "Session opened");
        self.sessions.insert(session.id.clone(), session);

        format_proxy_url(&entry_url, &opts)
    }

    /// Remove a session. Later requests referencing it fail with
    /// [`SESSION_NOT_OPENED`].
    pub fn close_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            tracing::info!(session_id = %session_id, "Session closed");
        }
        removed
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
