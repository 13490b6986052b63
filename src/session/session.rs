//! Session state for one browser window under test.

use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::cookie_jar::CookieJar;
use super::sync_cookie::SyncCookie;

/// Default page-request timeout when the session does not configure one.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_millis(25_000);
/// Default ajax-request timeout when the session does not configure one.
pub const DEFAULT_AJAX_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Script/style resources injected into every processed page of a session.
#[derive(Debug, Clone, Default)]
pub struct InjectableResources {
    pub scripts: Vec<String>,
    pub styles: Vec<String>,
    pub user_scripts: Vec<UserScript>,
}

/// A user script injected only into pages matching its filter.
#[derive(Debug, Clone)]
pub struct UserScript {
    pub url: String,
    /// Substring filter against the destination URL; `None` matches all pages.
    pub page_filter: Option<String>,
}

impl UserScript {
    pub fn matches(&self, dest_url: &str) -> bool {
        match self.page_filter {
            Some(ref filter) => dest_url.contains(filter.as_str()),
            None => true,
        }
    }
}

/// Per-session request timeouts in milliseconds. `None` falls back to the
/// defaults exactly as if the field were never configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTimeouts {
    pub page_ms: Option<u64>,
    pub ajax_ms: Option<u64>,
}

impl RequestTimeouts {
    pub fn effective(&self, is_ajax: bool) -> Duration {
        self.effective_or(
            is_ajax,
            DEFAULT_PAGE_TIMEOUT.as_millis() as u64,
            DEFAULT_AJAX_TIMEOUT.as_millis() as u64,
        )
    }

    /// Effective timeout with server-configured defaults for unset fields.
    pub fn effective_or(&self, is_ajax: bool, page_default_ms: u64, ajax_default_ms: u64) -> Duration {
        if is_ajax {
            Duration::from_millis(self.ajax_ms.unwrap_or(ajax_default_ms))
        } else {
            Duration::from_millis(self.page_ms.unwrap_or(page_default_ms))
        }
    }
}

/// Options fixed at session creation.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub window_id: Option<String>,
    pub disable_page_caching: bool,
    pub request_timeouts: RequestTimeouts,
    /// Referer forced onto page requests that arrive without one.
    pub referer: Option<String>,
    pub disable_http2: bool,
    /// External forward proxy (`host:port`); forces HTTP/1.1 upstream.
    pub forward_proxy: Option<String>,
}

/// Handler for a service message command. Receives the full message payload.
pub type CommandHandler = Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Session page-error hook: `(message, url) -> handled`.
pub type PageErrorHandler = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// One browser window's proxy-side state: cookie jar, injected resources,
/// options, and service-message handlers. Opened into the registry by an
/// external controller before any request referencing it arrives.
pub struct Session {
    pub id: String,
    pub cookies: CookieJar,
    pub injectable: InjectableResources,
    pub options: SessionOptions,
    command_handlers: DashMap<String, CommandHandler>,
    page_error_handler: Mutex<Option<PageErrorHandler>>,
    pending_sync_cookies: Mutex<Vec<SyncCookie>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Session {
        Session {
            id: id.into(),
            cookies: CookieJar::new(),
            injectable: InjectableResources::default(),
            options: SessionOptions::default(),
            command_handlers: DashMap::new(),
            page_error_handler: Mutex::new(None),
            pending_sync_cookies: Mutex::new(Vec::new()),
        }
    }

    /// A session with a generated unique id.
    pub fn generate() -> Session {
        Session::new(Uuid::new_v4().simple().to_string())
    }

    pub fn with_options(mut self, options: SessionOptions) -> Session {
        self.options = options;
        self
    }

    pub fn with_injectable(mut self, injectable: InjectableResources) -> Session {
        self.injectable = injectable;
        self
    }

    pub fn timeout(&self, is_ajax: bool) -> Duration {
        self.options.request_timeouts.effective(is_ajax)
    }

    /// Register a service-message command handler.
    pub fn register_command<F>(&self, cmd: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.command_handlers.insert(cmd.to_string(), Box::new(handler));
    }

    /// Dispatch a service message to its command handler.
    pub fn handle_service_message(&self, cmd: &str, payload: Value) -> Result<Value, String> {
        match self.command_handlers.get(cmd) {
            Some(handler) => handler(payload),
            None => Err(format!("Unknown command \"{}\"", cmd)),
        }
    }

    pub fn set_page_error_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        *self
            .page_error_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Box::new(handler));
    }

    /// Route an error to the session hook. Returns true when the hook
    /// reported it handled.
    pub fn handle_page_error(&self, message: &str, url: &str) -> bool {
        let guard = self
            .page_error_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(handler) => handler(message, url),
            None => false,
        }
    }

    /// Record cookies that must be synchronized to the client runtime.
    pub fn queue_sync_cookies(&self, cookies: Vec<SyncCookie>) {
        if cookies.is_empty() {
            return;
        }
        self.pending_sync_cookies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(cookies);
    }

    /// Drain cookies queued for client synchronization. Called when a page
    /// or ajax response is finalized.
    pub fn take_pending_sync_cookies(&self) -> Vec<SyncCookie> {
        std::mem::take(
            &mut *self
                .pending_sync_cookies
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        )
    }

    /// Session bootstrap script, served from the task-script endpoint and
    /// consumed by the injected client runtime.
    pub fn task_script(&self, dest_url: &str) -> String {
        let mut scripts: Vec<&str> = self.injectable.scripts.iter().map(String::as_str).collect();
        let user_scripts: Vec<&str> = self
            .injectable
            .user_scripts
            .iter()
            .filter(|s| s.matches(dest_url))
            .map(|s| s.url.as_str())
            .collect();
        scripts.extend(&user_scripts);

        format!(
            "window['%sessionProxy%'] = {{ sessionId: {}, injectedScripts: {} }};\n",
            serde_json::json!(self.id),
            serde_json::json!(scripts)
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults() {
        let session = Session::new("s1");
        assert_eq!(session.timeout(false), DEFAULT_PAGE_TIMEOUT);
        assert_eq!(session.timeout(true), DEFAULT_AJAX_TIMEOUT);
    }

    #[test]
    fn timeout_overrides() {
        let session = Session::new("s1").with_options(SessionOptions {
            request_timeouts: RequestTimeouts {
                page_ms: Some(1_000),
                ajax_ms: None,
            },
            ..SessionOptions::default()
        });
        assert_eq!(session.timeout(false), Duration::from_millis(1_000));
        assert_eq!(session.timeout(true), DEFAULT_AJAX_TIMEOUT);
    }

    #[test]
    fn configured_defaults_fill_unset_timeouts() {
        let timeouts = RequestTimeouts {
            page_ms: Some(1_000),
            ajax_ms: None,
        };
        // Session overrides win; unset fields take the server's configured
        // defaults.
        assert_eq!(timeouts.effective_or(false, 5_000, 9_000), Duration::from_millis(1_000));
        assert_eq!(timeouts.effective_or(true, 5_000, 9_000), Duration::from_millis(9_000));
    }

    #[test]
    fn service_message_dispatch() {
        let session = Session::new("s1");
        session.register_command("echo", |payload| Ok(payload));

        let result = session.handle_service_message("echo", serde_json::json!({"x": 1}));
        assert_eq!(result.unwrap(), serde_json::json!({"x": 1}));

        let missing = session.handle_service_message("nope", Value::Null);
        assert_eq!(missing.unwrap_err(), "Unknown command \"nope\"");
    }

    #[test]
    fn page_error_hook_reports_handled() {
        let session = Session::new("s1");
        assert!(!session.handle_page_error("boom", "http://x/"));
        session.set_page_error_handler(|msg, _| msg == "boom");
        assert!(session.handle_page_error("boom", "http://x/"));
        assert!(!session.handle_page_error("other", "http://x/"));
    }

    #[test]
    fn user_script_filters() {
        let all = UserScript { url: "u".into(), page_filter: None };
        let filtered = UserScript { url: "u".into(), page_filter: Some("checkout".into()) };
        assert!(all.matches("http://h/any"));
        assert!(filtered.matches("http://h/checkout/page"));
        assert!(!filtered.matches("http://h/other"));
    }

    #[test]
    fn task_script_lists_injected_scripts() {
        let session = Session::new("s1").with_injectable(InjectableResources {
            scripts: vec!["/inject/a.js".to_string()],
            ..InjectableResources::default()
        });
        let script = session.task_script("http://h/");
        assert!(script.contains("\"s1\""));
        assert!(script.contains("/inject/a.js"));
    }
}
