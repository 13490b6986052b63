//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the session proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (hostname, ports, TLS).
    pub listener: ListenerConfig,

    /// Default timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Destination request engine settings.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
///
/// The proxy binds two ports on one hostname: `port` serves same-domain
/// traffic, `cross_domain_port` serves iframe/import resources whose origin
/// differs from the referring page's origin.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Hostname the proxy is reachable at (embedded into proxy URLs).
    pub hostname: String,

    /// Same-domain proxy port.
    pub port: u16,

    /// Cross-domain proxy port.
    pub cross_domain_port: u16,

    /// Optional TLS configuration; when set, proxy URLs use `https`.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 1337,
            cross_domain_port: 1338,
            tls: None,
        }
    }
}

impl ListenerConfig {
    pub fn protocol(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

/// TLS configuration for the listeners.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration. Per-session timeouts override these defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Page-request timeout in milliseconds.
    pub page_ms: u64,

    /// Ajax-request timeout in milliseconds.
    pub ajax_ms: u64,

    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            page_ms: 25_000,
            ajax_ms: 120_000,
            connect_secs: 10,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the in-memory response cache.
    pub enabled: bool,

    /// Maximum number of cached entries (LRU beyond this).
    pub max_entries: usize,

    /// Per-entry body size ceiling in bytes; larger responses are not cached.
    pub max_entry_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 512,
            max_entry_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Destination request engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Disable HTTP/2 to destinations globally (sessions can also disable it
    /// individually).
    pub disable_http2: bool,

    /// External forward proxy (`host:port`). Forces HTTP/1.1 upstream.
    pub forward_proxy: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            disable_http2: false,
            forward_proxy: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
