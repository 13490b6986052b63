//! Semantic validation of the configuration.
//!
//! Serde guarantees the types; this module checks the values make sense
//! together before any listener binds.

use thiserror::Error;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listener.hostname must not be empty")]
    EmptyHostname,

    #[error("listener.port and listener.cross_domain_port must differ")]
    PortCollision,

    #[error("timeouts.{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },

    #[error("cache.max_entries must be greater than zero when the cache is enabled")]
    ZeroCacheEntries,

    #[error("upstream.forward_proxy must be host:port, got {value:?}")]
    InvalidForwardProxy { value: String },

    #[error("observability.log_level {value:?} is not one of trace, debug, info, warn, error")]
    InvalidLogLevel { value: String },
}

/// Validate a configuration, collecting all violations rather than stopping
/// at the first.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.hostname.trim().is_empty() {
        errors.push(ValidationError::EmptyHostname);
    }
    if config.listener.port == config.listener.cross_domain_port {
        errors.push(ValidationError::PortCollision);
    }

    if config.timeouts.page_ms == 0 {
        errors.push(ValidationError::ZeroTimeout { field: "page_ms" });
    }
    if config.timeouts.ajax_ms == 0 {
        errors.push(ValidationError::ZeroTimeout { field: "ajax_ms" });
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout { field: "connect_secs" });
    }

    if config.cache.enabled && config.cache.max_entries == 0 {
        errors.push(ValidationError::ZeroCacheEntries);
    }

    if let Some(ref proxy) = config.upstream.forward_proxy {
        let valid = proxy
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::InvalidForwardProxy {
                value: proxy.clone(),
            });
        }
    }

    let level = config.observability.log_level.as_str();
    if !matches!(level, "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::InvalidLogLevel {
            value: level.to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn port_collision_is_rejected() {
        let mut config = ProxyConfig::default();
        config.listener.cross_domain_port = config.listener.port;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::PortCollision));
    }

    #[test]
    fn forward_proxy_must_be_host_port() {
        let mut config = ProxyConfig::default();
        config.upstream.forward_proxy = Some("not-an-endpoint".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors[0],
            ValidationError::InvalidForwardProxy { .. }
        ));

        config.upstream.forward_proxy = Some("10.0.0.1:3128".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn all_violations_are_collected() {
        let mut config = ProxyConfig::default();
        config.listener.hostname = String::new();
        config.timeouts.page_ms = 0;
        config.observability.log_level = "loud".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
