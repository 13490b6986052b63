//! Destination request error taxonomy.
//!
//! Errors carry structured fields; human-readable text is produced by the
//! `Display` impls and only consumed at the HTTP boundary.

use thiserror::Error;

/// Phase of the exchange in which a timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Response,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Connect => write!(f, "connect"),
            TimeoutPhase::Response => write!(f, "response"),
        }
    }
}

/// Errors raised by the destination request engine.
#[derive(Debug, Error)]
pub enum DestinationError {
    /// Destination host unresolvable.
    #[error("Failed to find a DNS-record for the resource at \"{url}\"")]
    DnsResolutionFailed { url: String },

    /// Upstream connect or response exceeded the effective timeout.
    #[error("Request to \"{url}\" timed out in the {phase} phase after {timeout_ms} ms")]
    RequestTimeout {
        url: String,
        phase: TimeoutPhase,
        timeout_ms: u64,
    },

    /// Destination refused the connection.
    #[error("Connection to \"{url}\" was refused")]
    ConnectionRefused { url: String },

    /// Destination reset the connection mid-request.
    #[error("Connection to \"{url}\" was reset by the destination")]
    ConnectionReset { url: String },

    /// Destination closed the socket before a complete response arrived.
    #[error("The destination at \"{url}\" closed the connection before sending a complete response")]
    SocketHangUp { url: String },

    /// TLS negotiation with the destination failed.
    #[error("TLS handshake with \"{url}\" failed: {detail}")]
    TlsHandshake { url: String, detail: String },

    /// The destination sent headers the HTTP parser rejects. The hint names
    /// the remediation, as the diagnostic is otherwise opaque to test
    /// authors.
    #[error("The destination at \"{url}\" sent malformed response headers: {detail}. {hint}")]
    MalformedUpstreamHeaders {
        url: String,
        detail: String,
        hint: String,
    },

    /// Transport failure not covered by a more specific kind.
    #[error("Request to \"{url}\" failed: {detail}")]
    Transport { url: String, detail: String },
}

impl DestinationError {
    /// Stable kind label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DestinationError::DnsResolutionFailed { .. } => "dns",
            DestinationError::RequestTimeout { .. } => "timeout",
            DestinationError::ConnectionRefused { .. } => "refused",
            DestinationError::ConnectionReset { .. } => "reset",
            DestinationError::SocketHangUp { .. } => "hang_up",
            DestinationError::TlsHandshake { .. } => "tls",
            DestinationError::MalformedUpstreamHeaders { .. } => "malformed_headers",
            DestinationError::Transport { .. } => "transport",
        }
    }

    /// Whether the request may be transparently resent once. Only failures
    /// that occurred before any response bytes arrived qualify.
    pub fn is_resend_safe(&self) -> bool {
        matches!(
            self,
            DestinationError::ConnectionReset { .. } | DestinationError::SocketHangUp { .. }
        )
    }
}

pub type DestinationResult<T> = Result<T, DestinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_url() {
        let err = DestinationError::DnsResolutionFailed {
            url: "http://unresolvable.example/".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to find a DNS-record for the resource at \"http://unresolvable.example/\""
        );
    }

    #[test]
    fn timeout_display_includes_phase_and_budget() {
        let err = DestinationError::RequestTimeout {
            url: "http://slow.example/".to_string(),
            phase: TimeoutPhase::Response,
            timeout_ms: 25_000,
        };
        let text = err.to_string();
        assert!(text.contains("response phase"));
        assert!(text.contains("25000 ms"));
    }

    #[test]
    fn resend_safety() {
        assert!(DestinationError::ConnectionReset { url: "u".into() }.is_resend_safe());
        assert!(DestinationError::SocketHangUp { url: "u".into() }.is_resend_safe());
        assert!(!DestinationError::DnsResolutionFailed { url: "u".into() }.is_resend_safe());
        assert!(!DestinationError::RequestTimeout {
            url: "u".into(),
            phase: TimeoutPhase::Connect,
            timeout_ms: 1,
        }
        .is_resend_safe());
    }

    #[test]
    fn malformed_headers_carry_a_hint() {
        let err = DestinationError::MalformedUpstreamHeaders {
            url: "http://h/".to_string(),
            detail: "invalid header value char at index 7".to_string(),
            hint: "Relax strict header parsing or fix the destination server".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("index 7"));
        assert!(text.contains("Relax strict header parsing"));
    }
}
