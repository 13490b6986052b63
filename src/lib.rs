//! Session-scoped rewriting proxy for browser test automation.
//!
//! Sits between a browser under test and the destination site: every URL is
//! rewritten to route back through the proxy, carrying the session id,
//! window id and resource type in the proxy URL itself. The proxy resolves
//! each request to its session, fetches the destination over HTTP/1.1 or
//! HTTP/2, applies cookie and CORS policy on the session's behalf, and
//! injects the client runtime into pages.

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod upstream;
pub mod urlcodec;
pub mod ws;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
pub use session::{Session, SessionOptions, SESSION_NOT_OPENED};
