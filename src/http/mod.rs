//! HTTP listener subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, two listeners, shared state)
//!     → service routes (/messaging, /task.js, /proxy-client.js)
//!     → fallback: pipeline dispatcher (proxy URL grammar)
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, ProxyServer, ServerInfo};
