//! Destination request engine.
//!
//! # Responsibilities
//! - Dial destination servers (TCP, TLS with SNI and ALPN)
//! - Prefer HTTP/2 per origin with transparent HTTP/1.1 fallback
//! - Decode compressed bodies for content that needs rewriting
//! - Classify every failure into a structured, user-facing error taxonomy

pub mod connect;
pub mod decoding;
pub mod error;
pub mod h2pool;
pub mod request;

pub use decoding::decode_body;
pub use error::{DestinationError, DestinationResult, TimeoutPhase};
pub use request::{DestinationRequest, DestinationRequestEngine};
