//! Lifecycle management: shutdown coordination and signal handling.
//!
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT -> Shutdown::trigger
//! Shutdown (shutdown.rs):
//!     trigger -> both listeners stop accepting -> drain -> exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
