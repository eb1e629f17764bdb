//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config loaded → admin client → coordinator → initial reload → watcher
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → config refresh
//!
//! Shutdown (shutdown.rs):
//!     Stop watcher → stop coordinator → let running cycle finish → close client
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then client, then reloads, then watcher
//! - Shutdown has timeout: a hung cycle is aborted after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{ControlSignal, Signals};
pub use startup::{Sidecar, StartupError};
