//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to [`ControlSignal`] events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a config refresh, not shutdown
//! - Handlers are registered once, before the first reload, so no signal
//!   is lost between startup and the first `recv`

use std::io;

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Re-read the config file and reload.
    Refresh,
    /// Stop and exit.
    Shutdown,
}

#[cfg(unix)]
pub struct Signals {
    hangup: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal of interest.
    pub async fn recv(&mut self) -> ControlSignal {
        tokio::select! {
            _ = self.hangup.recv() => {
                tracing::info!(signal = "SIGHUP", "Signal received");
                ControlSignal::Refresh
            }
            _ = self.terminate.recv() => {
                tracing::info!(signal = "SIGTERM", "Signal received");
                ControlSignal::Shutdown
            }
            _ = self.interrupt.recv() => {
                tracing::info!(signal = "SIGINT", "Signal received");
                ControlSignal::Shutdown
            }
        }
    }
}

#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn register() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> ControlSignal {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!(signal = "ctrl-c", "Signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for ctrl-c"),
        }
        ControlSignal::Shutdown
    }
}
