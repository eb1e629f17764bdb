//! Admin protocol error definitions.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the admin protocol client.
///
/// Transport-level variants tear the connection down and hand control to the
/// reconnect loop. `Command` and `ParallelRequest` leave the connection intact.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Socket connect, read or write failed.
    #[error("admin socket transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The daemon did not answer within the configured deadline.
    #[error("admin socket timed out after {0:?}")]
    Timeout(Duration),

    /// The challenge handshake was rejected.
    #[error("authentication failed with status {status}")]
    Authentication { status: u16 },

    /// The shared secret could not be loaded.
    #[error("failed to read admin secret {path}: {source}")]
    Secret {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The daemon answered a command with a non-200 status.
    #[error("command failed with status {status}: {message}")]
    Command { status: u16, message: String },

    /// The byte stream violated the response framing.
    #[error("admin protocol violation: {0}")]
    Protocol(String),

    /// A response arrived but its body had the wrong shape for the command.
    #[error("unexpected response body: {0}")]
    UnexpectedBody(String),

    /// Another request is still outstanding on this client.
    #[error("parallel requests are not supported")]
    ParallelRequest,

    /// The client is between connections.
    #[error("admin socket disconnected")]
    Disconnected,

    /// The client was closed.
    #[error("admin client closed")]
    Closed,
}

impl AdminError {
    /// Whether the error leaves the connection unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            AdminError::Transport(_)
                | AdminError::Timeout(_)
                | AdminError::Authentication { .. }
                | AdminError::Secret { .. }
                | AdminError::Protocol(_)
        )
    }

    /// Whether the command never got an answer because the socket was
    /// down, broke or went silent.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AdminError::Transport(_) | AdminError::Timeout(_) | AdminError::Disconnected
        )
    }

    /// Status code carried by the error, if the daemon produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AdminError::Authentication { status } | AdminError::Command { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Result type for admin protocol operations.
pub type AdminResult<T> = Result<T, AdminError>;
